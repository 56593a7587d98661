//! Length-prefixed strings, variable-length integers, fixed-width
//! numerics, GUIDs and byte blobs, plus the block-buffering wrapper
//! used by open-stream sessions.

use std::io::{Read, Write};

use uuid::Uuid;

use crate::error::{Result, WireError};

/// Block size used by [`BufferedSink`]/[`BufferedSource`] when
/// `UseBuffering` is enabled. Chosen to match a single filesystem
/// page on most targets.
pub const BUFFER_BLOCK_SIZE: usize = 4096;

/// Writes a single value's primitive encoding onto a byte sink.
pub trait WireWrite: Sized {
	fn write_to(&self, sink: &mut dyn Write) -> Result<()>;
}

/// Reads a single value's primitive encoding from a byte source.
pub trait WireRead: Sized {
	fn read_from(source: &mut dyn Read) -> Result<Self>;
}

macro_rules! impl_fixed_width {
	($($ty:ty),* $(,)?) => {$(
		impl WireWrite for $ty {
			#[inline]
			fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
				sink.write_all(&self.to_le_bytes()).map_err(Into::into)
			}
		}

		impl WireRead for $ty {
			#[inline]
			fn read_from(source: &mut dyn Read) -> Result<Self> {
				let mut bytes = [0u8; std::mem::size_of::<$ty>()];
				source.read_exact(&mut bytes)?;
				Ok(Self::from_le_bytes(bytes))
			}
		}
	)*};
}

impl_fixed_width!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl WireWrite for bool {
	#[inline]
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		sink.write_all(&[*self as u8]).map_err(Into::into)
	}
}

impl WireRead for bool {
	#[inline]
	fn read_from(source: &mut dyn Read) -> Result<Self> {
		let mut byte = [0u8];
		source.read_exact(&mut byte)?;
		match byte[0] {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(WireError::StreamCorrupted("boolean byte was neither 0 nor 1")),
		}
	}
}

/// Writes `value` using the classic 7-bit variable-length unsigned
/// integer encoding: the low 7 bits of each byte carry payload, the
/// high bit marks continuation.
pub fn write_var_u64(sink: &mut dyn Write, mut value: u64) -> Result<()> {
	loop {
		let mut byte = (value & 0x7F) as u8;
		value >>= 7;
		if value != 0 {
			byte |= 0x80;
		}
		sink.write_all(&[byte])?;
		if value == 0 {
			return Ok(());
		}
	}
}

pub fn read_var_u64(source: &mut dyn Read) -> Result<u64> {
	let mut result: u64 = 0;
	let mut shift = 0u32;
	loop {
		if shift >= 70 {
			return Err(WireError::StreamCorrupted("variable-length integer too long"));
		}
		let mut byte = [0u8];
		source.read_exact(&mut byte)?;
		result |= u64::from(byte[0] & 0x7F) << shift;
		if byte[0] & 0x80 == 0 {
			return Ok(result);
		}
		shift += 7;
	}
}

/// Zigzag-encoded signed counterpart of [`write_var_u64`].
pub fn write_var_i64(sink: &mut dyn Write, value: i64) -> Result<()> {
	let zigzag = ((value << 1) ^ (value >> 63)) as u64;
	write_var_u64(sink, zigzag)
}

pub fn read_var_i64(source: &mut dyn Read) -> Result<i64> {
	let zigzag = read_var_u64(source)?;
	Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

/// A 7-bit-length-prefixed, non-negative identity or type id.
/// `0` is the reserved null/sentinel id.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StreamId(pub u32);

impl StreamId {
	pub const NULL: StreamId = StreamId(0);

	#[inline]
	pub fn is_null(self) -> bool {
		self.0 == 0
	}
}

impl WireWrite for StreamId {
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		write_var_u64(sink, self.0 as u64)
	}
}

impl WireRead for StreamId {
	fn read_from(source: &mut dyn Read) -> Result<Self> {
		let value = read_var_u64(source)?;
		let value = u32::try_from(value).map_err(|_| WireError::StreamCorrupted("id out of range"))?;
		Ok(StreamId(value))
	}
}

impl WireWrite for str {
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		write_var_u64(sink, self.len() as u64)?;
		sink.write_all(self.as_bytes()).map_err(Into::into)
	}
}

impl WireWrite for String {
	#[inline]
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		self.as_str().write_to(sink)
	}
}

impl WireRead for String {
	fn read_from(source: &mut dyn Read) -> Result<Self> {
		let len = read_var_u64(source)? as usize;
		let mut bytes = vec![0u8; len];
		source.read_exact(&mut bytes)?;
		String::from_utf8(bytes).map_err(|_| WireError::StreamCorrupted("string was not valid UTF-8"))
	}
}

impl WireWrite for Uuid {
	#[inline]
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		sink.write_all(self.as_bytes()).map_err(Into::into)
	}
}

impl WireRead for Uuid {
	fn read_from(source: &mut dyn Read) -> Result<Self> {
		let mut bytes = [0u8; 16];
		source.read_exact(&mut bytes)?;
		Ok(Uuid::from_bytes(bytes))
	}
}

/// Writes a raw byte blob as a 7-bit length prefix followed by the
/// bytes verbatim.
pub fn write_blob(sink: &mut dyn Write, bytes: &[u8]) -> Result<()> {
	write_var_u64(sink, bytes.len() as u64)?;
	sink.write_all(bytes).map_err(Into::into)
}

pub fn read_blob(source: &mut dyn Read) -> Result<Vec<u8>> {
	let len = read_var_u64(source)? as usize;
	let mut bytes = vec![0u8; len];
	source.read_exact(&mut bytes)?;
	Ok(bytes)
}

/// Wraps a [`Write`] in a fixed-size block buffer so consecutive
/// open-stream operations stay aligned on block boundaries. On
/// [`finish`](Self::finish) the current block is padded with zero
/// bytes up to `BUFFER_BLOCK_SIZE` and flushed.
pub struct BufferedSink<W: Write> {
	inner: W,
	block: Vec<u8>,
}

impl<W: Write> BufferedSink<W> {
	pub fn new(inner: W) -> Self {
		Self { inner, block: Vec::with_capacity(BUFFER_BLOCK_SIZE) }
	}

	fn flush_full_blocks(&mut self) -> Result<()> {
		while self.block.len() >= BUFFER_BLOCK_SIZE {
			let tail = self.block.split_off(BUFFER_BLOCK_SIZE);
			self.inner.write_all(&self.block)?;
			self.block = tail;
		}
		Ok(())
	}

	/// Pads the current block to a boundary with zero bytes and
	/// flushes it. Call once per open-stream session close.
	pub fn finish(mut self) -> Result<W> {
		let pad = (BUFFER_BLOCK_SIZE - self.block.len() % BUFFER_BLOCK_SIZE) % BUFFER_BLOCK_SIZE;
		self.block.resize(self.block.len() + pad, 0);
		self.inner.write_all(&self.block)?;
		self.inner.flush()?;
		Ok(self.inner)
	}
}

impl<W: Write> Write for BufferedSink<W> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.block.extend_from_slice(buf);
		self.flush_full_blocks().map_err(|err| match err {
			WireError::Io(err) => err,
			other => std::io::Error::new(std::io::ErrorKind::Other, other),
		})?;
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.inner.flush()
	}
}

/// Mirror of [`BufferedSink`] on the read side: reads whole blocks
/// from the underlying source and serves bytes out of them, so a
/// following open-stream read resumes at a block boundary.
pub struct BufferedSource<R: Read> {
	inner: R,
	block: Vec<u8>,
	position: usize,
}

impl<R: Read> BufferedSource<R> {
	pub fn new(inner: R) -> Self {
		Self { inner, block: Vec::new(), position: 0 }
	}

	fn refill(&mut self) -> std::io::Result<()> {
		self.block.resize(BUFFER_BLOCK_SIZE, 0);
		let read = self.inner.read(&mut self.block)?;
		self.block.truncate(read);
		self.position = 0;
		Ok(())
	}
}

impl<R: Read> Read for BufferedSource<R> {
	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		if self.position >= self.block.len() {
			self.refill()?;
			if self.block.is_empty() {
				return Ok(0);
			}
		}
		let available = &self.block[self.position..];
		let n = available.len().min(buf.len());
		buf[..n].copy_from_slice(&available[..n]);
		self.position += n;
		Ok(n)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn var_u64_round_trips() {
		for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
			let mut buf = Vec::new();
			write_var_u64(&mut buf, value).unwrap();
			let mut cursor = buf.as_slice();
			assert_eq!(read_var_u64(&mut cursor).unwrap(), value);
		}
	}

	#[test]
	fn var_i64_round_trips() {
		for value in [0i64, -1, 1, i64::MIN, i64::MAX, -300, 300] {
			let mut buf = Vec::new();
			write_var_i64(&mut buf, value).unwrap();
			let mut cursor = buf.as_slice();
			assert_eq!(read_var_i64(&mut cursor).unwrap(), value);
		}
	}

	#[test]
	fn string_round_trips() {
		let value = String::from("hello, graph");
		let mut buf = Vec::new();
		value.write_to(&mut buf).unwrap();
		let mut cursor = buf.as_slice();
		assert_eq!(String::read_from(&mut cursor).unwrap(), value);
	}

	#[test]
	fn buffered_sink_pads_to_block_boundary() {
		let mut out = Vec::new();
		{
			let mut sink = BufferedSink::new(&mut out);
			sink.write_all(b"hi").unwrap();
			sink.finish().unwrap();
		}
		assert_eq!(out.len(), BUFFER_BLOCK_SIZE);
		assert_eq!(&out[..2], b"hi");
		assert!(out[2..].iter().all(|b| *b == 0));
	}
}
