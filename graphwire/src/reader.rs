//! The read-side counterpart of [`crate::writer`]: validates the
//! stream header, resolves type stamps against the process-wide
//! cache, consults the version-tolerance comparator, and dispatches to
//! per-type-kind body readers.

use std::collections::VecDeque;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;

use uuid::Uuid;

use crate::cache::TypeCache;
use crate::descriptor::{
	primitive_kind_by_name, AssemblyDescriptor, CollectionKind, FieldDescriptor, PrimitiveKind, TypeDescriptor, TypeDescriptorKind,
	TypeRef,
};
use crate::error::{Result, WireError};
use crate::identity::ReadIdentityTable;
use crate::object::Handle;
use crate::primitive::{read_var_u64, BufferedSource, StreamId, WireRead};
use crate::registry::{DeserializationMethod, Registry};
use crate::stamp::{ReadPlan, ReadPlanEntry, StampComparator};
use crate::writer::{END_OF_STREAM_MARKER, MAGIC, STREAM_VERSION};

/// Adds lookahead to an arbitrary [`Read`] so
/// [`ObjectReader::is_exhausted`] can answer "is there another
/// operation on this stream" without permanently consuming what it
/// peeked — a small pending queue rather than a single byte, since the
/// buffered end-of-stream check (see [`ObjectReader::is_exhausted`])
/// needs to peek an entire varint before deciding whether to hand it
/// back.
struct PushbackReader<'a> {
	inner: Box<dyn Read + 'a>,
	pending: VecDeque<u8>,
}

impl<'a> PushbackReader<'a> {
	fn new(inner: Box<dyn Read + 'a>) -> Self {
		Self { inner, pending: VecDeque::new() }
	}

	fn is_exhausted(&mut self) -> std::io::Result<bool> {
		if !self.pending.is_empty() {
			return Ok(false);
		}
		let mut byte = [0u8; 1];
		let read = self.inner.read(&mut byte)?;
		if read == 0 {
			return Ok(true);
		}
		self.pending.push_back(byte[0]);
		Ok(false)
	}

	/// Reads and returns one byte, without affecting `pending` beyond
	/// draining it first — used by the buffered end-of-stream peek to
	/// consume bytes it may need to hand back via [`Self::push_back`].
	fn read_one(&mut self) -> std::io::Result<Option<u8>> {
		let mut byte = [0u8; 1];
		let read = self.read(&mut byte)?;
		if read == 0 {
			return Ok(None);
		}
		Ok(Some(byte[0]))
	}

	/// Returns bytes previously taken via [`Self::read_one`] to the
	/// front of the queue, in the order they were originally read.
	fn push_back(&mut self, bytes: &[u8]) {
		for &byte in bytes.iter().rev() {
			self.pending.push_front(byte);
		}
	}
}

impl<'a> Read for PushbackReader<'a> {
	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		if !self.pending.is_empty() {
			let n = self.pending.len().min(buf.len());
			for slot in buf[..n].iter_mut() {
				*slot = self.pending.pop_front().expect("checked non-empty above");
			}
			return Ok(n);
		}
		self.inner.read(buf)
	}
}

/// A type stamp resolved against the cache, paired with the read plan
/// the comparator produced for it. Cheap to clone: every field is
/// either an `Arc` or an `Rc`.
#[derive(Clone)]
struct ResolvedType {
	cur: Arc<TypeDescriptor>,
	plan: Rc<ReadPlan>,
}

/// The object-reader half of an open-stream session. Mirrors
/// [`crate::writer::ObjectWriter`] field for field: the read-side
/// identity table and the dense first-appearance tables for
/// assemblies and types persist across consecutive
/// [`deserialize`](Self::deserialize) calls on the same stream.
pub struct ObjectReader<'a> {
	source: PushbackReader<'a>,
	registry: Rc<Registry>,
	identities: ReadIdentityTable,
	types: Vec<ResolvedType>,
	assemblies: Vec<Arc<AssemblyDescriptor>>,
	/// Latches once `is_exhausted` recognises `END_OF_STREAM_MARKER`
	/// under buffering, so a repeated call reads the padding zeros that
	/// follow the marker as what they are instead of re-parsing them as
	/// a (false) next `StreamId`.
	buffered_end_reached: bool,
}

impl<'a> ObjectReader<'a> {
	/// Opens a session on `source`, validating the 5-byte header
	/// written by [`crate::writer::ObjectWriter::open`]. The header's
	/// own preserve-across-operations flag (not the registry's
	/// settings, which could differ from whatever wrote this stream)
	/// governs whether this reader's identity table survives between
	/// `deserialize` calls. `Settings::use_buffering` wraps `source` in
	/// a [`BufferedSource`] so a following open-stream operation
	/// resumes at the block boundary [`crate::writer::ObjectWriter`]
	/// padded out to on close. `source` need only outlive the reader
	/// itself, not `'static` — a reader built over a borrowed `&[u8]`
	/// is the normal way to read back an in-memory buffer.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn open(source: impl Read + 'a, registry: Rc<Registry>) -> Result<Self> {
		let boxed: Box<dyn Read + 'a> = if registry.settings.use_buffering {
			Box::new(BufferedSource::new(source))
		} else {
			Box::new(source)
		};
		let mut source = PushbackReader::new(boxed);
		let mut magic = [0u8; 3];
		source.read_exact(&mut magic)?;
		if magic != MAGIC {
			return Err(WireError::WrongMagic(magic));
		}
		let version = u8::read_from(&mut source)?;
		if version != STREAM_VERSION {
			return Err(WireError::WrongVersion(version));
		}
		let preserve_across_operations = bool::read_from(&mut source)?;

		Ok(Self {
			source,
			registry,
			identities: ReadIdentityTable::new(preserve_across_operations),
			types: Vec::new(),
			assemblies: Vec::new(),
			buffered_end_reached: false,
		})
	}

	/// `true` once every value the writer wrote has been consumed.
	/// Never consumes a byte on a `false` answer.
	///
	/// Unbuffered, this is a plain physical-EOF peek. Buffered, the
	/// writer's final block is padded with zero bytes up to a block
	/// boundary (see `BufferedSink::finish`), and `StreamId::NULL` —
	/// zero — is itself a legitimate value (a null root), so presence
	/// of more bytes can't tell padding from a real next record. A
	/// buffered `ObjectWriter::close` writes `END_OF_STREAM_MARKER`
	/// right before that padding instead, and this peeks for it
	/// specifically, pushing the bytes back if they turn out to be a
	/// real id.
	pub fn is_exhausted(&mut self) -> Result<bool> {
		if !self.registry.settings.use_buffering {
			return Ok(self.source.is_exhausted()?);
		}
		if self.buffered_end_reached {
			return Ok(true);
		}

		let mut consumed = Vec::new();
		let mut value: u64 = 0;
		let mut shift = 0u32;
		loop {
			if shift >= 70 {
				return Err(WireError::StreamCorrupted("variable-length integer too long"));
			}
			let Some(byte) = self.source.read_one()? else {
				// Physical EOF with no marker seen — an unbuffered-style
				// stream that never had one, or a truncated one either way.
				self.source.push_back(&consumed);
				return Ok(consumed.is_empty());
			};
			consumed.push(byte);
			value |= u64::from(byte & 0x7F) << shift;
			if byte & 0x80 == 0 {
				break;
			}
			shift += 7;
		}

		if value == END_OF_STREAM_MARKER.0 as u64 {
			self.buffered_end_reached = true;
			return Ok(true);
		}
		self.source.push_back(&consumed);
		Ok(false)
	}

	/// Reads one root value and everything transitively reachable from
	/// it, mirroring [`crate::writer::ObjectWriter::serialize`]. With
	/// `ReferencePreservation::DoNotPreserve`, the writer discarded its
	/// identity table after every call, so this reader must do the
	/// same or its dense ids would drift out of sync with the stream.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn deserialize(&mut self) -> Result<Option<Handle>> {
		let value = self.read_value()?;
		self.identities.reset_for_next_operation();
		Ok(value)
	}

	/// Reads a single value's `object_id` and, on first sight, its
	/// `type_id | body`.
	pub fn read_value(&mut self) -> Result<Option<Handle>> {
		let id = StreamId::read_from(&mut self.source)?;
		if id.is_null() {
			return Ok(None);
		}

		if self.identities.is_filled(id.0) {
			return Ok(self.identities.get(id.0));
		}

		let reserved = self.identities.reserve();
		if reserved != id.0 {
			return Err(WireError::StreamCorrupted("object id seen out of allocation order"));
		}

		let resolved = self.read_type_reference()?;
		let blank = self.instantiate_blank(&resolved.cur)?;
		self.identities.fill(id.0, blank.clone())?;

		self.read_body(&blank, &resolved)?;
		blank.borrow_mut().on_after_deserialize();

		let final_handle = match self.registry.try_restore_from_surrogate(&resolved.cur, blank.clone())? {
			Some(original) => original,
			None => blank,
		};
		self.identities.fill(id.0, final_handle.clone())?;
		Ok(Some(final_handle))
	}

	/// Reads a value known to carry no identity of its own (a plain
	/// struct field, not a [`crate::object::Link`]).
	pub fn read_primitive<T: WireRead>(&mut self) -> Result<T> {
		T::read_from(&mut self.source)
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn read_type_reference(&mut self) -> Result<ResolvedType> {
		let type_id = read_var_u64(&mut self.source)? as usize;
		if let Some(resolved) = self.types.get(type_id) {
			return Ok(resolved.clone());
		}
		if type_id != self.types.len() {
			return Err(WireError::StreamCorrupted("type id seen out of allocation order"));
		}

		let assembly = self.read_assembly_reference()?;
		let full_name = String::read_from(&mut self.source)?;

		let generic_arg_count = read_var_u64(&mut self.source)? as usize;
		let mut generic_args = Vec::with_capacity(generic_arg_count);
		for _ in 0..generic_arg_count {
			generic_args.push(self.read_type_reference()?.cur);
		}

		let has_structure_stamp = bool::read_from(&mut self.source)?;
		let (base_type, fields) = if has_structure_stamp { self.read_structure_stamp()? } else { (None, Vec::new()) };

		let kind = TypeDescriptorKind::name_of(&full_name);
		let prev = Arc::new(TypeDescriptor { full_name, assembly, generic_args, base_type, fields, kind });

		let aqn = prev.assembly_qualified_name();
		let cur = TypeCache::global().get(&aqn).ok_or_else(|| WireError::AssemblyResolveFailure(aqn))?;
		let plan = StampComparator::compare(&prev, &cur, self.registry.settings.version_tolerance)?;

		let resolved = ResolvedType { cur, plan: Rc::new(plan) };
		self.types.push(resolved.clone());
		Ok(resolved)
	}

	fn read_structure_stamp(&mut self) -> Result<(Option<Arc<TypeDescriptor>>, Vec<FieldDescriptor>)> {
		let base_type = if bool::read_from(&mut self.source)? { Some(self.read_type_reference()?.cur) } else { None };

		let field_count = read_var_u64(&mut self.source)? as usize;
		let mut fields = Vec::with_capacity(field_count);
		for _ in 0..field_count {
			let declaring_type = String::read_from(&mut self.source)?;
			let name = String::read_from(&mut self.source)?;
			let field_type = TypeRef::read_from(&mut self.source)?;
			let transient = bool::read_from(&mut self.source)?;
			let constructor_recreated = bool::read_from(&mut self.source)?;
			let by_reference = bool::read_from(&mut self.source)?;
			fields.push(FieldDescriptor { declaring_type, name, field_type, transient, constructor_recreated, by_reference });
		}
		Ok((base_type, fields))
	}

	fn read_assembly_reference(&mut self) -> Result<Arc<AssemblyDescriptor>> {
		let assembly_id = read_var_u64(&mut self.source)? as usize;
		if let Some(assembly) = self.assemblies.get(assembly_id) {
			return Ok(assembly.clone());
		}
		if assembly_id != self.assemblies.len() {
			return Err(WireError::StreamCorrupted("assembly id seen out of allocation order"));
		}

		let name = String::read_from(&mut self.source)?;
		let mut version = [0i32; 4];
		for part in version.iter_mut() {
			*part = i32::read_from(&mut self.source)?;
		}
		let culture = String::read_from(&mut self.source)?;
		let token_len = u8::read_from(&mut self.source)? as usize;
		let mut token = vec![0u8; token_len];
		self.source.read_exact(&mut token)?;
		let module_guid = Uuid::read_from(&mut self.source)?;

		let assembly = Arc::new(AssemblyDescriptor::new(name, version, culture, token, module_guid)?);
		self.assemblies.push(assembly.clone());
		Ok(assembly)
	}

	fn instantiate_blank(&self, ty: &Arc<TypeDescriptor>) -> Result<Handle> {
		match ty.kind {
			TypeDescriptorKind::Primitive(kind) => Ok(instantiate_primitive_blank(kind)),
			TypeDescriptorKind::Collection(_) | TypeDescriptorKind::UserObject => {
				let aqn = ty.assembly_qualified_name();
				self.registry.blank_factory_for(&aqn).ok_or(WireError::AssemblyResolveFailure(aqn))
			}
		}
	}

	fn read_body(&mut self, handle: &Handle, resolved: &ResolvedType) -> Result<()> {
		match resolved.cur.kind {
			TypeDescriptorKind::Primitive(_) => handle.borrow_mut().read_field(0, self),
			TypeDescriptorKind::Collection(kind) => self.read_collection_body(handle, kind),
			TypeDescriptorKind::UserObject => {
				let plan = resolved.plan.clone();
				for entry in &plan.0 {
					match entry {
						ReadPlanEntry::Read { field_index } => {
							let field_index = self.resolve_field_index(&resolved.cur, *field_index);
							handle.borrow_mut().read_field(field_index, self)?
						}
						ReadPlanEntry::Skip { field_type, by_reference, .. } => self.skip_field(field_type, *by_reference)?,
						ReadPlanEntry::ConstructorInit { field_index } => {
							let field_index = self.resolve_field_index(&resolved.cur, *field_index);
							handle.borrow_mut().construct_field(field_index)?
						}
					}
				}
				Ok(())
			}
		}
	}

	/// `Generated` dispatches straight to the index the comparator
	/// already computed. `Reflection` re-derives the same index by
	/// matching field *names* against the runtime descriptor, paying
	/// a string-comparison cost the setting exists to let callers
	/// opt out of, even though both paths end up calling the same
	/// [`crate::object::GraphObject::read_field`].
	fn resolve_field_index(&self, ty: &Arc<TypeDescriptor>, field_index: usize) -> usize {
		match self.registry.settings.deserialization_method {
			DeserializationMethod::Generated => field_index,
			DeserializationMethod::Reflection => {
				let name = &ty.fields[field_index].name;
				ty.fields.iter().position(|f| &f.name == name).unwrap_or(field_index)
			}
		}
	}

	fn read_collection_body(&mut self, handle: &Handle, kind: CollectionKind) -> Result<()> {
		let record_count = read_var_u64(&mut self.source)? as usize;
		let item_count = match kind {
			CollectionKind::Map => record_count * 2,
			CollectionKind::List | CollectionKind::Set => record_count,
		};
		for _ in 0..item_count {
			let item = self.read_value()?.ok_or(WireError::StreamCorrupted("collection element was null"))?;
			handle.borrow_mut().collection_push(item);
		}
		Ok(())
	}

	/// Discards one field's worth of bytes without assigning it
	/// anywhere. A by-reference field is read exactly like any other
	/// value, including identity allocation — a later back reference on
	/// the stream may still point at it — its result is just dropped.
	fn skip_field(&mut self, field_type: &TypeRef, by_reference: bool) -> Result<()> {
		if by_reference {
			self.read_value()?;
			return Ok(());
		}

		let TypeRef::Concrete { full_name, .. } = field_type else {
			return Err(WireError::StreamCorrupted("non-reference field had a non-primitive declared type"));
		};
		let kind = primitive_kind_by_name(full_name)
			.ok_or(WireError::StreamCorrupted("non-reference field had an unrecognised primitive type"))?;
		self.skip_primitive(kind)
	}

	fn skip_primitive(&mut self, kind: PrimitiveKind) -> Result<()> {
		match kind {
			PrimitiveKind::Unit => Ok(()),
			PrimitiveKind::Bool => bool::read_from(&mut self.source).map(drop),
			PrimitiveKind::I8 => i8::read_from(&mut self.source).map(drop),
			PrimitiveKind::U8 => u8::read_from(&mut self.source).map(drop),
			PrimitiveKind::I16 => i16::read_from(&mut self.source).map(drop),
			PrimitiveKind::U16 => u16::read_from(&mut self.source).map(drop),
			PrimitiveKind::I32 => i32::read_from(&mut self.source).map(drop),
			PrimitiveKind::U32 => u32::read_from(&mut self.source).map(drop),
			PrimitiveKind::I64 => i64::read_from(&mut self.source).map(drop),
			PrimitiveKind::U64 => u64::read_from(&mut self.source).map(drop),
			PrimitiveKind::F32 => f32::read_from(&mut self.source).map(drop),
			PrimitiveKind::F64 => f64::read_from(&mut self.source).map(drop),
			PrimitiveKind::String => String::read_from(&mut self.source).map(drop),
			PrimitiveKind::Guid => Uuid::read_from(&mut self.source).map(drop),
		}
	}
}

fn instantiate_primitive_blank(kind: PrimitiveKind) -> Handle {
	use crate::object::new_handle;
	match kind {
		PrimitiveKind::Unit => unreachable!("PrimitiveKind::Unit never appears as a standalone value on the stream"),
		PrimitiveKind::Bool => new_handle(bool::default()),
		PrimitiveKind::I8 => new_handle(i8::default()),
		PrimitiveKind::U8 => new_handle(u8::default()),
		PrimitiveKind::I16 => new_handle(i16::default()),
		PrimitiveKind::U16 => new_handle(u16::default()),
		PrimitiveKind::I32 => new_handle(i32::default()),
		PrimitiveKind::U32 => new_handle(u32::default()),
		PrimitiveKind::I64 => new_handle(i64::default()),
		PrimitiveKind::U64 => new_handle(u64::default()),
		PrimitiveKind::F32 => new_handle(f32::default()),
		PrimitiveKind::F64 => new_handle(f64::default()),
		PrimitiveKind::String => new_handle(String::default()),
		PrimitiveKind::Guid => new_handle(Uuid::nil()),
	}
}

#[cfg(test)]
mod tests {
	use crate::registry::{Registry, Settings};
	use crate::writer::ObjectWriter;

	use super::*;

	#[test]
	fn header_round_trips() {
		let registry = Registry::new(Settings::default());
		let mut out = Vec::new();
		{
			let writer = ObjectWriter::open(&mut out, registry.clone()).unwrap();
			drop(writer);
		}
		let reader = ObjectReader::open(out.as_slice(), registry).unwrap();
		drop(reader);
	}

	#[test]
	fn wrong_magic_is_rejected() {
		let registry = Registry::new(Settings::default());
		let bytes = [0xffu8; 5];
		let err = ObjectReader::open(&bytes[..], registry).unwrap_err();
		assert!(matches!(err, WireError::WrongMagic(_)));
	}

	#[test]
	fn primitive_root_round_trips() {
		let registry = Registry::new(Settings::default());
		let mut out = Vec::new();
		{
			let mut writer = ObjectWriter::open(&mut out, registry.clone()).unwrap();
			let value: Handle = crate::object::new_handle(String::from("hello"));
			writer.serialize(Some(value)).unwrap();
		}

		let mut reader = ObjectReader::open(out.as_slice(), registry).unwrap();
		let value = reader.deserialize().unwrap().expect("root was not null");
		let value = value.borrow();
		let value = value.as_any().downcast_ref::<String>().unwrap();
		assert_eq!(value, "hello");
	}

	#[test]
	fn null_root_round_trips() {
		let registry = Registry::new(Settings::default());
		let mut out = Vec::new();
		{
			let mut writer = ObjectWriter::open(&mut out, registry.clone()).unwrap();
			writer.serialize(None).unwrap();
		}

		let mut reader = ObjectReader::open(out.as_slice(), registry).unwrap();
		assert!(reader.deserialize().unwrap().is_none());
	}
}
