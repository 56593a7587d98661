//! Drives a single traversal (or, across many calls on the same open
//! stream, many traversals sharing identity and type tables):
//! consults surrogates, allocates identities, writes type stamps on
//! first sight, and dispatches to per-type-kind body emitters.

use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::descriptor::{AssemblyDescriptor, TypeDescriptor, TypeDescriptorKind};
use crate::error::Result;
use crate::identity::WriteIdentityTable;
use crate::object::Handle;
use crate::primitive::{write_var_u64, BufferedSink, StreamId, WireWrite};
use crate::registry::{Registry, SerializationMethod};

pub const MAGIC: [u8; 3] = [0x32, 0x66, 0x34];
pub const STREAM_VERSION: u8 = 7;

/// Written as one last `StreamId` immediately before
/// [`BufferedSink::finish`] pads the final block, so a buffered
/// reader's `ObjectReader::is_exhausted` has an unambiguous boundary
/// to stop at. Padding bytes are zero, and `StreamId::NULL` (zero) is
/// itself a legitimate value on the wire — a null root — so byte
/// content alone cannot tell a real next record from padding once
/// buffering rounds the stream up to a block boundary.
pub(crate) const END_OF_STREAM_MARKER: StreamId = StreamId(u32::MAX);

enum WriterState {
	Idle,
	Open,
}

/// Either a plain sink or one block-buffered per `Settings::use_buffering`.
/// Kept as an enum rather than always boxing a
/// [`BufferedSink`] because [`BufferedSink::finish`] consumes `self` by
/// value to pad and flush the final block, which a bare `Box<dyn Write>`
/// could never expose.
enum Sink<'a> {
	Plain(Box<dyn Write + 'a>),
	Buffered(BufferedSink<Box<dyn Write + 'a>>),
}

impl<'a> Write for Sink<'a> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		match self {
			Sink::Plain(w) => w.write(buf),
			Sink::Buffered(w) => w.write(buf),
		}
	}

	fn flush(&mut self) -> std::io::Result<()> {
		match self {
			Sink::Plain(w) => w.flush(),
			Sink::Buffered(w) => w.flush(),
		}
	}
}

/// The object-writer half of an open-stream session. Owns the sink,
/// the write-side identity table, and the dense first-appearance id
/// tables for assemblies and types — all of which persist across
/// consecutive [`serialize`](Self::serialize) calls made on the same
/// open stream.
pub struct ObjectWriter<'a> {
	sink: Sink<'a>,
	registry: Rc<Registry>,
	identities: WriteIdentityTable,
	type_ids: FxHashMap<String, u32>,
	next_type_id: u32,
	assembly_ids: FxHashMap<String, u32>,
	next_assembly_id: u32,
	state: WriterState,
}

impl<'a> ObjectWriter<'a> {
	/// Opens a session on `sink`, writing the 5-byte stream header
	/// immediately — the same five bytes regardless of the graph that
	/// follows. `sink` need only
	/// outlive the writer itself, not `'static` — a writer built over a
	/// borrowed `&mut Vec<u8>` is the normal way to capture its output.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn open(sink: impl Write + 'a, registry: Rc<Registry>) -> Result<Self> {
		let boxed: Box<dyn Write + 'a> = Box::new(sink);
		let sink = if registry.settings.use_buffering { Sink::Buffered(BufferedSink::new(boxed)) } else { Sink::Plain(boxed) };
		let mut writer = Self {
			sink,
			registry: registry.clone(),
			identities: WriteIdentityTable::new(registry.settings.reference_preservation),
			type_ids: FxHashMap::default(),
			next_type_id: 0,
			assembly_ids: FxHashMap::default(),
			next_assembly_id: 0,
			state: WriterState::Idle,
		};
		writer.write_header()?;
		writer.state = WriterState::Open;
		Ok(writer)
	}

	fn write_header(&mut self) -> Result<()> {
		self.sink.write_all(&MAGIC)?;
		STREAM_VERSION.write_to(&mut self.sink)?;
		let preserve_flag = self.registry.settings.reference_preservation.spans_operations();
		preserve_flag.write_to(&mut self.sink)?;
		Ok(())
	}

	/// Writes one root value and everything transitively reachable
	/// from it. With `ReferencePreservation::DoNotPreserve`, the
	/// identity table is discarded afterwards, so a later call re-stamps
	/// every object it sees again.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn serialize(&mut self, root: Option<Handle>) -> Result<()> {
		self.write_value(root)?;
		self.identities.reset_for_next_operation();
		Ok(())
	}

	/// Closes the stream, padding and flushing the final block when
	/// `Settings::use_buffering` is set. A writer dropped without
	/// calling this leaves whatever partial block `BufferedSink`
	/// accumulated unflushed — callers that enabled buffering must
	/// call it to see their last bytes reach the underlying sink.
	///
	/// When buffering is enabled this also writes
	/// [`END_OF_STREAM_MARKER`] before the padding, so the reader can
	/// tell the two apart.
	pub fn close(mut self) -> Result<()> {
		if matches!(self.sink, Sink::Buffered(_)) {
			END_OF_STREAM_MARKER.write_to(&mut self.sink)?;
		}
		match self.sink {
			Sink::Plain(mut w) => w.flush().map_err(Into::into),
			Sink::Buffered(w) => w.finish().map(drop),
		}
	}

	/// Writes a single value's `object_id` and, on first sight, its
	/// `type_id | body`.
	pub fn write_value(&mut self, value: Option<Handle>) -> Result<()> {
		let Some(handle) = value else {
			return StreamId::NULL.write_to(&mut self.sink);
		};

		let ty = handle.borrow().dyn_type_descriptor();
		if let Some(surrogate) = self.registry.try_substitute_with_surrogate(&ty, handle.clone())? {
			return self.write_value(Some(surrogate));
		}

		if let Some(existing) = self.identities.existing_id(&handle) {
			return StreamId(existing).write_to(&mut self.sink);
		}

		let id = self.identities.allocate(&handle);
		StreamId(id).write_to(&mut self.sink)?;
		self.write_type_reference(&ty)?;

		handle.borrow().on_before_serialize();
		self.write_body(&handle, &ty)?;
		handle.borrow().on_after_serialize();
		Ok(())
	}

	/// Writes a value known to carry no identity of its own (a plain
	/// struct field, not a [`crate::object::Link`]).
	pub fn write_primitive<T: WireWrite>(&mut self, value: &T) -> Result<()> {
		value.write_to(&mut self.sink)
	}

	fn write_type_reference(&mut self, ty: &Arc<TypeDescriptor>) -> Result<()> {
		let key = ty.assembly_qualified_name();
		if let Some(&id) = self.type_ids.get(&key) {
			return write_var_u64(&mut self.sink, id as u64);
		}

		let id = self.next_type_id;
		self.next_type_id += 1;
		self.type_ids.insert(key, id);
		write_var_u64(&mut self.sink, id as u64)?;

		self.write_assembly_reference(&ty.assembly)?;
		ty.full_name.write_to(&mut self.sink)?;

		write_var_u64(&mut self.sink, ty.generic_args.len() as u64)?;
		for arg in &ty.generic_args {
			// Invariant 5: generic arguments are stamped before the
			// enclosing instantiation's own stamp completes.
			self.write_type_reference(arg)?;
		}

		let needs_structure_stamp = ty.requires_structure_stamp(self.registry.settings.treat_collection_as_user_object);
		needs_structure_stamp.write_to(&mut self.sink)?;
		if needs_structure_stamp {
			self.write_structure_stamp(ty)?;
		}
		Ok(())
	}

	fn write_structure_stamp(&mut self, ty: &TypeDescriptor) -> Result<()> {
		match &ty.base_type {
			Some(base) => {
				true.write_to(&mut self.sink)?;
				self.write_type_reference(base)?;
			}
			None => false.write_to(&mut self.sink)?,
		}

		write_var_u64(&mut self.sink, ty.fields.len() as u64)?;
		for field in &ty.fields {
			field.declaring_type.write_to(&mut self.sink)?;
			field.name.write_to(&mut self.sink)?;
			field.field_type.write_to(&mut self.sink)?;
			field.transient.write_to(&mut self.sink)?;
			field.constructor_recreated.write_to(&mut self.sink)?;
			field.by_reference.write_to(&mut self.sink)?;
		}
		Ok(())
	}

	fn write_assembly_reference(&mut self, assembly: &AssemblyDescriptor) -> Result<()> {
		let key = assembly.assembly_qualified_name();
		if let Some(&id) = self.assembly_ids.get(&key) {
			return write_var_u64(&mut self.sink, id as u64);
		}

		let id = self.next_assembly_id;
		self.next_assembly_id += 1;
		self.assembly_ids.insert(key, id);
		write_var_u64(&mut self.sink, id as u64)?;

		assembly.name.write_to(&mut self.sink)?;
		for part in assembly.version {
			part.write_to(&mut self.sink)?;
		}
		assembly.culture.write_to(&mut self.sink)?;
		(assembly.public_key_token.len() as u8).write_to(&mut self.sink)?;
		self.sink.write_all(&assembly.public_key_token)?;
		assembly.module_guid.write_to(&mut self.sink)?;
		Ok(())
	}

	fn write_body(&mut self, handle: &Handle, ty: &Arc<TypeDescriptor>) -> Result<()> {
		match ty.kind {
			TypeDescriptorKind::Primitive(_) => handle.borrow().write_field(0, self),
			TypeDescriptorKind::Collection(_) => self.write_collection_body(handle),
			TypeDescriptorKind::UserObject => {
				for (field_index, _) in ty.non_transient_fields() {
					let field_index = self.resolve_field_index(ty, field_index);
					handle.borrow().write_field(field_index, self)?;
				}
				Ok(())
			}
		}
	}

	/// Write-side mirror of [`crate::reader::ObjectReader`]'s field
	/// index resolution: `Generated` uses the index
	/// [`TypeDescriptor::non_transient_fields`] already produced,
	/// `Reflection` re-derives it from the field's own name first.
	fn resolve_field_index(&self, ty: &Arc<TypeDescriptor>, field_index: usize) -> usize {
		match self.registry.settings.serialization_method {
			SerializationMethod::Generated => field_index,
			SerializationMethod::Reflection => {
				let name = &ty.fields[field_index].name;
				ty.fields.iter().position(|f| &f.name == name).unwrap_or(field_index)
			}
		}
	}

	fn write_collection_body(&mut self, handle: &Handle) -> Result<()> {
		let record_count = handle.borrow().collection_len().expect("collection type must implement collection_len");
		let items = handle.borrow().collection_items().expect("collection type must implement collection_items");
		write_var_u64(&mut self.sink, record_count as u64)?;
		for item in items {
			self.write_value(Some(item))?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::object::new_handle;
	use crate::registry::{Registry, Settings};

	use super::*;

	#[test]
	fn header_is_written_immediately_on_open() {
		let registry = Registry::new(Settings::default());
		let mut out = Vec::new();
		{
			let writer = ObjectWriter::open(&mut out, registry).unwrap();
			drop(writer);
		}
		assert_eq!(&out[..3], &MAGIC);
		assert_eq!(out[3], STREAM_VERSION);
	}

	#[test]
	fn primitive_root_round_trips_through_the_write_path() {
		let registry = Registry::new(Settings::default());
		let mut out = Vec::new();
		{
			let mut writer = ObjectWriter::open(&mut out, registry).unwrap();
			let value: Handle = new_handle(String::from("One"));
			writer.serialize(Some(value)).unwrap();
		}
		assert!(out.len() > 5);
	}
}
