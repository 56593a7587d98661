use crate::descriptor::ty::TypeRef;

/// Declaring-type name, field name, field type, transience and
/// constructor-recreation flags. Created during type stamping (either
/// by the derive macro, for runtime-resolved types, or by the reader
/// while parsing a structure stamp).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FieldDescriptor {
	pub declaring_type: String,
	pub name: String,
	pub field_type: TypeRef,
	pub transient: bool,
	pub constructor_recreated: bool,
	/// `true` for `Link<T>`/`Option<Link<T>>` fields, written through
	/// [`crate::writer::ObjectWriter::write_value`] with their own
	/// identity; `false` for plain value fields written inline through
	/// [`crate::writer::ObjectWriter::write_primitive`]. Consulted only
	/// when a read plan skips the field: the two wire shapes differ, so
	/// skipping needs to know which one to consume.
	pub by_reference: bool,
}

impl FieldDescriptor {
	pub fn new(declaring_type: impl Into<String>, name: impl Into<String>, field_type: TypeRef) -> Self {
		Self {
			declaring_type: declaring_type.into(),
			name: name.into(),
			field_type,
			transient: false,
			constructor_recreated: false,
			by_reference: false,
		}
	}

	pub fn transient(mut self) -> Self {
		self.transient = true;
		self
	}

	pub fn constructor_recreated(mut self) -> Self {
		self.constructor_recreated = true;
		self
	}

	pub fn by_reference(mut self) -> Self {
		self.by_reference = true;
		self
	}
}

/// The kind of schema drift the stamp comparator detected for a
/// single field, carried by [`crate::error::WireError::TypeStructureChanged`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FieldDriftKind {
	Added,
	Removed,
	TypeChanged,
	BaseTypeChanged,
	AssemblyVersionChanged,
	ModuleGuidChanged,
}
