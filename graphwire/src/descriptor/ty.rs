use std::io::{Read, Write};
use std::sync::Arc;

use derivative::Derivative;

use crate::descriptor::assembly::AssemblyDescriptor;
use crate::descriptor::field::FieldDescriptor;
use crate::error::Result;
use crate::primitive::{read_var_u64, write_var_u64, WireRead, WireWrite};

/// The built-in scalar kinds the primitive codec writes inline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PrimitiveKind {
	Unit,
	Bool,
	I8,
	U8,
	I16,
	U16,
	I32,
	U32,
	I64,
	U64,
	F32,
	F64,
	String,
	Guid,
}

/// The built-in collection shapes; these never require a structure
/// stamp unless `TreatCollectionAsUserObject` is set — see
/// [`TypeDescriptor::requires_structure_stamp`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CollectionKind {
	List,
	Map,
	Set,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeDescriptorKind {
	Primitive(PrimitiveKind),
	Collection(CollectionKind),
	UserObject,
}

/// A lightweight reference to a type, used before a full
/// [`TypeDescriptor`] is available — e.g. while reading a generic
/// instantiation's argument list off the stream, where each argument
/// only needs to be named, not fully resolved against the type cache.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum TypeRef {
	Concrete { assembly: String, full_name: String },
	Instantiated { base: Box<TypeRef>, args: Vec<TypeRef> },
}

impl TypeRef {
	pub fn of(descriptor: &TypeDescriptor) -> Self {
		if descriptor.generic_args.is_empty() {
			return TypeRef::Concrete {
				assembly: descriptor.assembly.assembly_qualified_name(),
				full_name: descriptor.full_name.clone(),
			};
		}
		TypeRef::Instantiated {
			base: Box::new(TypeRef::Concrete {
				assembly: descriptor.assembly.assembly_qualified_name(),
				full_name: descriptor.full_name.clone(),
			}),
			args: descriptor.generic_args.iter().map(|a| TypeRef::of(a)).collect(),
		}
	}
}

/// Wire encoding for a bare [`TypeRef`] (used inside field stamps,
/// where the declared field type is metadata only and need not share
/// the enclosing type's first-appearance id table).
pub fn write_type_ref(sink: &mut dyn Write, type_ref: &TypeRef) -> Result<()> {
	match type_ref {
		TypeRef::Concrete { assembly, full_name } => {
			false.write_to(sink)?;
			assembly.write_to(sink)?;
			full_name.write_to(sink)
		}
		TypeRef::Instantiated { base, args } => {
			true.write_to(sink)?;
			write_type_ref(sink, base)?;
			write_var_u64(sink, args.len() as u64)?;
			for arg in args {
				write_type_ref(sink, arg)?;
			}
			Ok(())
		}
	}
}

pub fn read_type_ref(source: &mut dyn Read) -> Result<TypeRef> {
	if bool::read_from(source)? {
		let base = Box::new(read_type_ref(source)?);
		let count = read_var_u64(source)? as usize;
		let mut args = Vec::with_capacity(count);
		for _ in 0..count {
			args.push(read_type_ref(source)?);
		}
		Ok(TypeRef::Instantiated { base, args })
	} else {
		let assembly = String::read_from(source)?;
		let full_name = String::read_from(source)?;
		Ok(TypeRef::Concrete { assembly, full_name })
	}
}

/// Names the crate gives the scalar primitive kinds on the wire; used
/// by both the writer (to name a primitive's type stamp) and the
/// reader (to recognise a field's declared type as an inline,
/// non-identity-tracked value rather than a [`crate::object::Link`]).
pub fn primitive_kind_by_name(name: &str) -> Option<PrimitiveKind> {
	Some(match name {
		"bool" => PrimitiveKind::Bool,
		"i8" => PrimitiveKind::I8,
		"u8" => PrimitiveKind::U8,
		"i16" => PrimitiveKind::I16,
		"u16" => PrimitiveKind::U16,
		"i32" => PrimitiveKind::I32,
		"u32" => PrimitiveKind::U32,
		"i64" => PrimitiveKind::I64,
		"u64" => PrimitiveKind::U64,
		"f32" => PrimitiveKind::F32,
		"f64" => PrimitiveKind::F64,
		"String" => PrimitiveKind::String,
		"Guid" => PrimitiveKind::Guid,
		_ => return None,
	})
}

impl TypeDescriptorKind {
	/// Infers a type's kind from its bare name, the way the reader must
	/// when reconstructing a stream-side type descriptor: the wire
	/// carries no separate kind tag, only the name the writer's own
	/// [`TypeDescriptorKind`] was derived from in the first place.
	pub fn name_of(full_name: &str) -> Self {
		if let Some(kind) = primitive_kind_by_name(full_name) {
			return TypeDescriptorKind::Primitive(kind);
		}
		match full_name {
			"GraphList" => TypeDescriptorKind::Collection(CollectionKind::List),
			"GraphMap" => TypeDescriptorKind::Collection(CollectionKind::Map),
			"GraphSet" => TypeDescriptorKind::Collection(CollectionKind::Set),
			_ => TypeDescriptorKind::UserObject,
		}
	}
}

impl WireWrite for TypeRef {
	fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
		write_type_ref(sink, self)
	}
}

impl WireRead for TypeRef {
	fn read_from(source: &mut dyn Read) -> Result<Self> {
		read_type_ref(source)
	}
}

/// Name, owning assembly, ordered generic arguments, base type and
/// ordered field list for a single type, in either of two states:
///
/// - *resolved-from-runtime*: built by a [`crate::object::GraphObject`]
///   impl (usually generated by `#[derive(GraphValue)]`) and memoized
///   in the process-wide cache the first time it is requested;
/// - *resolved-from-stream*: built while reading a type stamp, with
///   `fields` populated directly from the stamp's structure section
///   and no live Rust type backing it until the reader looks it up in
///   the cache by [`assembly_qualified_name`](Self::assembly_qualified_name).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TypeDescriptor {
	pub full_name: String,
	pub assembly: Arc<AssemblyDescriptor>,
	pub generic_args: Vec<Arc<TypeDescriptor>>,
	pub base_type: Option<Arc<TypeDescriptor>>,
	pub fields: Vec<FieldDescriptor>,
	pub kind: TypeDescriptorKind,
}

impl TypeDescriptor {
	/// Pure function of the descriptor tree; two descriptors are
	/// equal iff their assembly-qualified names are equal (invariant
	/// 6). Stable across resolved-from-runtime and
	/// resolved-from-stream instances describing the same type.
	pub fn assembly_qualified_name(&self) -> String {
		let mut name = self.full_name.clone();
		if !self.generic_args.is_empty() {
			name.push('[');
			for (i, arg) in self.generic_args.iter().enumerate() {
				if i > 0 {
					name.push(',');
				}
				name.push('[');
				name.push_str(&arg.assembly_qualified_name());
				name.push(']');
			}
			name.push(']');
		}
		format!("{name}, {}", self.assembly.assembly_qualified_name())
	}

	/// Only non-transient fields are written to the stream; this is
	/// the write-order the object writer iterates, and the order the
	/// stamp comparator's `cur.non_transient_fields` walk in §4.4
	/// refers to.
	pub fn non_transient_fields(&self) -> impl Iterator<Item = (usize, &FieldDescriptor)> {
		self.fields.iter().enumerate().filter(|(_, f)| !f.transient)
	}

	/// Base-first, declaration-order field layout, flattened from the
	/// base-type chain. This is the normative serialization order.
	pub fn declared_fields_base_first(&self) -> Vec<&FieldDescriptor> {
		let mut out = Vec::new();
		if let Some(base) = &self.base_type {
			out.extend(base.declared_fields_base_first());
		}
		out.extend(self.fields.iter());
		out
	}

	pub fn requires_structure_stamp(&self, treat_collections_as_user_object: bool) -> bool {
		match self.kind {
			TypeDescriptorKind::Primitive(_) => false,
			TypeDescriptorKind::Collection(_) => treat_collections_as_user_object,
			TypeDescriptorKind::UserObject => true,
		}
	}
}

impl PartialEq for TypeDescriptor {
	fn eq(&self, other: &Self) -> bool {
		self.assembly_qualified_name() == other.assembly_qualified_name()
	}
}

impl Eq for TypeDescriptor {}

impl std::hash::Hash for TypeDescriptor {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.assembly_qualified_name().hash(state)
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::*;

	fn core_assembly() -> Arc<AssemblyDescriptor> {
		Arc::new(AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::nil()).unwrap())
	}

	#[test]
	fn base_first_field_order() {
		let base = Arc::new(TypeDescriptor {
			full_name: "Base".into(),
			assembly: core_assembly(),
			generic_args: vec![],
			base_type: None,
			fields: vec![FieldDescriptor::new("Base", "x", TypeRef::Concrete {
				assembly: "Core".into(),
				full_name: "i32".into(),
			})],
			kind: TypeDescriptorKind::UserObject,
		});
		let derived = TypeDescriptor {
			full_name: "Derived".into(),
			assembly: core_assembly(),
			generic_args: vec![],
			base_type: Some(base),
			fields: vec![FieldDescriptor::new("Derived", "y", TypeRef::Concrete {
				assembly: "Core".into(),
				full_name: "i32".into(),
			})],
			kind: TypeDescriptorKind::UserObject,
		};
		let names: Vec<_> = derived.declared_fields_base_first().iter().map(|f| f.name.as_str()).collect();
		assert_eq!(names, vec!["x", "y"]);
	}
}
