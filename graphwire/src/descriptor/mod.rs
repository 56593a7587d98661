mod assembly;
mod field;
mod ty;

pub use assembly::AssemblyDescriptor;
pub use field::{FieldDescriptor, FieldDriftKind};
pub use ty::{
	primitive_kind_by_name, read_type_ref, write_type_ref, CollectionKind, PrimitiveKind, TypeDescriptor, TypeDescriptorKind, TypeRef,
};
