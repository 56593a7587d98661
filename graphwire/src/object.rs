//! The object-safe interface every participant in a serialized graph
//! implements, plus the `Rc<RefCell<_>>`-based handle used for
//! identity and cycles.
//!
//! A Rust struct has no nominal base-type chain the way a CLR type
//! does, so `#[derive(GraphValue)]` always produces a `base_type: None`
//! descriptor (documented as an Open Question resolution in
//! DESIGN.md); the comparator and wire format still carry a base-type
//! slot for descriptors built by hand or read off a foreign stream.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use crate::descriptor::TypeDescriptor;
use crate::error::Result;
use crate::reader::ObjectReader;
use crate::writer::ObjectWriter;

/// A participant in the graph: either a user type generated by
/// `#[derive(GraphValue)]`, a built-in collection
/// ([`crate::collections`]), or one of the primitive scalar wrappers
/// implemented in this module.
pub trait GraphObject: Any + Debug {
	/// The runtime type descriptor for *this* instance. Stable across
	/// calls and equal (by assembly-qualified name) for every
	/// instance of the same concrete type.
	fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor>;

	/// Writes the declared-order field at `field_index` (an index
	/// into `dyn_type_descriptor().fields`, restricted to
	/// non-transient fields) to the stream.
	fn write_field(&self, field_index: usize, writer: &mut ObjectWriter<'_>) -> Result<()>;

	/// Reads the stream-declared field mapped to runtime field
	/// `field_index` by the read plan.
	fn read_field(&mut self, field_index: usize, reader: &mut ObjectReader<'_>) -> Result<()>;

	/// Applies a `ConstructorInit` read-plan entry: no bytes are
	/// consumed, the field is (re-)initialized the way the type's own
	/// construction logic would.
	fn construct_field(&mut self, field_index: usize) -> Result<()>;

	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;

	/// Invoked exactly once per unique object per traversal, immediately
	/// before its body is written.
	fn on_before_serialize(&self) {}

	/// Invoked exactly once per unique object per traversal, immediately
	/// after its body is written.
	fn on_after_serialize(&self) {}

	/// Invoked exactly once per unique object per traversal, immediately
	/// after its read-plan entries have all been applied.
	fn on_after_deserialize(&mut self) {}

	/// Overridden by [`crate::collections`] wrapper types: the number of
	/// *records* the body writes (items for a list/set, key-value pairs
	/// for a map). `None` for anything that isn't a collection.
	fn collection_len(&self) -> Option<usize> {
		None
	}

	/// Overridden by collection wrapper types: the flattened list of
	/// child handles to write, in wire order (for a map, alternating
	/// key, value, key, value, …).
	fn collection_items(&self) -> Option<Vec<Handle>> {
		None
	}

	/// Overridden by collection wrapper types to append one decoded
	/// item (or, for a map, one decoded key/value in turn) during a
	/// read. Panics if called on a non-collection type.
	fn collection_push(&mut self, _item: Handle) {
		unreachable!("collection_push invoked on a non-collection GraphObject")
	}
}

/// Boxes `value` as a fresh [`Handle`], giving it its own distinct
/// pointer identity (two handles built from value-equal `value`s are
/// never the same identity, matching invariant 1 of the data model).
pub fn new_handle<T: GraphValue>(value: T) -> Handle {
	Rc::new(RefCell::new(value))
}

/// Sized counterpart implemented by every concrete participant type,
/// used to materialize a blank instance from the registry before its
/// fields are known: the reader allocates an uninitialized instance
/// without invoking any user-visible construction logic, then fills
/// fields in as the read plan directs.
pub trait GraphValue: GraphObject + Sized + 'static {
	fn new_blank() -> Self;
	fn static_type_descriptor() -> Arc<TypeDescriptor>;
}

/// Shared, interior-mutable handle to any graph participant. Identity
/// for the write-side identity table is the data address of this
/// allocation (`Rc::as_ptr`), not the value's own equality.
pub type Handle = Rc<RefCell<dyn GraphObject>>;

#[inline]
pub fn identity_of(handle: &Handle) -> *const () {
	Rc::as_ptr(handle) as *const ()
}

/// A typed reference to another participant in the graph. Fields that
/// should support sharing, cycles, or nullability use
/// `Link<T>`/`Option<Link<T>>`; plain value fields (`i32`, `String`,
/// …) are written inline with no identity tracking.
pub struct Link<T: GraphValue> {
	handle: Handle,
	_marker: PhantomData<T>,
}

impl<T: GraphValue> Link<T> {
	pub fn new(value: T) -> Self {
		Self { handle: Rc::new(RefCell::new(value)), _marker: PhantomData }
	}

	/// Wraps an already-type-erased handle. Panics in debug builds if
	/// `handle` does not actually hold a `T` — callers that received
	/// the handle from this crate's reader never hit that case.
	pub fn from_handle(handle: Handle) -> Self {
		debug_assert!(handle.borrow().as_any().is::<T>());
		Self { handle, _marker: PhantomData }
	}

	pub fn handle(&self) -> Handle {
		self.handle.clone()
	}

	pub fn borrow(&self) -> Ref<'_, T> {
		Ref::map(self.handle.borrow(), |o| o.as_any().downcast_ref::<T>().expect("Link<T> type mismatch"))
	}

	pub fn borrow_mut(&self) -> RefMut<'_, T> {
		RefMut::map(self.handle.borrow_mut(), |o| o.as_any_mut().downcast_mut::<T>().expect("Link<T> type mismatch"))
	}
}

impl<T: GraphValue> Clone for Link<T> {
	fn clone(&self) -> Self {
		Self { handle: self.handle.clone(), _marker: PhantomData }
	}
}

impl<T: GraphValue + Debug> Debug for Link<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(&*self.borrow(), f)
	}
}

/// The assembly every built-in type (scalars, `Guid`, and the
/// collection wrappers in [`crate::collections`]) stamps itself with.
/// There is no real compilation unit backing it; it exists only so
/// these types have *an* assembly-qualified name to be cached and
/// compared under.
pub(crate) fn builtin_assembly() -> Arc<crate::descriptor::AssemblyDescriptor> {
	use crate::descriptor::AssemblyDescriptor;
	use std::sync::OnceLock;
	static ASSEMBLY: OnceLock<Arc<AssemblyDescriptor>> = OnceLock::new();
	ASSEMBLY
		.get_or_init(|| {
			Arc::new(AssemblyDescriptor::new("graphwire", [0, 1, 0, 0], "", vec![], uuid::Uuid::nil()).expect("well-formed built-in assembly descriptor"))
		})
		.clone()
}

macro_rules! impl_primitive_graph_value {
	($ty:ty, $kind:ident) => {
		impl GraphObject for $ty {
			fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor> {
				<$ty as GraphValue>::static_type_descriptor()
			}

			fn write_field(&self, field_index: usize, writer: &mut ObjectWriter<'_>) -> Result<()> {
				debug_assert_eq!(field_index, 0);
				writer.write_primitive(self)
			}

			fn read_field(&mut self, field_index: usize, reader: &mut ObjectReader<'_>) -> Result<()> {
				debug_assert_eq!(field_index, 0);
				*self = reader.read_primitive()?;
				Ok(())
			}

			fn construct_field(&mut self, _field_index: usize) -> Result<()> {
				Err(crate::error::WireError::InvariantViolation(
					"primitive values have no constructor-recreated fields",
				))
			}

			fn as_any(&self) -> &dyn Any {
				self
			}

			fn as_any_mut(&mut self) -> &mut dyn Any {
				self
			}
		}

		impl GraphValue for $ty {
			fn new_blank() -> Self {
				Default::default()
			}

			fn static_type_descriptor() -> Arc<TypeDescriptor> {
				use crate::cache::TypeCache;
				use crate::descriptor::{PrimitiveKind, TypeDescriptorKind};
				TypeCache::global().get_or_insert(Arc::new(TypeDescriptor {
					full_name: stringify!($ty).to_string(),
					assembly: builtin_assembly(),
					generic_args: vec![],
					base_type: None,
					fields: vec![],
					kind: TypeDescriptorKind::Primitive(PrimitiveKind::$kind),
				}))
			}
		}
	};
}

impl_primitive_graph_value!(bool, Bool);
impl_primitive_graph_value!(i8, I8);
impl_primitive_graph_value!(u8, U8);
impl_primitive_graph_value!(i16, I16);
impl_primitive_graph_value!(u16, U16);
impl_primitive_graph_value!(i32, I32);
impl_primitive_graph_value!(u32, U32);
impl_primitive_graph_value!(i64, I64);
impl_primitive_graph_value!(u64, U64);
impl_primitive_graph_value!(f32, F32);
impl_primitive_graph_value!(f64, F64);
impl_primitive_graph_value!(String, String);

impl GraphObject for uuid::Uuid {
	fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor> {
		<uuid::Uuid as GraphValue>::static_type_descriptor()
	}

	fn write_field(&self, field_index: usize, writer: &mut ObjectWriter<'_>) -> Result<()> {
		debug_assert_eq!(field_index, 0);
		writer.write_primitive(self)
	}

	fn read_field(&mut self, field_index: usize, reader: &mut ObjectReader<'_>) -> Result<()> {
		debug_assert_eq!(field_index, 0);
		*self = reader.read_primitive()?;
		Ok(())
	}

	fn construct_field(&mut self, _field_index: usize) -> Result<()> {
		Err(crate::error::WireError::InvariantViolation("primitive values have no constructor-recreated fields"))
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

impl GraphValue for uuid::Uuid {
	fn new_blank() -> Self {
		uuid::Uuid::nil()
	}

	// The built-in macro names a primitive's wire type after its Rust
	// type name via `stringify!`; a GUID's wire name ("Guid") diverges
	// from its Rust name (`Uuid`), so it gets its own impl rather than
	// a macro invocation.
	fn static_type_descriptor() -> Arc<TypeDescriptor> {
		use crate::cache::TypeCache;
		use crate::descriptor::{PrimitiveKind, TypeDescriptorKind};
		TypeCache::global().get_or_insert(Arc::new(TypeDescriptor {
			full_name: "Guid".to_string(),
			assembly: builtin_assembly(),
			generic_args: vec![],
			base_type: None,
			fields: vec![],
			kind: TypeDescriptorKind::Primitive(PrimitiveKind::Guid),
		}))
	}
}
