//! Settings surface and the per-session registry that owns the two
//! [`SwapTable`]s and the blank-instance factories used to materialize
//! types discovered on the stream.
//!
//! An `ObjectWriter`/`ObjectReader` borrows a `Registry` (via `Rc`, not
//! a lifetime parameter, so callers can freely pass the same registry
//! across many open-stream operations without fighting the borrow
//! checker) for the duration of one open-stream session, so identity
//! and type tables persist across every operation performed on it.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use dashmap::DashMap;

use crate::descriptor::TypeDescriptor;
use crate::error::{Result, WireError};
use crate::object::{GraphValue, Handle};
use crate::swap::SwapTable;

/// Identity behavior across a traversal (and, with `UseWeakReference`
/// or `Preserve`, across open-stream operations).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ReferencePreservation {
	DoNotPreserve,
	UseWeakReference,
	#[default]
	Preserve,
}

impl ReferencePreservation {
	pub fn spans_operations(self) -> bool {
		!matches!(self, Self::DoNotPreserve)
	}

	pub fn is_weak(self) -> bool {
		matches!(self, Self::UseWeakReference)
	}
}

/// Choice between the interpreted reflection-style walk and the
/// derive-generated monomorphized walker. Both are fully implemented:
/// `Generated` dispatches straight to the positional field index,
/// `Reflection` resolves the index by field name against the runtime
/// [`TypeDescriptor`] first, the slower path a hand-rolled
/// `BinaryFormatter`-alike would take before JIT-emitting specialized
/// code.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum SerializationMethod {
	Reflection,
	#[default]
	Generated,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum DeserializationMethod {
	Reflection,
	#[default]
	Generated,
}

bitflags! {
	/// Schema-drift permissions consulted by [`crate::stamp::StampComparator`].
	#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
	pub struct VersionTolerance: u8 {
		const ALLOW_GUID_CHANGE = 1 << 0;
		const ALLOW_ASSEMBLY_VERSION_CHANGE = 1 << 1;
		const ALLOW_FIELD_ADDITION = 1 << 2;
		const ALLOW_FIELD_REMOVAL = 1 << 3;
		const ALLOW_INHERITANCE_CHAIN_CHANGE = 1 << 4;
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
	pub reference_preservation: ReferencePreservation,
	pub serialization_method: SerializationMethod,
	pub deserialization_method: DeserializationMethod,
	pub treat_collection_as_user_object: bool,
	pub use_buffering: bool,
	pub version_tolerance: VersionTolerance,
}

type BlankFactory = Box<dyn Fn() -> Handle>;

/// Owns the settings, the object→surrogate and surrogate→object swap
/// tables, and the blank-instance factories a reader uses to
/// materialize a type it only knows by assembly-qualified name.
///
/// The process-wide [`crate::cache::TypeCache`] is deliberately *not*
/// owned here: it is shared across every `Registry` in the process.
pub struct Registry {
	pub settings: Settings,
	object_to_surrogate: RefCell<SwapTable>,
	surrogate_to_object: RefCell<SwapTable>,
	blank_factories: DashMap<String, BlankFactory>,
}

impl Registry {
	pub fn new(settings: Settings) -> Rc<Self> {
		Rc::new(Self {
			settings,
			object_to_surrogate: RefCell::new(SwapTable::new()),
			surrogate_to_object: RefCell::new(SwapTable::new()),
			blank_factories: DashMap::new(),
		})
	}

	/// Installs `T`'s blank-instance factory, so a reader encountering
	/// `T`'s assembly-qualified name on the stream can materialize a
	/// blank instance before applying its read plan. Called once at
	/// startup per concrete type that may appear as a non-primitive,
	/// non-collection value on the stream (this includes every
	/// concrete instantiation of [`crate::collections::GraphList`] and
	/// friends the caller intends to read).
	pub fn register<T: GraphValue>(&self) {
		let ty = T::static_type_descriptor();
		let aqn = ty.assembly_qualified_name();
		self.blank_factories.entry(aqn).or_insert_with(|| {
			let factory: BlankFactory = Box::new(|| crate::object::new_handle(T::new_blank()));
			factory
		});
	}

	/// Registers a pair of surrogate conversions: `T` is replaced by
	/// `S` at write time, and
	/// every materialized `S` is replaced by the `to_original` callback's
	/// return value at read time. Mutating either table after it has
	/// been consulted for a real lookup fails with
	/// [`WireError::IllegalStateAfterUse`].
	pub fn register_surrogate<T, S, F, G>(&self, to_surrogate: F, to_original: G) -> Result<()>
	where
		T: GraphValue,
		S: GraphValue,
		F: Fn(&T) -> S + 'static,
		G: Fn(&S) -> T + 'static,
	{
		let t_ty = T::static_type_descriptor();
		let s_ty = S::static_type_descriptor();

		self.object_to_surrogate.try_borrow_mut().map_err(|_| WireError::IllegalStateAfterUse)?.add_or_replace(
			t_ty,
			Box::new(move |handle: Handle| {
				let surrogate = {
					let value = handle.borrow();
					let value = value.as_any().downcast_ref::<T>().expect("surrogate source type mismatch");
					to_surrogate(value)
				};
				Ok(crate::object::new_handle(surrogate))
			}),
		)?;

		self.surrogate_to_object.try_borrow_mut().map_err(|_| WireError::IllegalStateAfterUse)?.add_or_replace(
			s_ty,
			Box::new(move |handle: Handle| {
				let original = {
					let value = handle.borrow();
					let value = value.as_any().downcast_ref::<S>().expect("surrogate target type mismatch");
					to_original(value)
				};
				Ok(crate::object::new_handle(original))
			}),
		)?;

		Ok(())
	}

	/// Looks `ty` up in the object→surrogate table and, on a match,
	/// invokes the registered conversion. The original `handle` never
	/// receives an identity — only the surrogate it's converted into
	/// goes on the wire.
	pub fn try_substitute_with_surrogate(&self, ty: &std::sync::Arc<TypeDescriptor>, handle: Handle) -> Result<Option<Handle>> {
		let table = self.object_to_surrogate.borrow();
		match table.find(ty) {
			Some(conversion) => Ok(Some(conversion(handle)?)),
			None => Ok(None),
		}
	}

	/// Looks the materialized instance's own type up in the
	/// surrogate→object table.
	pub fn try_restore_from_surrogate(&self, ty: &std::sync::Arc<TypeDescriptor>, handle: Handle) -> Result<Option<Handle>> {
		let table = self.surrogate_to_object.borrow();
		match table.find(ty) {
			Some(conversion) => Ok(Some(conversion(handle)?)),
			None => Ok(None),
		}
	}

	pub fn blank_factory_for(&self, assembly_qualified_name: &str) -> Option<Handle> {
		self.blank_factories.get(assembly_qualified_name).map(|factory| factory())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_tolerance_flags_combine() {
		let tolerance = VersionTolerance::ALLOW_FIELD_ADDITION | VersionTolerance::ALLOW_FIELD_REMOVAL;
		assert!(tolerance.contains(VersionTolerance::ALLOW_FIELD_ADDITION));
		assert!(!tolerance.contains(VersionTolerance::ALLOW_GUID_CHANGE));
	}

	#[test]
	fn reference_preservation_defaults_to_preserve_and_strong() {
		let default = ReferencePreservation::default();
		assert_eq!(default, ReferencePreservation::Preserve);
		assert!(default.spans_operations());
		assert!(!default.is_weak());
	}
}
