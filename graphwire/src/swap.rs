//! Insertion-ordered registry mapping a declared type to a
//! user-supplied conversion function, used symmetrically for
//! object→surrogate (write side) and surrogate→object (read side).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::descriptor::TypeDescriptor;
use crate::error::{Result, WireError};
use crate::object::Handle;

type Conversion = Box<dyn Fn(Handle) -> Result<Handle>>;

struct Entry {
	declared_type: Arc<TypeDescriptor>,
	conversion: Conversion,
}

/// `add_or_replace` is append-only in effect (replacing an existing
/// declared type updates it in place, keeping its original insertion
/// position) until the table is first used for a real lookup, after
/// which any mutation fails with [`WireError::IllegalStateAfterUse`].
pub struct SwapTable {
	entries: IndexMap<String, Entry>,
	frozen: AtomicBool,
}

impl SwapTable {
	pub fn new() -> Self {
		Self { entries: IndexMap::new(), frozen: AtomicBool::new(false) }
	}

	pub fn add_or_replace(&mut self, declared_type: Arc<TypeDescriptor>, conversion: Conversion) -> Result<()> {
		if self.frozen.load(Ordering::Acquire) {
			return Err(WireError::IllegalStateAfterUse);
		}
		let key = declared_type.assembly_qualified_name();
		match self.entries.get_index_of(&key) {
			Some(index) => {
				let (_, entry) = self.entries.get_index_mut(index).unwrap();
				entry.declared_type = declared_type;
				entry.conversion = conversion;
			}
			None => {
				self.entries.insert(key, Entry { declared_type, conversion });
			}
		}
		Ok(())
	}

	/// Returns the callable whose declared type is the most-derived
	/// type assignable from `query`: walk `query`'s base-type chain
	/// starting at itself, and return the first registered declared
	/// type found along the way. Marks the table as used.
	pub fn find(&self, query: &Arc<TypeDescriptor>) -> Option<&Conversion> {
		self.frozen.store(true, Ordering::Release);
		let mut current = Some(query);
		while let Some(ty) = current {
			let key = ty.assembly_qualified_name();
			if let Some(entry) = self.entries.get(&key) {
				return Some(&entry.conversion);
			}
			current = ty.base_type.as_ref();
		}
		None
	}
}

impl Default for SwapTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use crate::descriptor::{AssemblyDescriptor, TypeDescriptorKind};

	use super::*;

	fn descriptor(name: &str, base: Option<Arc<TypeDescriptor>>) -> Arc<TypeDescriptor> {
		let assembly = Arc::new(AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::nil()).unwrap());
		Arc::new(TypeDescriptor {
			full_name: name.into(),
			assembly,
			generic_args: vec![],
			base_type: base,
			fields: vec![],
			kind: TypeDescriptorKind::UserObject,
		})
	}

	#[test]
	fn finds_most_derived_registration_first() {
		let base = descriptor("Base", None);
		let derived = descriptor("Derived", Some(base.clone()));

		let mut table = SwapTable::new();
		table.add_or_replace(base.clone(), Box::new(|h| Ok(h))).unwrap();
		assert!(table.find(&derived).is_some());

		let mut table = SwapTable::new();
		table.add_or_replace(base, Box::new(|h| Ok(h))).unwrap();
		table.add_or_replace(derived.clone(), Box::new(|h| Ok(h))).unwrap();
		// Both are registered; the derived-most (the query itself) wins.
		assert!(table.find(&derived).is_some());
	}

	#[test]
	fn mutation_after_use_is_illegal() {
		let base = descriptor("Base", None);
		let mut table = SwapTable::new();
		table.add_or_replace(base.clone(), Box::new(|h| Ok(h))).unwrap();
		table.find(&base);
		let err = table.add_or_replace(base, Box::new(|h| Ok(h)));
		assert!(matches!(err, Err(WireError::IllegalStateAfterUse)));
	}
}
