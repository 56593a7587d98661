//! Process-wide, insert-only type descriptor cache.
//!
//! Shared mutable state is otherwise avoided throughout this crate —
//! identity tables, primitive codec buffers and swap tables are all
//! per-serializer — but the type cache is the one exception: type
//! descriptors are expensive to rebuild and safe to share across
//! concurrent callers once built, so they live in a process-wide map
//! with insert-once semantics. [`dashmap::DashMap`] is the standard
//! ecosystem tool for that shape.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::descriptor::TypeDescriptor;

/// Never exposes a removal API: entries, once inserted, live for the
/// remainder of the process.
pub struct TypeCache {
	entries: DashMap<String, Arc<TypeDescriptor>>,
}

impl TypeCache {
	fn new() -> Self {
		Self { entries: DashMap::new() }
	}

	pub fn global() -> &'static TypeCache {
		static CACHE: OnceLock<TypeCache> = OnceLock::new();
		CACHE.get_or_init(TypeCache::new)
	}

	pub fn get(&self, assembly_qualified_name: &str) -> Option<Arc<TypeDescriptor>> {
		self.entries.get(assembly_qualified_name).map(|entry| entry.clone())
	}

	/// Inserts `descriptor` under its assembly-qualified name unless
	/// an entry is already present, returning whichever descriptor
	/// ends up cached (the existing one on a race, `descriptor`
	/// otherwise).
	pub fn get_or_insert(&self, descriptor: Arc<TypeDescriptor>) -> Arc<TypeDescriptor> {
		let key = descriptor.assembly_qualified_name();
		self.entries.entry(key).or_insert(descriptor).clone()
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use crate::descriptor::{AssemblyDescriptor, TypeDescriptorKind};

	use super::*;

	#[test]
	fn insert_is_idempotent() {
		let cache = TypeCache::new();
		let assembly = Arc::new(AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::nil()).unwrap());
		let make = || {
			Arc::new(TypeDescriptor {
				full_name: "Widget".into(),
				assembly: assembly.clone(),
				generic_args: vec![],
				base_type: None,
				fields: vec![],
				kind: TypeDescriptorKind::UserObject,
			})
		};
		let first = cache.get_or_insert(make());
		let second = cache.get_or_insert(make());
		assert!(Arc::ptr_eq(&first, &second), "second insert should return the cached first instance");
	}
}
