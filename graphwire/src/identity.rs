//! Dense integer identity assignment for objects reachable during a
//! traversal, with weak-reference discipline across open-stream
//! operations.
//!
//! Neither table needs a deferred-fixup mechanism for cycles: the
//! reader's `read_value` always calls `reserve()` and then `fill()`
//! with a blank instance *before* recursing into that instance's own
//! fields (`read_body`), so by the time a back reference to the same
//! id is read, the slot it resolves to is never still `Reserved`. A
//! self-referential object (`a.next = a`) and a two-cycle (`a.next =
//! b; b.next = a`) both go through the same reserve-then-fill-then-
//! recurse order.

use std::rc::{Rc, Weak};

use fxhash::FxHashMap;

use crate::error::{Result, WireError};
use crate::object::{identity_of, GraphObject, Handle};
use crate::registry::ReferencePreservation;

/// Write-side table: pointer identity → dense id, `0` reserved for
/// `null` (invariant 2 of the data model).
///
/// `mode` governs what keeps an allocated object alive between
/// `serialize` calls on the same open stream: [`ReferencePreservation::Preserve`]
/// retains a strong [`Handle`] clone forever (the object can always be
/// re-referenced); [`ReferencePreservation::UseWeakReference`] retains
/// only a [`Weak`] handle, so a caller that drops its own last strong
/// reference between operations lets this table forget the identity
/// too (a later re-appearance of an equal-looking object gets a fresh
/// id rather than reusing the dead one's); [`ReferencePreservation::DoNotPreserve`]
/// retains nothing and clears every id at the end of each operation.
pub struct WriteIdentityTable {
	next_id: u32,
	ids: FxHashMap<*const (), u32>,
	mode: ReferencePreservation,
	strong_refs: Vec<Handle>,
	weak_refs: FxHashMap<*const (), Weak<std::cell::RefCell<dyn GraphObject>>>,
}

impl WriteIdentityTable {
	pub fn new(mode: ReferencePreservation) -> Self {
		Self { next_id: 1, ids: FxHashMap::default(), mode, strong_refs: Vec::new(), weak_refs: FxHashMap::default() }
	}

	pub fn existing_id(&self, handle: &Handle) -> Option<u32> {
		self.ids.get(&identity_of(handle)).copied()
	}

	/// Allocates a new id for `handle`. Caller must have already
	/// checked [`existing_id`](Self::existing_id).
	pub fn allocate(&mut self, handle: &Handle) -> u32 {
		let id = self.next_id;
		self.next_id += 1;
		let key = identity_of(handle);
		self.ids.insert(key, id);
		match self.mode {
			ReferencePreservation::DoNotPreserve => {}
			ReferencePreservation::UseWeakReference => {
				self.weak_refs.insert(key, Rc::downgrade(handle));
			}
			ReferencePreservation::Preserve => self.strong_refs.push(handle.clone()),
		}
		id
	}

	/// Discards the table between operations on an open stream when
	/// `ReferencePreservation::DoNotPreserve` is in effect (the writer
	/// must then re-stamp every identity it sees again), or purges dead
	/// entries when `UseWeakReference` is in effect (an object the
	/// caller has otherwise dropped no longer occupies an id; a later
	/// write of an equal-looking object allocates a fresh one). Has no
	/// effect under `Preserve`.
	pub fn reset_for_next_operation(&mut self) {
		match self.mode {
			ReferencePreservation::DoNotPreserve => {
				self.ids.clear();
				self.next_id = 1;
			}
			ReferencePreservation::UseWeakReference => {
				self.weak_refs.retain(|key, weak| {
					let alive = weak.upgrade().is_some();
					if !alive {
						self.ids.remove(key);
					}
					alive
				});
			}
			ReferencePreservation::Preserve => {}
		}
	}
}

enum Slot {
	Reserved,
	Filled(Handle),
}

/// Read-side table: dense slots filled in as instances materialize.
///
/// Unlike [`WriteIdentityTable`], this table always retains a strong
/// [`Handle`] once a slot is filled, even under `UseWeakReference`: a
/// later back reference on the stream must resolve to *some* live
/// object, and the reader has no facility for re-minting one on
/// demand. A write-side weak-mode purge only means the *writer* may
/// assign a new id to an object it re-encounters; it never invalidates
/// an id the reader has already filled, so the asymmetry costs nothing
/// but the memory of a slot that will never be referenced again.
pub struct ReadIdentityTable {
	slots: Vec<Slot>,
	preserve_across_operations: bool,
}

impl ReadIdentityTable {
	pub fn new(preserve_across_operations: bool) -> Self {
		Self { slots: vec![Slot::Reserved], preserve_across_operations }
	}

	/// Reserves the next dense slot (id `slots.len()`), called before
	/// an instance's fields are read so back references encountered
	/// while reading them resolve to the still-empty slot.
	pub fn reserve(&mut self) -> u32 {
		self.slots.push(Slot::Reserved);
		(self.slots.len() - 1) as u32
	}

	pub fn fill(&mut self, id: u32, handle: Handle) -> Result<()> {
		let slot = self
			.slots
			.get_mut(id as usize)
			.ok_or(WireError::StreamCorrupted("filled an identity slot that was never reserved"))?;
		*slot = Slot::Filled(handle);
		Ok(())
	}

	pub fn get(&self, id: u32) -> Option<Handle> {
		match self.slots.get(id as usize)? {
			Slot::Filled(handle) => Some(handle.clone()),
			Slot::Reserved => None,
		}
	}

	pub fn is_filled(&self, id: u32) -> bool {
		matches!(self.slots.get(id as usize), Some(Slot::Filled(_)))
	}

	/// Mirrors [`WriteIdentityTable::reset_for_next_operation`]: with
	/// `ReferencePreservation::DoNotPreserve`, the writer re-stamped
	/// every object on the next `serialize` call, so this table must
	/// forget every slot too or its dense ids would drift out of sync.
	pub fn reset_for_next_operation(&mut self) {
		if !self.preserve_across_operations {
			self.slots = vec![Slot::Reserved];
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	#[test]
	fn write_table_reuses_ids_for_same_allocation() {
		let mut table = WriteIdentityTable::new(ReferencePreservation::Preserve);
		let handle: Handle = Rc::new(RefCell::new(String::from("hi")));
		assert_eq!(table.existing_id(&handle), None);
		let id = table.allocate(&handle);
		assert_eq!(table.existing_id(&handle), Some(id));
	}

	#[test]
	fn distinct_allocations_get_distinct_ids_even_if_equal() {
		let mut table = WriteIdentityTable::new(ReferencePreservation::Preserve);
		let a: Handle = Rc::new(RefCell::new(String::from("hi")));
		let b: Handle = Rc::new(RefCell::new(String::from("hi")));
		let id_a = table.allocate(&a);
		let id_b = table.allocate(&b);
		assert_ne!(id_a, id_b);
	}

	#[test]
	fn do_not_preserve_clears_ids_between_operations() {
		let mut table = WriteIdentityTable::new(ReferencePreservation::DoNotPreserve);
		let handle: Handle = Rc::new(RefCell::new(String::from("hi")));
		table.allocate(&handle);
		table.reset_for_next_operation();
		assert_eq!(table.existing_id(&handle), None);
	}

	#[test]
	fn weak_reference_forgets_ids_once_the_caller_drops_the_object() {
		let mut table = WriteIdentityTable::new(ReferencePreservation::UseWeakReference);
		let handle: Handle = Rc::new(RefCell::new(String::from("hi")));
		table.allocate(&handle);
		assert!(table.existing_id(&handle).is_some());
		drop(handle);
		table.reset_for_next_operation();

		let same_value_again: Handle = Rc::new(RefCell::new(String::from("hi")));
		assert_eq!(table.existing_id(&same_value_again), None);
	}

	#[test]
	fn weak_reference_keeps_ids_for_objects_still_alive() {
		let mut table = WriteIdentityTable::new(ReferencePreservation::UseWeakReference);
		let handle: Handle = Rc::new(RefCell::new(String::from("hi")));
		let id = table.allocate(&handle);
		table.reset_for_next_operation();
		assert_eq!(table.existing_id(&handle), Some(id));
	}

	#[test]
	fn read_table_fills_reserved_slot() {
		let mut table = ReadIdentityTable::new(false);
		let id = table.reserve();
		assert!(!table.is_filled(id));
		let handle: Handle = Rc::new(RefCell::new(String::from("hi")));
		table.fill(id, handle).unwrap();
		assert!(table.is_filled(id));
	}
}
