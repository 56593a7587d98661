//! Built-in collection wrappers: `GraphList<T>`, `GraphMap<K, V>` and
//! `GraphSet<T>`. All three are backed by a plain `Vec`, not an
//! `IndexMap`/`IndexSet`, for two reasons: their element/key types are
//! arbitrary `GraphValue` implementors with no `Eq`/`Hash` bound to
//! spare callers from providing, and insertion order must be exactly
//! preserved so two writes of the same graph produce byte-identical
//! output.
//!
//! None of the three require a structure stamp by default — their
//! shape is "record count then records", not a fixed field list — but
//! still honor `TreatCollectionAsUserObject` through
//! [`crate::descriptor::TypeDescriptor::requires_structure_stamp`].

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::descriptor::{CollectionKind, TypeDescriptor, TypeDescriptorKind};
use crate::error::Result;
use crate::object::{builtin_assembly, GraphObject, GraphValue, Handle, Link};
use crate::reader::ObjectReader;
use crate::writer::ObjectWriter;

fn collection_type_descriptor(full_name: &str, kind: CollectionKind, generic_args: Vec<Arc<TypeDescriptor>>) -> Arc<TypeDescriptor> {
	use crate::cache::TypeCache;
	TypeCache::global().get_or_insert(Arc::new(TypeDescriptor {
		full_name: full_name.to_string(),
		assembly: builtin_assembly(),
		generic_args,
		base_type: None,
		fields: vec![],
		kind: TypeDescriptorKind::Collection(kind),
	}))
}

/// An ordered list of `T`, preserving insertion order and permitting
/// duplicates. The `GraphObject`/`GraphValue` counterpart of `Vec<T>`.
pub struct GraphList<T: GraphValue> {
	items: Vec<Link<T>>,
}

impl<T: GraphValue> GraphList<T> {
	pub fn new() -> Self {
		Self { items: Vec::new() }
	}

	pub fn push(&mut self, value: T) {
		self.items.push(Link::new(value));
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Link<T>> {
		self.items.iter()
	}
}

impl<T: GraphValue> Default for GraphList<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: GraphValue + Debug> Debug for GraphList<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.items.iter()).finish()
	}
}

impl<T: GraphValue> GraphObject for GraphList<T> {
	fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor> {
		<Self as GraphValue>::static_type_descriptor()
	}

	fn write_field(&self, _field_index: usize, _writer: &mut ObjectWriter<'_>) -> Result<()> {
		unreachable!("collections are written through write_body's Collection branch, not write_field")
	}

	fn read_field(&mut self, _field_index: usize, _reader: &mut ObjectReader<'_>) -> Result<()> {
		unreachable!("collections are read through read_body's Collection branch, not read_field")
	}

	fn construct_field(&mut self, _field_index: usize) -> Result<()> {
		unreachable!("collections have no constructor-recreated fields")
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}

	fn collection_len(&self) -> Option<usize> {
		Some(self.items.len())
	}

	fn collection_items(&self) -> Option<Vec<Handle>> {
		Some(self.items.iter().map(Link::handle).collect())
	}

	fn collection_push(&mut self, item: Handle) {
		self.items.push(Link::from_handle(item));
	}
}

impl<T: GraphValue> GraphValue for GraphList<T> {
	fn new_blank() -> Self {
		Self::new()
	}

	fn static_type_descriptor() -> Arc<TypeDescriptor> {
		collection_type_descriptor("GraphList", CollectionKind::List, vec![T::static_type_descriptor()])
	}
}

/// An insertion-ordered set; unlike `HashSet`/`IndexSet`, membership is
/// never checked or enforced — duplicates are the caller's concern.
/// This mirrors the CLR collections this format models, which do not
/// require `T: Eq` either.
pub struct GraphSet<T: GraphValue> {
	items: Vec<Link<T>>,
}

impl<T: GraphValue> GraphSet<T> {
	pub fn new() -> Self {
		Self { items: Vec::new() }
	}

	pub fn insert(&mut self, value: T) {
		self.items.push(Link::new(value));
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Link<T>> {
		self.items.iter()
	}
}

impl<T: GraphValue> Default for GraphSet<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: GraphValue + Debug> Debug for GraphSet<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.items.iter()).finish()
	}
}

impl<T: GraphValue> GraphObject for GraphSet<T> {
	fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor> {
		<Self as GraphValue>::static_type_descriptor()
	}

	fn write_field(&self, _field_index: usize, _writer: &mut ObjectWriter<'_>) -> Result<()> {
		unreachable!("collections are written through write_body's Collection branch, not write_field")
	}

	fn read_field(&mut self, _field_index: usize, _reader: &mut ObjectReader<'_>) -> Result<()> {
		unreachable!("collections are read through read_body's Collection branch, not read_field")
	}

	fn construct_field(&mut self, _field_index: usize) -> Result<()> {
		unreachable!("collections have no constructor-recreated fields")
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}

	fn collection_len(&self) -> Option<usize> {
		Some(self.items.len())
	}

	fn collection_items(&self) -> Option<Vec<Handle>> {
		Some(self.items.iter().map(Link::handle).collect())
	}

	fn collection_push(&mut self, item: Handle) {
		self.items.push(Link::from_handle(item));
	}
}

impl<T: GraphValue> GraphValue for GraphSet<T> {
	fn new_blank() -> Self {
		Self::new()
	}

	fn static_type_descriptor() -> Arc<TypeDescriptor> {
		collection_type_descriptor("GraphSet", CollectionKind::Set, vec![T::static_type_descriptor()])
	}
}

/// An insertion-ordered association; like [`GraphSet`], no key
/// uniqueness is enforced.
pub struct GraphMap<K: GraphValue, V: GraphValue> {
	entries: Vec<(Link<K>, Link<V>)>,
	/// Holds a decoded key between the two `collection_push` calls a
	/// single record takes to read: the wire order is
	/// `key, value, key, value, …`, one `read_value` call per element.
	pending_key: Option<Link<K>>,
}

impl<K: GraphValue, V: GraphValue> GraphMap<K, V> {
	pub fn new() -> Self {
		Self { entries: Vec::new(), pending_key: None }
	}

	pub fn insert(&mut self, key: K, value: V) {
		self.entries.push((Link::new(key), Link::new(value)));
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &(Link<K>, Link<V>)> {
		self.entries.iter()
	}
}

impl<K: GraphValue, V: GraphValue> Default for GraphMap<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: GraphValue + Debug, V: GraphValue + Debug> Debug for GraphMap<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v))).finish()
	}
}

impl<K: GraphValue, V: GraphValue> GraphObject for GraphMap<K, V> {
	fn dyn_type_descriptor(&self) -> Arc<TypeDescriptor> {
		<Self as GraphValue>::static_type_descriptor()
	}

	fn write_field(&self, _field_index: usize, _writer: &mut ObjectWriter<'_>) -> Result<()> {
		unreachable!("collections are written through write_body's Collection branch, not write_field")
	}

	fn read_field(&mut self, _field_index: usize, _reader: &mut ObjectReader<'_>) -> Result<()> {
		unreachable!("collections are read through read_body's Collection branch, not read_field")
	}

	fn construct_field(&mut self, _field_index: usize) -> Result<()> {
		unreachable!("collections have no constructor-recreated fields")
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}

	fn collection_len(&self) -> Option<usize> {
		Some(self.entries.len())
	}

	fn collection_items(&self) -> Option<Vec<Handle>> {
		Some(self.entries.iter().flat_map(|(k, v)| [k.handle(), v.handle()]).collect())
	}

	fn collection_push(&mut self, item: Handle) {
		match self.pending_key.take() {
			None => self.pending_key = Some(Link::from_handle(item)),
			Some(key) => self.entries.push((key, Link::from_handle(item))),
		}
	}
}

impl<K: GraphValue, V: GraphValue> GraphValue for GraphMap<K, V> {
	fn new_blank() -> Self {
		Self::new()
	}

	fn static_type_descriptor() -> Arc<TypeDescriptor> {
		collection_type_descriptor("GraphMap", CollectionKind::Map, vec![K::static_type_descriptor(), V::static_type_descriptor()])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn list_preserves_insertion_order() {
		let mut list: GraphList<i32> = GraphList::new();
		list.push(3);
		list.push(1);
		list.push(2);
		let values: Vec<i32> = list.iter().map(|l| *l.borrow()).collect();
		assert_eq!(values, vec![3, 1, 2]);
	}

	#[test]
	fn map_push_pairs_keys_with_values_in_order() {
		let mut map: GraphMap<String, i32> = GraphMap::new();
		map.collection_push(crate::object::new_handle(String::from("a")));
		map.collection_push(crate::object::new_handle(1i32));
		map.collection_push(crate::object::new_handle(String::from("b")));
		map.collection_push(crate::object::new_handle(2i32));
		let pairs: Vec<(String, i32)> = map.iter().map(|(k, v)| (k.borrow().clone(), *v.borrow())).collect();
		assert_eq!(pairs, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
	}

	#[test]
	fn set_type_descriptor_carries_element_type() {
		let descriptor = <GraphSet<i32> as GraphValue>::static_type_descriptor();
		assert_eq!(descriptor.generic_args.len(), 1);
		assert_eq!(descriptor.generic_args[0].full_name, "i32");
	}
}
