//! End-to-end scenarios: primitive pairs on a shared open stream,
//! cyclic graphs, surrogate substitution, and many values written to
//! one stream. Schema-evolution scenarios live in `schema_evolution.rs`,
//! where the stream bytes for the "previous" version of a type have to
//! be hand-crafted.

use graphwire::collections::GraphList;
use graphwire::object::{new_handle, GraphObject, Link};
use graphwire::reader::ObjectReader;
use graphwire::registry::{Registry, Settings};
use graphwire::writer::ObjectWriter;
use graphwire::GraphValue;

#[derive(Debug, GraphValue)]
struct Node {
	value: i32,
	next: Option<Link<Node>>,
}

#[derive(Debug, GraphValue)]
struct Celsius {
	degrees: f64,
}

#[derive(Debug, GraphValue)]
struct CelsiusOnWire {
	millidegrees: i64,
}

#[test]
fn s1_primitive_pair_shares_identity_and_type_tables() {
	let registry = Registry::new(Settings::default());

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		writer.serialize(Some(new_handle(String::from("One")))).unwrap();
		writer.serialize(Some(new_handle(String::from("Two")))).unwrap();
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let first = reader.deserialize().unwrap().unwrap();
	let second = reader.deserialize().unwrap().unwrap();

	assert_eq!(first.borrow().as_any().downcast_ref::<String>().unwrap(), "One");
	assert_eq!(second.borrow().as_any().downcast_ref::<String>().unwrap(), "Two");
	assert!(reader.is_exhausted().unwrap(), "nothing should remain after both values");
}

#[test]
fn s2_two_cycle_preserves_pointer_identity() {
	let registry = Registry::new(Settings::default());
	registry.register::<Node>();

	let a = new_handle(Node { value: 1, next: None });
	let b = new_handle(Node { value: 2, next: None });
	a.borrow_mut().as_any_mut().downcast_mut::<Node>().unwrap().next = Some(Link::from_handle(b.clone()));
	b.borrow_mut().as_any_mut().downcast_mut::<Node>().unwrap().next = Some(Link::from_handle(a.clone()));

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		writer.serialize(Some(a)).unwrap();
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let root = reader.deserialize().unwrap().unwrap();

	let root_again = {
		let root_ref = root.borrow();
		let root_node = root_ref.as_any().downcast_ref::<Node>().unwrap();
		let next = root_node.next.as_ref().unwrap().handle();
		let next_ref = next.borrow();
		let next_node = next_ref.as_any().downcast_ref::<Node>().unwrap();
		next_node.next.as_ref().unwrap().handle()
	};

	assert!(std::rc::Rc::ptr_eq(&root, &root_again), "a.next.next should be a itself");
}

#[test]
fn s5_surrogate_round_trip_never_stamps_the_original_type() {
	let registry = Registry::new(Settings::default());
	// Deliberately never registered: if the original `Celsius` type were
	// ever stamped and materialized directly, the reader would fail to
	// find a blank-instance factory for it.
	registry.register::<CelsiusOnWire>();
	registry
		.register_surrogate::<Celsius, CelsiusOnWire, _, _>(
			|c| CelsiusOnWire { millidegrees: (c.degrees * 1000.0).round() as i64 },
			|w| Celsius { degrees: w.millidegrees as f64 / 1000.0 },
		)
		.unwrap();

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		writer.serialize(Some(new_handle(Celsius { degrees: 20.5 }))).unwrap();
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let value = reader.deserialize().unwrap().unwrap();
	let value = value.borrow();
	let celsius = value.as_any().downcast_ref::<Celsius>().expect("surrogate callback restored a Celsius");
	assert!((celsius.degrees - 20.5).abs() < 1e-9);
}

#[test]
fn s6_open_stream_many_values_in_order_then_eof() {
	const N: usize = 5;
	let registry = Registry::new(Settings::default());

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		for i in 0..N {
			writer.serialize(Some(new_handle(i as i32))).unwrap();
		}
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let mut values = Vec::new();
	while !reader.is_exhausted().unwrap() {
		let value = reader.deserialize().unwrap().unwrap();
		values.push(*value.borrow().as_any().downcast_ref::<i32>().unwrap());
	}

	assert_eq!(values, (0..N as i32).collect::<Vec<_>>());
	assert!(reader.is_exhausted().unwrap());
}

#[test]
fn graph_list_round_trips_count_prefixed_body() {
	let registry = Registry::new(Settings::default());
	registry.register::<GraphList<i32>>();

	let mut list: GraphList<i32> = GraphList::new();
	list.push(10);
	list.push(20);
	list.push(30);

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		writer.serialize(Some(new_handle(list))).unwrap();
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let value = reader.deserialize().unwrap().unwrap();
	let value = value.borrow();
	let list = value.as_any().downcast_ref::<GraphList<i32>>().unwrap();
	let values: Vec<i32> = list.iter().map(|item| *item.borrow()).collect();
	assert_eq!(values, vec![10, 20, 30]);
	assert!(reader.is_exhausted().unwrap());
}

#[test]
fn s6_open_stream_many_values_survives_block_buffering() {
	const N: usize = 5;
	let settings = Settings { use_buffering: true, ..Settings::default() };
	let registry = Registry::new(settings);

	let mut bytes = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).unwrap();
		for i in 0..N {
			writer.serialize(Some(new_handle(i as i32))).unwrap();
		}
		writer.close().unwrap();
	}

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let mut values = Vec::new();
	while !reader.is_exhausted().unwrap() {
		let value = reader.deserialize().unwrap().unwrap();
		values.push(*value.borrow().as_any().downcast_ref::<i32>().unwrap());
	}

	assert_eq!(values, (0..N as i32).collect::<Vec<_>>());
	assert!(reader.is_exhausted().unwrap(), "checking again after the marker must not un-exhaust the reader");
}

#[test]
fn byte_determinism_same_graph_same_settings_same_bytes() {
	let make_bytes = || {
		let registry = Registry::new(Settings::default());
		registry.register::<Node>();
		let mut bytes = Vec::new();
		let mut writer = ObjectWriter::open(&mut bytes, registry).unwrap();
		writer.serialize(Some(new_handle(Node { value: 7, next: None }))).unwrap();
		writer.close().unwrap();
		bytes
	};

	assert_eq!(make_bytes(), make_bytes());
}

#[test]
fn header_invariance_first_five_bytes() {
	let registry = Registry::new(Settings::default());
	let mut bytes = Vec::new();
	{
		let writer = ObjectWriter::open(&mut bytes, registry).unwrap();
		drop(writer);
	}
	assert_eq!(&bytes[..5], &[0x32, 0x66, 0x34, 0x07, 0x01]);
}
