//! Field addition and field removal: a stream written by an older
//! build of a type is read back against a newer Rust definition with a
//! different field set. There is no way to compile two versions of one
//! Rust struct in one test binary, so the "previous" stream is
//! hand-assembled byte-by-byte with the primitive codec directly, in
//! the same spirit as `stamp.rs`'s own unit tests building `prev`/`cur`
//! descriptors by hand, but carried all the way through a real
//! `ObjectReader`.

use graphwire::descriptor::TypeRef;
use graphwire::primitive::{write_var_u64, WireWrite};
use graphwire::registry::{Registry, Settings, VersionTolerance};
use graphwire::writer::{MAGIC, STREAM_VERSION};
use graphwire::GraphValue;
use graphwire::Uuid;

#[derive(Debug, GraphValue)]
struct SchemaAddition {
	x: i32,
	y: i32,
}

#[derive(Debug, GraphValue)]
struct SchemaRemoval {
	x: i32,
}

/// Writes a single-field `{x: i32}` (or `{x: i32, y: i32}`, if
/// `second_field` is set) object stream for `full_name`, using a
/// module guid that never matches whatever this process's derive
/// macro happened to cache for that name.
fn craft_stream(full_name: &str, first_value: i32, second_field: Option<(&str, i32)>) -> Vec<u8> {
	let mut bytes = Vec::new();
	bytes.extend_from_slice(&MAGIC);
	STREAM_VERSION.write_to(&mut bytes).unwrap();
	true.write_to(&mut bytes).unwrap();

	// object id 1
	write_var_u64(&mut bytes, 1).unwrap();
	// type id 0
	write_var_u64(&mut bytes, 0).unwrap();
	// assembly id 0
	write_var_u64(&mut bytes, 0).unwrap();
	"graphwire".to_string().write_to(&mut bytes).unwrap();
	for part in [0i32, 1, 0, 0] {
		part.write_to(&mut bytes).unwrap();
	}
	String::new().write_to(&mut bytes).unwrap();
	0u8.write_to(&mut bytes).unwrap();
	Uuid::nil().write_to(&mut bytes).unwrap();

	full_name.to_string().write_to(&mut bytes).unwrap();
	write_var_u64(&mut bytes, 0).unwrap(); // no generic args
	true.write_to(&mut bytes).unwrap(); // has structure stamp
	false.write_to(&mut bytes).unwrap(); // no base type

	let field_count: u64 = if second_field.is_some() { 2 } else { 1 };
	write_var_u64(&mut bytes, field_count).unwrap();
	write_field_stamp(&mut bytes, full_name, "x");
	if let Some((name, _)) = second_field {
		write_field_stamp(&mut bytes, full_name, name);
	}

	first_value.write_to(&mut bytes).unwrap();
	if let Some((_, value)) = second_field {
		value.write_to(&mut bytes).unwrap();
	}
	bytes
}

fn write_field_stamp(bytes: &mut Vec<u8>, declaring_type: &str, name: &str) {
	declaring_type.to_string().write_to(bytes).unwrap();
	name.to_string().write_to(bytes).unwrap();
	TypeRef::Concrete { assembly: "graphwire".into(), full_name: "i32".into() }.write_to(bytes).unwrap();
	false.write_to(bytes).unwrap(); // transient
	false.write_to(bytes).unwrap(); // constructor_recreated
	false.write_to(bytes).unwrap(); // by_reference
}

#[test]
fn s3_field_addition_rejected_without_tolerance_flag() {
	let bytes = craft_stream("SchemaAddition", 1, None);
	let registry = Registry::new(Settings { version_tolerance: VersionTolerance::ALLOW_GUID_CHANGE, ..Settings::default() });
	registry.register::<SchemaAddition>();

	let mut reader = graphwire::reader::ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let err = reader.deserialize().unwrap_err();
	assert!(matches!(err, graphwire::error::WireError::TypeStructureChanged { ref field_name, .. } if field_name == "y"));
}

#[test]
fn s3_field_addition_accepted_with_tolerance_flag_defaults_to_zero() {
	let bytes = craft_stream("SchemaAddition", 1, None);
	let tolerance = VersionTolerance::ALLOW_GUID_CHANGE | VersionTolerance::ALLOW_FIELD_ADDITION;
	let registry = Registry::new(Settings { version_tolerance: tolerance, ..Settings::default() });
	registry.register::<SchemaAddition>();

	let mut reader = graphwire::reader::ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let value = reader.deserialize().unwrap().unwrap();
	let value = value.borrow();
	let widget = value.as_any().downcast_ref::<SchemaAddition>().unwrap();
	assert_eq!(widget.x, 1);
	assert_eq!(widget.y, 0, "field cur added is default-initialized, never read from the stream");
}

#[test]
fn s4_field_removal_rejected_without_tolerance_flag() {
	let bytes = craft_stream("SchemaRemoval", 1, Some(("y", 2)));
	let registry = Registry::new(Settings { version_tolerance: VersionTolerance::ALLOW_GUID_CHANGE, ..Settings::default() });
	registry.register::<SchemaRemoval>();

	let mut reader = graphwire::reader::ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let err = reader.deserialize().unwrap_err();
	assert!(matches!(err, graphwire::error::WireError::TypeStructureChanged { ref field_name, .. } if field_name == "y"));
}

#[test]
fn s4_field_removal_accepted_with_tolerance_flag_discards_the_stream_bytes() {
	let bytes = craft_stream("SchemaRemoval", 1, Some(("y", 2)));
	let tolerance = VersionTolerance::ALLOW_GUID_CHANGE | VersionTolerance::ALLOW_FIELD_REMOVAL;
	let registry = Registry::new(Settings { version_tolerance: tolerance, ..Settings::default() });
	registry.register::<SchemaRemoval>();

	let mut reader = graphwire::reader::ObjectReader::open(bytes.as_slice(), registry).unwrap();
	let value = reader.deserialize().unwrap().unwrap();
	let value = value.borrow();
	let widget = value.as_any().downcast_ref::<SchemaRemoval>().unwrap();
	assert_eq!(widget.x, 1);
	assert!(reader.is_exhausted().unwrap(), "the removed field's bytes were consumed, not left dangling");
}
