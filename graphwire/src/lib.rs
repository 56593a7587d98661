//! A binary object-graph serializer with reference preservation,
//! user-defined surrogates and schema-evolution ("version tolerance")
//! support.
//!
//! The four subsystems that do the actual work are [`writer`] and
//! [`reader`] (traversal, identity tracking, type stamping),
//! [`stamp`] (the version-tolerance comparator) and [`swap`] (surrogate
//! substitution). Everything else in this crate exists to support
//! them: [`descriptor`] describes a type's wire shape, [`primitive`]
//! is the leaf codec, [`identity`] tracks per-traversal object
//! identity, [`cache`] is the process-wide type cache, and
//! [`registry`] bundles the settings and swap tables an open
//! [`writer::ObjectWriter`]/[`reader::ObjectReader`] session shares
//! across many consecutive operations.
//!
//! `#[derive(GraphValue)]` (re-exported from `graphwire-derive`) is the
//! normal way to make a struct participate in a graph; see
//! [`object::GraphValue`] for the trait it implements.

pub mod cache;
pub mod collections;
pub mod derive_support;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod object;
pub mod primitive;
pub mod reader;
pub mod registry;
pub mod stamp;
pub mod swap;
pub mod writer;

pub use graphwire_derive::GraphValue;
pub use uuid::Uuid;

use std::rc::Rc;

use error::{Result, WireError};
use object::{GraphValue, Handle};
use reader::ObjectReader;
use registry::{Registry, Settings};
use writer::ObjectWriter;

/// Opens a one-shot writer on `sink` with a fresh [`Registry`], writes
/// `root`, and returns the fully written bytes.
///
/// This is the thin single-shot entry point built on top of the core
/// (no shared identity or type tables across calls); opening a
/// [`writer::ObjectWriter`] directly and calling
/// [`writer::ObjectWriter::serialize`] repeatedly is how an "open a
/// stream and perform many operations" session is built instead.
pub fn serialize_to_vec<T: GraphValue>(root: T, settings: Settings) -> Result<Vec<u8>> {
	let registry = Registry::new(settings);
	registry.register::<T>();
	let mut out = Vec::new();
	{
		let mut writer = ObjectWriter::open(&mut out, registry)?;
		writer.serialize(Some(object::new_handle(root)))?;
		writer.close()?;
	}
	Ok(out)
}

/// Mirror of [`serialize_to_vec`]: opens a one-shot reader over
/// `bytes`, reads exactly one root value, and downcasts it to `T`.
pub fn deserialize_from_slice<T: GraphValue>(bytes: &[u8], settings: Settings) -> Result<T> {
	let registry = Registry::new(settings);
	registry.register::<T>();
	let mut reader = ObjectReader::open(bytes, registry)?;
	let handle = reader.deserialize()?.ok_or(WireError::StreamCorrupted("expected a non-null root value"))?;
	drop(reader);
	downcast::<T>(handle)
}

/// Moves the concrete `T` out of a just-materialized [`Handle`],
/// leaving a blank instance behind. Requires the caller to have
/// already dropped every other strong owner of `handle` (in
/// particular, the [`ObjectReader`] whose identity table holds its own
/// clone) — [`Rc::get_mut`] is how that single-ownership requirement
/// is checked, since `RefCell<dyn GraphObject>` cannot be unwrapped by
/// value (`into_inner` needs `Sized`).
fn downcast<T: GraphValue>(mut handle: Handle) -> Result<T> {
	let cell = Rc::get_mut(&mut handle).ok_or(WireError::InvariantViolation("root value is still shared after deserialize"))?;
	let concrete = cell
		.get_mut()
		.as_any_mut()
		.downcast_mut::<T>()
		.ok_or(WireError::InvariantViolation("root value was not of the requested type"))?;
	Ok(std::mem::replace(concrete, T::new_blank()))
}

/// Round-trips `value` through an in-memory buffer using a fresh
/// registry and default settings, the way a caller without a live
/// stream would clone a graph. If the number of bytes consumed on
/// read does not match the number written, that is an
/// [`WireError::InvariantViolation`] — every byte written for one
/// value must be consumed reading it back, never more, never fewer.
pub fn clone_via_round_trip<T: GraphValue>(value: T) -> Result<T> {
	let settings = Settings::default();
	let bytes = serialize_to_vec(value, settings)?;
	let mut cursor = std::io::Cursor::new(bytes.as_slice());
	let registry = Registry::new(settings);
	registry.register::<T>();
	let mut reader = ObjectReader::open(&mut cursor, registry)?;
	let handle = reader.deserialize()?.ok_or(WireError::StreamCorrupted("expected a non-null root value"))?;
	drop(reader);
	let consumed = cursor.position() as usize;
	if consumed != bytes.len() {
		return Err(WireError::InvariantViolation("deep-clone read fewer bytes than were written"));
	}
	downcast::<T>(handle)
}
