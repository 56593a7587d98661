//! Runtime helpers called from code generated by `#[derive(GraphValue)]`.
//!
//! Kept in the main crate rather than inlined by the proc-macro itself:
//! a proc-macro crate can only emit tokens, so anything with actual
//! behavior — caching, parsing — belongs where it can be unit-tested
//! directly.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::descriptor::AssemblyDescriptor;

/// Every type a single crate derives `GraphValue` for shares one
/// synthetic [`AssemblyDescriptor`], keyed by `CARGO_PKG_NAME` (the
/// derive macro passes `env!("CARGO_PKG_NAME")`/`env!("CARGO_PKG_VERSION")`
/// captured at the call site, so this always reflects the *caller's*
/// crate, not `graphwire`'s own).
///
/// The module guid has no real compilation-unit analogue in a derive
/// macro, so one is minted with [`Uuid::new_v4`] the first time a
/// crate's assembly is requested and cached for the rest of the
/// process — stable within one run, which is all byte-determinism
/// between two serializations in the same process requires, but not
/// across separate runs of the same binary. See DESIGN.md for why this
/// is an accepted simplification rather than a derived, build-stable id.
static ASSEMBLIES: std::sync::OnceLock<DashMap<String, Arc<AssemblyDescriptor>>> = std::sync::OnceLock::new();

pub fn crate_assembly(name: &str, pkg_version: &str) -> Arc<AssemblyDescriptor> {
	let assemblies = ASSEMBLIES.get_or_init(DashMap::new);
	if let Some(existing) = assemblies.get(name) {
		return existing.clone();
	}
	let descriptor = Arc::new(
		AssemblyDescriptor::new(name, parse_pkg_version(pkg_version), "", vec![], Uuid::new_v4())
			.expect("derive-generated assembly descriptor is always well-formed"),
	);
	assemblies.entry(name.to_string()).or_insert(descriptor).clone()
}

/// Best-effort parse of a `CARGO_PKG_VERSION`-shaped string
/// (`major.minor.patch[-pre][+build]`) into the four-part version an
/// [`AssemblyDescriptor`] carries. Unparseable or missing components
/// default to `0`, never fail: this runs at derive-generated-code call
/// time, not at a point a `Result` can usefully propagate from.
pub fn parse_pkg_version(version: &str) -> [i32; 4] {
	let core = version.split(['-', '+']).next().unwrap_or(version);
	let mut parts = [0i32; 4];
	for (slot, part) in parts.iter_mut().zip(core.split('.')) {
		*slot = part.parse().unwrap_or(0);
	}
	parts
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_standard_semver() {
		assert_eq!(parse_pkg_version("1.2.3"), [1, 2, 3, 0]);
	}

	#[test]
	fn tolerates_prerelease_and_build_metadata() {
		assert_eq!(parse_pkg_version("0.1.0-alpha.1+build.7"), [0, 1, 0, 0]);
	}

	#[test]
	fn caches_one_assembly_per_crate_name() {
		let first = crate_assembly("some-crate", "1.0.0");
		let second = crate_assembly("some-crate", "1.0.0");
		assert!(Arc::ptr_eq(&first, &second));
	}
}
