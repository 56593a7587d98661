use std::fmt::{Display, Formatter};

use derivative::Derivative;
use uuid::Uuid;

use crate::error::{Result, WireError};

/// Identity of a compilation unit: name, four-part version, culture
/// tag, an optional 8-byte public-key token, and a module-unique id.
///
/// Two descriptors are equal iff their [`assembly_qualified_name`]
/// strings are equal (invariant 6 of the data model).
///
/// [`assembly_qualified_name`]: AssemblyDescriptor::assembly_qualified_name
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct AssemblyDescriptor {
	pub name: String,
	pub version: [i32; 4],
	/// Empty string means "no culture" (rendered as `neutral` in the
	/// assembly-qualified name — a Rust crate has no culture concept to
	/// populate this with, so it is always empty in practice).
	pub culture: String,
	#[derivative(Debug(format_with = "fmt_token"))]
	pub public_key_token: Vec<u8>,
	pub module_guid: Uuid,
}

fn fmt_token(token: &[u8], f: &mut Formatter) -> std::fmt::Result {
	if token.is_empty() {
		return write!(f, "null");
	}
	for byte in token {
		write!(f, "{byte:02x}")?;
	}
	Ok(())
}

impl AssemblyDescriptor {
	pub fn new(
		name: impl Into<String>,
		version: [i32; 4],
		culture: impl Into<String>,
		public_key_token: Vec<u8>,
		module_guid: Uuid,
	) -> Result<Self> {
		if !matches!(public_key_token.len(), 0 | 8) {
			return Err(WireError::StreamCorrupted("public key token must be 0 or 8 bytes"));
		}
		Ok(Self { name: name.into(), version, culture: culture.into(), public_key_token, module_guid })
	}

	/// The canonical identity string used for equality, hashing and
	/// the human-readable form stamped alongside the assembly on the
	/// wire.
	pub fn assembly_qualified_name(&self) -> String {
		let culture = if self.culture.is_empty() { "neutral" } else { &self.culture };
		let token = if self.public_key_token.is_empty() {
			"null".to_string()
		} else {
			self.public_key_token.iter().map(|b| format!("{b:02x}")).collect()
		};
		format!(
			"{}, Version={}.{}.{}.{}, Culture={culture}, PublicKeyToken={token}",
			self.name, self.version[0], self.version[1], self.version[2], self.version[3],
		)
	}
}

impl Display for AssemblyDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.assembly_qualified_name())
	}
}

impl PartialEq for AssemblyDescriptor {
	fn eq(&self, other: &Self) -> bool {
		self.assembly_qualified_name() == other.assembly_qualified_name()
	}
}

impl Eq for AssemblyDescriptor {}

impl std::hash::Hash for AssemblyDescriptor {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.assembly_qualified_name().hash(state)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_culture_renders_as_neutral() {
		let descriptor = AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::nil()).unwrap();
		assert!(descriptor.assembly_qualified_name().contains("Culture=neutral"));
	}

	#[test]
	fn rejects_malformed_public_key_token() {
		let err = AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![1, 2, 3], Uuid::nil());
		assert!(err.is_err());
	}

	#[test]
	fn equality_is_name_based() {
		let a = AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::nil()).unwrap();
		let b = AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], Uuid::new_v4()).unwrap();
		assert_eq!(a, b, "module guid does not participate in assembly identity");
	}
}
