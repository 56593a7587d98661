use std::fmt::{Display, Formatter};

use crate::descriptor::FieldDriftKind;

/// Every failure the core can surface at the caller boundary.
///
/// Errors never unwind silently: a write/read aborts the current
/// operation and this is reported atomically to the caller.
#[derive(Debug)]
pub enum WireError {
	WrongMagic([u8; 3]),
	WrongVersion(u8),

	StreamCorrupted(&'static str),

	TypeStructureChanged {
		type_name: String,
		field_name: String,
		drift: FieldDriftKind,
	},

	AssemblyResolveFailure(String),

	IllegalStateAfterUse,

	InvariantViolation(&'static str),

	Io(std::io::Error),
}

impl Display for WireError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::WrongMagic(bytes) => write!(f, "wrong stream magic: {bytes:02X?}"),
			Self::WrongVersion(v) => write!(f, "unsupported stream version: {v}"),
			Self::StreamCorrupted(reason) => write!(f, "stream corrupted: {reason}"),
			Self::TypeStructureChanged { type_name, field_name, drift } => {
				write!(f, "type `{type_name}` structure changed at field `{field_name}`: {drift:?}")
			}
			Self::AssemblyResolveFailure(name) => write!(f, "could not resolve assembly `{name}`"),
			Self::IllegalStateAfterUse => write!(f, "swap table mutated after first use"),
			Self::InvariantViolation(reason) => write!(f, "internal invariant violated: {reason}"),
			Self::Io(err) => write!(f, "I/O error: {err}"),
		}
	}
}

impl std::error::Error for WireError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<std::io::Error> for WireError {
	fn from(value: std::io::Error) -> Self {
		Self::Io(value)
	}
}

pub type Result<T> = std::result::Result<T, WireError>;
