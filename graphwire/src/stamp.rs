//! The version-tolerance comparator: reconciles a type descriptor read
//! off the stream (`prev`) against the type discovered in the running
//! environment (`cur`) and produces an ordered read plan.

use std::sync::Arc;

use crate::descriptor::{FieldDriftKind, TypeDescriptor, TypeRef};
use crate::error::{Result, WireError};
use crate::registry::VersionTolerance;

/// One instruction in a [`ReadPlan`], in the *stream's* field order —
/// the only order the byte sequence can be decoded in.
#[derive(Debug, Clone)]
pub enum ReadPlanEntry {
	/// Decode the next field from the stream and assign it to the
	/// runtime field at this index.
	Read { field_index: usize },
	/// Decode the next field from the stream and discard it. Recursive
	/// descent into the value still allocates identities and stamps
	/// types normally. `field_type` is the stream's declared type for
	/// the field, needed to know whether skipping it means discarding
	/// one inline primitive or one identity-tracked
	/// [`crate::object::Link`].
	Skip { field_name: String, field_type: TypeRef, by_reference: bool },
	/// No bytes are consumed; the target re-initializes this field the
	/// way its own construction logic would. Always appended at the
	/// end of the plan, after every stream-driven entry.
	ConstructorInit { field_index: usize },
}

#[derive(Debug, Default, Clone)]
pub struct ReadPlan(pub Vec<ReadPlanEntry>);

pub struct StampComparator;

impl StampComparator {
	/// Reconciles a stream-read type shape against the runtime shape in
	/// seven steps: module identity, base type, assembly version, field
	/// additions, field removals, field type changes, then assembles
	/// the ordered read plan.
	pub fn compare(prev: &TypeDescriptor, cur: &Arc<TypeDescriptor>, tolerance: VersionTolerance) -> Result<ReadPlan> {
		// Step 1/2: identical module guid means byte-identical structure,
		// skip the field-by-field comparison entirely.
		let structurally_identical = cur.assembly.module_guid == prev.assembly.module_guid;
		if !structurally_identical && !tolerance.contains(VersionTolerance::ALLOW_GUID_CHANGE) {
			return Err(drift_error(cur, "<module>", FieldDriftKind::ModuleGuidChanged));
		}

		// Step 5: base type identity.
		let base_matches = match (&prev.base_type, &cur.base_type) {
			(None, None) => true,
			(Some(a), Some(b)) => a.assembly_qualified_name() == b.assembly_qualified_name(),
			_ => false,
		};
		if !base_matches && !tolerance.contains(VersionTolerance::ALLOW_INHERITANCE_CHAIN_CHANGE) {
			return Err(drift_error(cur, "<base>", FieldDriftKind::BaseTypeChanged));
		}

		// Step 6: assembly version drift.
		if prev.assembly.version != cur.assembly.version && !tolerance.contains(VersionTolerance::ALLOW_ASSEMBLY_VERSION_CHANGE) {
			return Err(drift_error(cur, "<assembly>", FieldDriftKind::AssemblyVersionChanged));
		}

		// Step 3/4: walk cur's non-transient fields, removing matches from
		// a working copy of prev's fields; what is left over is removed.
		let mut remaining_prev: Vec<&crate::descriptor::FieldDescriptor> = prev.fields.iter().collect();
		let mut fields_added = Vec::new();
		let mut fields_changed = Vec::new();

		for (_, field) in cur.non_transient_fields() {
			match remaining_prev.iter().position(|f| f.name == field.name) {
				None => fields_added.push(field.name.clone()),
				Some(index) => {
					let prev_field = remaining_prev.remove(index);
					if prev_field.field_type != field.field_type || prev_field.by_reference != field.by_reference {
						fields_changed.push(field.name.clone());
					}
				}
			}
		}
		let fields_removed: Vec<String> = remaining_prev.iter().map(|f| f.name.clone()).collect();

		// Field type changes are always fatal, regardless of tolerance.
		if let Some(name) = fields_changed.into_iter().next() {
			return Err(WireError::TypeStructureChanged { type_name: cur.full_name.clone(), field_name: name, drift: FieldDriftKind::TypeChanged });
		}
		if !fields_added.is_empty() && !tolerance.contains(VersionTolerance::ALLOW_FIELD_ADDITION) {
			return Err(WireError::TypeStructureChanged {
				type_name: cur.full_name.clone(),
				field_name: fields_added[0].clone(),
				drift: FieldDriftKind::Added,
			});
		}
		if !fields_removed.is_empty() && !tolerance.contains(VersionTolerance::ALLOW_FIELD_REMOVAL) {
			return Err(WireError::TypeStructureChanged {
				type_name: cur.full_name.clone(),
				field_name: fields_removed[0].clone(),
				drift: FieldDriftKind::Removed,
			});
		}

		// Build the plan in stream field order: for every field prev
		// wrote, either Read (a matching cur field exists) or Skip (cur
		// dropped it).
		let mut plan = Vec::with_capacity(prev.fields.len() + fields_added.len());
		for prev_field in &prev.fields {
			match cur.fields.iter().position(|f| f.name == prev_field.name && !f.transient) {
				Some(field_index) => plan.push(ReadPlanEntry::Read { field_index }),
				None => plan.push(ReadPlanEntry::Skip {
					field_name: prev_field.name.clone(),
					field_type: prev_field.field_type.clone(),
					by_reference: prev_field.by_reference,
				}),
			}
		}

		// Fields cur added (not present in prev) and any transient,
		// constructor-recreated field never consume stream bytes; they
		// are appended at the end in cur's declared order.
		for (field_index, field) in cur.fields.iter().enumerate() {
			let newly_added = fields_added.contains(&field.name);
			let transient_constructor_recreated = field.transient && field.constructor_recreated;
			if newly_added || transient_constructor_recreated {
				plan.push(ReadPlanEntry::ConstructorInit { field_index });
			}
		}

		Ok(ReadPlan(plan))
	}
}

fn drift_error(cur: &TypeDescriptor, field_name: &str, drift: FieldDriftKind) -> WireError {
	WireError::TypeStructureChanged { type_name: cur.full_name.clone(), field_name: field_name.to_string(), drift }
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use uuid::Uuid;

	use crate::descriptor::{AssemblyDescriptor, FieldDescriptor, TypeDescriptorKind, TypeRef};

	use super::*;

	fn i32_ref() -> TypeRef {
		TypeRef::Concrete { assembly: "graphwire".into(), full_name: "i32".into() }
	}

	fn assembly(guid: Uuid) -> Arc<AssemblyDescriptor> {
		Arc::new(AssemblyDescriptor::new("Core", [1, 0, 0, 0], "", vec![], guid).unwrap())
	}

	fn make(fields: Vec<FieldDescriptor>, guid: Uuid) -> Arc<TypeDescriptor> {
		Arc::new(TypeDescriptor {
			full_name: "Widget".into(),
			assembly: assembly(guid),
			generic_args: vec![],
			base_type: None,
			fields,
			kind: TypeDescriptorKind::UserObject,
		})
	}

	#[test]
	fn field_addition_requires_flag() {
		let guid = Uuid::new_v4();
		let prev = make(vec![FieldDescriptor::new("Widget", "x", i32_ref())], guid);
		let cur = make(
			vec![FieldDescriptor::new("Widget", "x", i32_ref()), FieldDescriptor::new("Widget", "y", i32_ref())],
			guid,
		);

		let err = StampComparator::compare(&prev, &cur, VersionTolerance::empty());
		assert!(matches!(err, Err(WireError::TypeStructureChanged { field_name, .. }) if field_name == "y"));

		let plan = StampComparator::compare(&prev, &cur, VersionTolerance::ALLOW_FIELD_ADDITION).unwrap();
		assert!(matches!(plan.0.last(), Some(ReadPlanEntry::ConstructorInit { field_index: 1 })));
	}

	#[test]
	fn field_removal_requires_flag() {
		let guid = Uuid::new_v4();
		let prev = make(
			vec![FieldDescriptor::new("Widget", "x", i32_ref()), FieldDescriptor::new("Widget", "y", i32_ref())],
			guid,
		);
		let cur = make(vec![FieldDescriptor::new("Widget", "x", i32_ref())], guid);

		let err = StampComparator::compare(&prev, &cur, VersionTolerance::empty());
		assert!(matches!(err, Err(WireError::TypeStructureChanged { field_name, .. }) if field_name == "y"));

		let plan = StampComparator::compare(&prev, &cur, VersionTolerance::ALLOW_FIELD_REMOVAL).unwrap();
		assert_eq!(plan.0.len(), 2);
		assert!(matches!(&plan.0[0], ReadPlanEntry::Read { field_index: 0 }));
		assert!(matches!(&plan.0[1], ReadPlanEntry::Skip { field_name, .. } if field_name == "y"));
	}

	#[test]
	fn field_type_change_is_always_fatal() {
		let guid = Uuid::new_v4();
		let string_ref = TypeRef::Concrete { assembly: "graphwire".into(), full_name: "String".into() };
		let prev = make(vec![FieldDescriptor::new("Widget", "x", i32_ref())], guid);
		let cur = make(vec![FieldDescriptor::new("Widget", "x", string_ref)], guid);

		let err = StampComparator::compare(&prev, &cur, VersionTolerance::all());
		assert!(matches!(err, Err(WireError::TypeStructureChanged { drift: FieldDriftKind::TypeChanged, .. })));
	}
}
