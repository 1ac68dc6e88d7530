//! The condition algebra evaluated against a key's current ETag.

use crate::sentinel::EtagSlot;

/// Selects how an expected ETag is compared against the actual current
/// ETag when evaluating a conditional operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConditionFlag {
	/// Satisfied unconditionally.
	AnyEtag,
	/// Satisfied iff `expected == actual` (identity for the
	/// `ITEM_NOT_AVAILABLE` sentinel, value equality for tag strings).
	EtagIsTheSame,
	/// Satisfied iff `expected != actual`.
	EtagHasChanged,
}

impl ConditionFlag {
	/// Evaluates this condition against an expected and an actual ETag.
	pub fn is_satisfied(self, expected: &EtagSlot, actual: &EtagSlot) -> bool {
		match self {
			ConditionFlag::AnyEtag => true,
			ConditionFlag::EtagIsTheSame => expected == actual,
			ConditionFlag::EtagHasChanged => expected != actual,
		}
	}
}

/// Selects whether a conditional read fetches the current value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RetrieveMode {
	/// Always fetch the value when the key exists.
	AlwaysRetrieve,
	/// Fetch the value only when the actual ETag differs from the expected
	/// one.
	IfEtagChanged,
	/// Never fetch the value.
	NeverRetrieve,
}

impl RetrieveMode {
	/// Returns `true` if, given `expected` vs. `actual`, this mode calls for
	/// a fetch. Only meaningful when the key is known to exist; callers
	/// must special-case the absent-key path themselves (§4.2: when the key
	/// is absent, the value is never fetched regardless of mode).
	pub fn should_retrieve(self, expected: &EtagSlot, actual: &EtagSlot) -> bool {
		match self {
			RetrieveMode::AlwaysRetrieve => true,
			RetrieveMode::IfEtagChanged => expected != actual,
			RetrieveMode::NeverRetrieve => false,
		}
	}
}

impl Default for RetrieveMode {
	fn default() -> Self {
		RetrieveMode::IfEtagChanged
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn any_etag_always_satisfied() {
		assert!(ConditionFlag::AnyEtag.is_satisfied(&EtagSlot::NotAvailable, &EtagSlot::NotAvailable));
		assert!(ConditionFlag::AnyEtag
			.is_satisfied(&EtagSlot::Tag("a".into()), &EtagSlot::Tag("b".into())));
	}

	#[test]
	fn etag_is_the_same_absent_sentinel() {
		assert!(ConditionFlag::EtagIsTheSame
			.is_satisfied(&EtagSlot::NotAvailable, &EtagSlot::NotAvailable));
		assert!(!ConditionFlag::EtagIsTheSame
			.is_satisfied(&EtagSlot::NotAvailable, &EtagSlot::Tag("a".into())));
	}

	#[test]
	fn etag_has_changed_with_absent_expected() {
		assert!(ConditionFlag::EtagHasChanged
			.is_satisfied(&EtagSlot::NotAvailable, &EtagSlot::Tag("a".into())));
		assert!(!ConditionFlag::EtagHasChanged
			.is_satisfied(&EtagSlot::NotAvailable, &EtagSlot::NotAvailable));
	}
}
