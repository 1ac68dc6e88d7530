//! Immutable result records returned by the conditional-operation protocol.

use crate::sentinel::{EtagSlot, ValueSlot};

/// The outcome of a conditional read/write/delete
/// (`get_item_if`/`set_item_if`/`setdefault_if`/`discard_if`).
///
/// `resulting_etag` always equals `actual_etag` for `get_item_if` (it never
/// mutates); for the mutating primitives, `resulting_etag` reflects the new
/// ETag on a satisfied write, or `actual_etag` unchanged otherwise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConditionalResult {
	/// Whether the caller-supplied condition held against the actual
	/// current ETag at evaluation time.
	pub condition_was_satisfied: bool,
	/// The actual current ETag at the instant the backend checked.
	pub actual_etag: EtagSlot,
	/// The ETag in effect after this operation completed.
	pub resulting_etag: EtagSlot,
	/// The value carried by this result, per the retrieve-mode rules.
	pub new_value: ValueSlot,
}

/// The outcome of [`crate::persidict`]'s retry-driven transform operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationResult {
	/// The ETag in effect after the transform committed.
	pub resulting_etag: EtagSlot,
	/// The value in effect after the transform committed.
	pub new_value: ValueSlot,
}
