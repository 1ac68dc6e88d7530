use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

/// The error taxonomy raised by the core and its backends.
///
/// Conditional operations (`get_item_if`/`set_item_if`/`setdefault_if`/
/// `discard_if`) never raise for "condition not satisfied" — that outcome
/// is carried in the returned [`crate::results::ConditionalResult`]
/// instead. These variants are reserved for the cases the propagation
/// policy calls out: missing keys on the unconditional surface, rejected
/// mutations, retry exhaustion, and backend/infrastructure failure.
#[derive(Debug)]
pub enum PersiDictError {
	/// Raised by unconditional `get`/`etag`/`timestamp` when the key is
	/// absent. Carries a description of the missing key.
	KeyMissing(String),

	/// The request itself was malformed: an invalid `SafeKey` component,
	/// a joker passed where one is rejected, or an argument out of its
	/// documented range. Modeled after the teacher's
	/// `VssError::InvalidRequestError`.
	InvalidArgument(String),

	/// The store's policy forbids the mutation (append-only overwrite or
	/// delete, write-once overwrite with a different value, read-only
	/// view). Names the policy, not the operation.
	MutationPolicy(String),

	/// Retry exhaustion inside a conditional read-modify-write loop built
	/// atop the four conditional primitives.
	ConcurrencyConflict {
		/// A description of the key being transformed.
		key: String,
		/// The number of attempts made before giving up.
		attempts: u32,
	},

	/// Any backend/infrastructure failure that is not a missing-key
	/// condition: permissions, network, auth, or corruption detected by
	/// the backend.
	BackendFailure {
		/// The backend that raised the failure (e.g. `"FileDirBackend"`).
		backend: String,
		/// The operation in progress when the failure occurred.
		operation: String,
		/// The key involved, if the failure is scoped to one item.
		key: Option<String>,
		/// A human-readable description of the underlying cause.
		cause: String,
	},
}

impl Display for PersiDictError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			PersiDictError::KeyMissing(key) => {
				write!(f, "Requested key does not exist: {}", key)
			},
			PersiDictError::InvalidArgument(message) => {
				write!(f, "Invalid argument: {}", message)
			},
			PersiDictError::MutationPolicy(message) => {
				write!(f, "Mutation rejected by policy: {}", message)
			},
			PersiDictError::ConcurrencyConflict { key, attempts } => {
				write!(f, "Concurrency conflict on {} after {} attempts", key, attempts)
			},
			PersiDictError::BackendFailure { backend, operation, key: Some(key), cause } => {
				write!(f, "{} failed during {} on {}: {}", backend, operation, key, cause)
			},
			PersiDictError::BackendFailure { backend, operation, key: None, cause } => {
				write!(f, "{} failed during {}: {}", backend, operation, cause)
			},
		}
	}
}

impl Error for PersiDictError {}

impl From<io::Error> for PersiDictError {
	fn from(err: io::Error) -> Self {
		PersiDictError::BackendFailure {
			backend: "unknown".to_string(),
			operation: "io".to_string(),
			key: None,
			cause: err.to_string(),
		}
	}
}

impl PersiDictError {
	/// Builds a [`PersiDictError::BackendFailure`] naming the backend and
	/// operation explicitly, with no particular key implicated.
	pub fn backend_failure(
		backend: impl Into<String>, operation: impl Into<String>,
		cause: impl std::fmt::Display,
	) -> Self {
		PersiDictError::BackendFailure {
			backend: backend.into(),
			operation: operation.into(),
			key: None,
			cause: cause.to_string(),
		}
	}

	/// Builds a [`PersiDictError::BackendFailure`] scoped to a single key.
	pub fn backend_failure_for_key(
		backend: impl Into<String>, operation: impl Into<String>, key: impl Into<String>,
		cause: impl std::fmt::Display,
	) -> Self {
		PersiDictError::BackendFailure {
			backend: backend.into(),
			operation: operation.into(),
			key: Some(key.into()),
			cause: cause.to_string(),
		}
	}
}
