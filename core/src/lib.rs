//! Hosts the concurrency-and-consistency contract for persidict.
//!
//! persidict is a persistent, hierarchical key-value store designed for
//! concurrent access by many processes, across many machines, sharing a
//! common storage substrate (local filesystem or an S3-compatible object
//! store). Each logical item is stored as one addressable blob; keys are
//! sequences of URL/filename-safe strings and form a directory-like
//! namespace.
//!
//! This crate defines the contract every backend must honor: the key model
//! ([`safe_key`]), the sentinel/joker vocabulary ([`sentinel`]), the
//! ETag-based conditional-operation protocol ([`condition`], [`results`]),
//! the [`persidict::PersiDict`] trait itself, the error taxonomy
//! ([`error`]), the external codec contract ([`codec`]), and per-instance
//! configuration ([`config`]). Concrete backends and composable wrappers
//! live in the `backends` crate.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

/// Contains [`codec::Codec`], the external value-serialization contract.
pub mod codec;
/// Contains the condition algebra ([`condition::ConditionFlag`],
/// [`condition::RetrieveMode`]) used by the conditional-operation protocol.
pub mod condition;
/// Contains the conformance test suite every [`persidict::PersiDict`]
/// implementation is expected to pass.
pub mod conformance;
/// Contains per-instance configuration shared across backends and wrappers.
pub mod config;
/// Implements [`error::PersiDictError`], the error taxonomy raised by the
/// core and its backends.
pub mod error;
/// Contains [`persidict::PersiDict`], the capability surface every backend
/// and wrapper implements.
pub mod persidict;
/// Contains [`results::ConditionalResult`] and [`results::OperationResult`],
/// the immutable records returned by the conditional-operation protocol.
pub mod results;
/// Contains [`safe_key::SafeKey`], the canonical key representation.
pub mod safe_key;
/// Contains the sentinel/joker vocabulary ([`sentinel::EtagSlot`],
/// [`sentinel::ValueSlot`], [`sentinel::ValueInput`]).
pub mod sentinel;
/// Contains [`subdict::PrefixedView`], a generic `get_subdict` implementation
/// shared by every backend and wrapper.
pub mod subdict;

pub use codec::Codec;
pub use condition::{ConditionFlag, RetrieveMode};
pub use config::StoreConfig;
pub use error::PersiDictError;
pub use persidict::PersiDict;
pub use results::{ConditionalResult, OperationResult};
pub use safe_key::SafeKey;
pub use sentinel::{EtagSlot, ValueInput, ValueSlot};

/// Shared alias for the opaque byte representation of a stored item.
pub type Bytes = bytes::Bytes;
