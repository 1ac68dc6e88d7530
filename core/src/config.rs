//! Per-instance configuration shared across backends and wrappers.
//!
//! This is a library, not the teacher's standalone server binary, so
//! configuration is an ordinary constructor argument rather than a
//! TOML/env-var file format: each field below is a typed constructor
//! parameter on the relevant backend or wrapper, not a schema.

use std::sync::Arc;

use crate::codec::{Codec, RawBytesCodec};

/// A runtime `isinstance`-equivalent predicate applied to every incoming
/// value before a write is accepted.
///
/// Most Rust call sites get this check for free from the type system
/// (`Bytes` admits any byte sequence), so this exists mainly for backends
/// that layer an additional structural constraint on top, e.g. "values must
/// decode under the configured codec".
pub type ValuePredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Per-instance configuration for a backend or wrapper.
///
/// Construct with [`StoreConfig::new`] and customize with the builder
/// methods; every field has a sensible default so most callers only need to
/// override one or two.
#[derive(Clone)]
pub struct StoreConfig {
	codec: Arc<dyn Codec>,
	base_class_for_values: Option<ValuePredicate>,
	append_only: bool,
	digest_len: usize,
	p_consistency_checks: f64,
	n_retries: Option<u32>,
}

impl StoreConfig {
	/// Builds a configuration with the raw-bytes codec and every policy
	/// flag at its least restrictive default.
	pub fn new() -> Self {
		StoreConfig {
			codec: Arc::new(RawBytesCodec),
			base_class_for_values: None,
			append_only: false,
			digest_len: 8,
			p_consistency_checks: 0.0,
			n_retries: Some(10),
		}
	}

	/// Sets the serialization format, selecting both codec and the file
	/// extension backends append to rendered keys.
	pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
		self.codec = codec;
		self
	}

	/// Sets the optional value base-type constraint. `set`/`set_item_if`
	/// reject a value for which `predicate` returns `false` with
	/// [`crate::error::PersiDictError::InvalidArgument`].
	pub fn with_base_class_for_values(mut self, predicate: ValuePredicate) -> Self {
		self.base_class_for_values = Some(predicate);
		self
	}

	/// Sets the append-only flag: writes to existing keys and deletes
	/// become policy errors.
	pub fn with_append_only(mut self, append_only: bool) -> Self {
		self.append_only = append_only;
		self
	}

	/// Sets the digest-suffix length, in hex characters. `FileDirBackend`
	/// only; `0` disables suffixing.
	pub fn with_digest_len(mut self, digest_len: usize) -> Self {
		self.digest_len = digest_len;
		self
	}

	/// Sets `WriteOnceWrapper`'s sampling probability for its
	/// value-equality consistency check on repeated writes, in `[0.0, 1.0]`.
	pub fn with_consistency_check_rate(mut self, p: f64) -> Self {
		self.p_consistency_checks = p.clamp(0.0, 1.0);
		self
	}

	/// Sets `TransformEngine`'s retry budget. `None` means unbounded.
	pub fn with_n_retries(mut self, n_retries: Option<u32>) -> Self {
		self.n_retries = n_retries;
		self
	}

	/// The configured codec.
	pub fn codec(&self) -> Arc<dyn Codec> {
		self.codec.clone()
	}

	/// The configured value predicate, if any.
	pub fn base_class_for_values(&self) -> Option<&ValuePredicate> {
		self.base_class_for_values.as_ref()
	}

	/// Whether append-only policy is active.
	pub fn append_only(&self) -> bool {
		self.append_only
	}

	/// The digest-suffix length in hex characters.
	pub fn digest_len(&self) -> usize {
		self.digest_len
	}

	/// `WriteOnceWrapper`'s consistency-check sampling probability.
	pub fn p_consistency_checks(&self) -> f64 {
		self.p_consistency_checks
	}

	/// `TransformEngine`'s retry budget.
	pub fn n_retries(&self) -> Option<u32> {
		self.n_retries
	}
}

impl Default for StoreConfig {
	fn default() -> Self {
		StoreConfig::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_permissive() {
		let cfg = StoreConfig::new();
		assert!(!cfg.append_only());
		assert!(cfg.base_class_for_values().is_none());
		assert_eq!(cfg.p_consistency_checks(), 0.0);
	}

	#[test]
	fn consistency_check_rate_is_clamped() {
		let cfg = StoreConfig::new().with_consistency_check_rate(3.0);
		assert_eq!(cfg.p_consistency_checks(), 1.0);
		let cfg = StoreConfig::new().with_consistency_check_rate(-1.0);
		assert_eq!(cfg.p_consistency_checks(), 0.0);
	}
}
