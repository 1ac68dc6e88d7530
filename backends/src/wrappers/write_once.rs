//! Enforces "first write wins" over an inner store: a write to an existing
//! key is silently dropped rather than applied, with an optional sampled
//! check that the dropped value actually matched what's already there.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::Bytes;

/// Wraps `inner` with first-write-wins policy: `set`/`set_item_if` on an
/// already-present key is a silent no-op (the `KEEP_CURRENT` joker
/// semantics) rather than an overwrite, and `discard`/`discard_if` always
/// raise. A configured sampling rate ([`persidict_core::StoreConfig::with_consistency_check_rate`])
/// probabilistically checks a dropped write's value against what's already
/// stored, raising [`PersiDictError::MutationPolicy`] on a mismatch. Meant
/// to sit above the caching wrappers, so a dropped write never needs to
/// touch `inner` beyond the existence check.
pub struct WriteOnceWrapper {
	inner: Arc<dyn PersiDict>,
	p_consistency_checks: f64,
}

impl WriteOnceWrapper {
	/// Wraps `inner` with no consistency sampling.
	pub fn new(inner: Arc<dyn PersiDict>) -> Arc<Self> {
		Arc::new(WriteOnceWrapper { inner, p_consistency_checks: 0.0 })
	}

	/// Wraps `inner`, sampling a fraction `p_consistency_checks` (clamped to
	/// `[0.0, 1.0]`) of dropped writes for a value-equality check against
	/// the existing stored value.
	pub fn with_consistency_check_rate(inner: Arc<dyn PersiDict>, p_consistency_checks: f64) -> Arc<Self> {
		Arc::new(WriteOnceWrapper { inner, p_consistency_checks: p_consistency_checks.clamp(0.0, 1.0) })
	}

	fn should_sample(&self) -> bool {
		self.p_consistency_checks > 0.0 && rand::thread_rng().gen::<f64>() < self.p_consistency_checks
	}

	async fn check_consistency(&self, key: &SafeKey, proposed: &Bytes) -> Result<(), PersiDictError> {
		if !self.should_sample() {
			return Ok(());
		}
		let existing = self.inner.get(key).await?;
		if &existing != proposed {
			return Err(PersiDictError::MutationPolicy(format!(
				"write-once consistency check failed for {}: repeated write carried a different value",
				key
			)));
		}
		Ok(())
	}

	fn rejected(operation: &str) -> PersiDictError {
		PersiDictError::MutationPolicy(format!("{} is rejected: this store is write-once", operation))
	}
}

#[async_trait]
impl PersiDict for WriteOnceWrapper {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		self.inner.get(key).await
	}

	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError> {
		match value {
			ValueInput::KeepCurrent => Ok(()),
			ValueInput::DeleteCurrent => Err(Self::rejected("deleting a key")),
			ValueInput::Real(bytes) => {
				if self.inner.contains(key).await? {
					self.check_consistency(key, &bytes).await?;
					return Ok(());
				}
				self.inner.set(key, ValueInput::Real(bytes)).await
			},
		}
	}

	async fn discard(&self, _key: &SafeKey) -> Result<bool, PersiDictError> {
		Err(Self::rejected("deleting a key"))
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		self.inner.contains(key).await
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		self.inner.len().await
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		self.inner.etag(key).await
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		self.inner.timestamp(key).await
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		self.inner.keys().await
	}

	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
		self.inner.random_key().await
	}

	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.inner.oldest_keys(n).await
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.inner.newest_keys(n).await
	}

	fn get_subdict(self: Arc<Self>, prefix: SafeKey) -> Arc<dyn PersiDict> {
		make_subdict_view(self, prefix)
	}

	async fn subdicts(self: Arc<Self>) -> Result<Vec<(SafeKey, Arc<dyn PersiDict>)>, PersiDictError> {
		list_subdicts(self).await
	}

	async fn get_item_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		self.inner.get_item_if(key, expected_etag, condition, retrieve).await
	}

	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		if matches!(value, ValueInput::DeleteCurrent) {
			return Err(Self::rejected("deleting a key"));
		}
		if let ValueInput::Real(bytes) = &value {
			if self.inner.contains(key).await? {
				self.check_consistency(key, bytes).await?;
				return self.inner.get_item_if(key, expected_etag, condition, retrieve).await;
			}
		}
		self.inner.set_item_if(key, value, expected_etag, condition, retrieve).await
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		// setdefault_if is already first-write-wins by construction: no
		// extra policy enforcement needed beyond delegating.
		self.inner.setdefault_if(key, default_value, expected_etag, condition, retrieve).await
	}

	async fn discard_if(
		&self, _key: &SafeKey, _expected_etag: EtagSlot, _condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError> {
		Err(Self::rejected("deleting a key"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryBackend;

	fn make_wrapper() -> Arc<WriteOnceWrapper> {
		WriteOnceWrapper::new(MemoryBackend::new())
	}

	#[tokio::test]
	async fn first_write_wins_repeated_write_is_silent_noop() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"first"))).await.unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"second"))).await.unwrap();
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"first"));
	}

	#[tokio::test]
	async fn delete_always_rejected() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();
		let err = wrapper.discard(&key).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
	}

	#[tokio::test]
	async fn sampled_consistency_check_catches_mismatch() {
		let wrapper = WriteOnceWrapper::with_consistency_check_rate(MemoryBackend::new(), 1.0);
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"first"))).await.unwrap();
		let err =
			wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"different"))).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
	}

	#[tokio::test]
	async fn sampled_consistency_check_allows_identical_rewrite() {
		let wrapper = WriteOnceWrapper::with_consistency_check_rate(MemoryBackend::new(), 1.0);
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"same"))).await.unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"same"))).await.unwrap();
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"same"));
	}
}
