//! Keeps a value-cache and an ETag-cache coherent with a *main* backend via
//! the conditional-operation protocol, so repeated reads of an unchanged key
//! cost one ETag comparison against `main` rather than a full value fetch.

use std::sync::Arc;

use async_trait::async_trait;

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput, ValueSlot};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::Bytes;

/// Wraps `main` with a value-cache and an ETag-cache, each itself an
/// ordinary [`PersiDict`] (typically a `MemoryBackend`). Every mutating
/// operation is routed through `main`'s conditional or unconditional
/// surface first; the caches only ever reflect state `main` has confirmed.
pub struct MutableCacheWrapper {
	main: Arc<dyn PersiDict>,
	value_cache: Arc<dyn PersiDict>,
	etag_cache: Arc<dyn PersiDict>,
}

impl MutableCacheWrapper {
	/// Wraps `main`, backing reads with `value_cache`/`etag_cache`.
	pub fn new(
		main: Arc<dyn PersiDict>, value_cache: Arc<dyn PersiDict>, etag_cache: Arc<dyn PersiDict>,
	) -> Arc<Self> {
		Arc::new(MutableCacheWrapper { main, value_cache, etag_cache })
	}

	async fn cached_etag(&self, key: &SafeKey) -> Result<EtagSlot, PersiDictError> {
		match self.etag_cache.get(key).await {
			Ok(bytes) => Ok(EtagSlot::Tag(String::from_utf8_lossy(&bytes).into_owned())),
			Err(PersiDictError::KeyMissing(_)) => Ok(EtagSlot::NotAvailable),
			Err(e) => Err(e),
		}
	}

	async fn cached_value(&self, key: &SafeKey) -> Result<Option<Bytes>, PersiDictError> {
		match self.value_cache.get(key).await {
			Ok(v) => Ok(Some(v)),
			Err(PersiDictError::KeyMissing(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn store_in_cache(&self, key: &SafeKey, value: Bytes, etag: &str) -> Result<(), PersiDictError> {
		self.value_cache.set(key, ValueInput::Real(value)).await?;
		self.etag_cache.set(key, ValueInput::Real(Bytes::from(etag.to_string()))).await?;
		Ok(())
	}

	async fn evict_cache(&self, key: &SafeKey) -> Result<(), PersiDictError> {
		self.value_cache.discard(key).await?;
		self.etag_cache.discard(key).await?;
		Ok(())
	}

	/// Mirrors a read-only outcome into the caches: a freshly retrieved real
	/// value is cached against the ETag it was read at, an absent key
	/// evicts, and `NotRetrieved` leaves the caches untouched since nothing
	/// new was learned about `main`'s state.
	async fn sync_from_read(
		&self, key: &SafeKey, actual_etag: &EtagSlot, new_value: &ValueSlot,
	) -> Result<(), PersiDictError> {
		match (new_value, actual_etag.as_str()) {
			(ValueSlot::Real(v), Some(tag)) => self.store_in_cache(key, v.clone(), tag).await,
			(ValueSlot::NotAvailable, _) => self.evict_cache(key).await,
			_ => Ok(()),
		}
	}

	/// Applies a mutating conditional result to the caches. On a satisfied
	/// write, caches the value that was actually proposed (the result's own
	/// `new_value` is `VALUE_NOT_RETRIEVED` on a write, never the written
	/// bytes); on a failed one, falls back to mirroring whatever `main`
	/// reported about its actual current state.
	async fn apply_write(
		&self, key: &SafeKey, proposed: &ValueInput, result: &ConditionalResult,
	) -> Result<(), PersiDictError> {
		if result.condition_was_satisfied {
			match proposed {
				ValueInput::Real(bytes) => {
					if let Some(tag) = result.resulting_etag.as_str() {
						self.store_in_cache(key, bytes.clone(), tag).await?;
					}
				},
				ValueInput::DeleteCurrent => self.evict_cache(key).await?,
				ValueInput::KeepCurrent => {},
			}
			Ok(())
		} else {
			self.sync_from_read(key, &result.actual_etag, &result.new_value).await
		}
	}
}

#[async_trait]
impl PersiDict for MutableCacheWrapper {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		let cached_etag = self.cached_etag(key).await?;
		let result = self
			.main
			.get_item_if(key, cached_etag.clone(), ConditionFlag::EtagHasChanged, RetrieveMode::IfEtagChanged)
			.await?;

		if result.condition_was_satisfied {
			self.sync_from_read(key, &result.actual_etag, &result.new_value).await?;
			result.new_value.into_real().ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
		} else if cached_etag.is_present() {
			self.cached_value(key).await?.ok_or_else(|| {
				PersiDictError::backend_failure_for_key(
					"MutableCacheWrapper",
					"get",
					key.to_string(),
					"value-cache and etag-cache diverged",
				)
			})
		} else {
			Err(PersiDictError::KeyMissing(key.to_string()))
		}
	}

	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError> {
		let result = self
			.main
			.set_item_if(key, value.clone(), EtagSlot::NotAvailable, ConditionFlag::AnyEtag, RetrieveMode::NeverRetrieve)
			.await?;
		self.apply_write(key, &value, &result).await
	}

	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		let removed = self.main.discard(key).await?;
		self.evict_cache(key).await?;
		Ok(removed)
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		self.main.contains(key).await
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		self.main.len().await
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		self.main.etag(key).await
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		self.main.timestamp(key).await
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		self.main.keys().await
	}

	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
		self.main.random_key().await
	}

	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.main.oldest_keys(n).await
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.main.newest_keys(n).await
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
		let result = self.main.get_item_if(key, expected_etag, condition, retrieve).await?;
		self.sync_from_read(key, &result.actual_etag, &result.new_value).await?;
		Ok(result)
	}

	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		let result = self.main.set_item_if(key, value.clone(), expected_etag, condition, retrieve).await?;
		self.apply_write(key, &value, &result).await?;
		Ok(result)
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		let result = self
			.main
			.setdefault_if(key, default_value.clone(), expected_etag, condition, retrieve)
			.await?;
		self.apply_write(key, &ValueInput::Real(default_value), &result).await?;
		Ok(result)
	}

	async fn discard_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError> {
		let result = self.main.discard_if(key, expected_etag, condition).await?;
		if result.condition_was_satisfied {
			self.evict_cache(key).await?;
		} else {
			self.sync_from_read(key, &result.actual_etag, &result.new_value).await?;
		}
		Ok(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryBackend;

	fn make_wrapper() -> Arc<MutableCacheWrapper> {
		MutableCacheWrapper::new(MemoryBackend::new(), MemoryBackend::new(), MemoryBackend::new())
	}

	persidict_core::define_persidict_tests!(MutableCacheConformanceTest, MutableCacheWrapper, make_wrapper());

	#[tokio::test]
	async fn repeated_get_skips_refetch_when_etag_unchanged() {
		let main = MemoryBackend::new();
		let value_cache = MemoryBackend::new();
		let etag_cache = MemoryBackend::new();
		let key = SafeKey::from_single("k").unwrap();
		main.set(&key, ValueInput::Real(Bytes::from_static(b"v1"))).await.unwrap();

		let wrapper = MutableCacheWrapper::new(main.clone(), value_cache.clone(), etag_cache.clone());
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"v1"));
		assert_eq!(value_cache.get(&key).await.unwrap(), Bytes::from_static(b"v1"));
		assert_eq!(etag_cache.get(&key).await.unwrap(), Bytes::from(main.etag(&key).await.unwrap()));

		// Second read hits the cache: verify it still returns the right
		// value even with the caches as the only visible evidence.
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"v1"));
	}

	#[tokio::test]
	async fn write_through_then_read_sees_new_value_and_cache() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v1"))).await.unwrap();
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"v1"));

		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v2"))).await.unwrap();
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"v2"));
	}

	#[tokio::test]
	async fn discard_evicts_cache() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v1"))).await.unwrap();
		wrapper.get(&key).await.unwrap();
		assert!(wrapper.discard(&key).await.unwrap());
		assert!(wrapper.get(&key).await.is_err());
	}

	#[tokio::test]
	async fn failed_conditional_write_never_caches_proposed_value() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"real"))).await.unwrap();
		let etag = wrapper.etag(&key).await.unwrap();

		let result = wrapper
			.set_item_if(
				&key,
				ValueInput::Real(Bytes::from_static(b"rejected")),
				EtagSlot::NotAvailable,
				ConditionFlag::EtagIsTheSame,
				RetrieveMode::NeverRetrieve,
			)
			.await
			.unwrap();
		assert!(!result.condition_was_satisfied);
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"real"));
		assert_eq!(wrapper.etag(&key).await.unwrap(), etag);
	}
}
