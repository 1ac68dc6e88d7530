//! A caching wrapper for backends configured append-only: once written, a
//! value never changes, so a cache hit needs no ETag comparison against
//! `main` at all.

use std::sync::Arc;

use async_trait::async_trait;

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::Bytes;

/// Wraps an append-only `main` with a value-cache. Reads that hit the cache
/// skip `main` entirely; `main` is never consulted again for a key once its
/// value has been cached, since append-only values are immutable once
/// written. Deletes and other mutations of an existing value are rejected
/// at the wrapper boundary with [`PersiDictError::MutationPolicy`], since
/// honoring them here could leave a stale, unevictable cache entry behind.
pub struct AppendOnlyCacheWrapper {
	main: Arc<dyn PersiDict>,
	value_cache: Arc<dyn PersiDict>,
}

impl AppendOnlyCacheWrapper {
	/// Wraps `main`, backing reads with `value_cache`. `main` itself is
	/// expected (not enforced here) to be configured append-only.
	pub fn new(main: Arc<dyn PersiDict>, value_cache: Arc<dyn PersiDict>) -> Arc<Self> {
		Arc::new(AppendOnlyCacheWrapper { main, value_cache })
	}

	fn rejected(operation: &str) -> PersiDictError {
		PersiDictError::MutationPolicy(format!(
			"{} is rejected: this is an append-only cache wrapper",
			operation
		))
	}
}

#[async_trait]
impl PersiDict for AppendOnlyCacheWrapper {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		match self.value_cache.get(key).await {
			Ok(value) => Ok(value),
			Err(PersiDictError::KeyMissing(_)) => {
				let value = self.main.get(key).await?;
				self.value_cache.set(key, ValueInput::Real(value.clone())).await?;
				Ok(value)
			},
			Err(e) => Err(e),
		}
	}

	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError> {
		match value {
			ValueInput::KeepCurrent => Ok(()),
			ValueInput::DeleteCurrent => Err(Self::rejected("deleting a key")),
			ValueInput::Real(bytes) => {
				if self.main.contains(key).await? {
					return Err(Self::rejected("overwriting an existing key"));
				}
				self.main.set(key, ValueInput::Real(bytes.clone())).await?;
				self.value_cache.set(key, ValueInput::Real(bytes)).await?;
				Ok(())
			},
		}
	}

	async fn discard(&self, _key: &SafeKey) -> Result<bool, PersiDictError> {
		Err(Self::rejected("deleting a key"))
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		if self.value_cache.contains(key).await? {
			return Ok(true);
		}
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
		self.main.get_item_if(key, expected_etag, condition, retrieve).await
	}

	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		if matches!(value, ValueInput::DeleteCurrent) {
			return Err(Self::rejected("deleting a key"));
		}
		if matches!(value, ValueInput::Real(_)) && self.main.contains(key).await? {
			return Err(Self::rejected("overwriting an existing key"));
		}
		let result = self.main.set_item_if(key, value.clone(), expected_etag, condition, retrieve).await?;
		if result.condition_was_satisfied {
			if let ValueInput::Real(bytes) = value {
				self.value_cache.set(key, ValueInput::Real(bytes)).await?;
			}
		}
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
		if result.condition_was_satisfied {
			self.value_cache.set(key, ValueInput::Real(default_value)).await?;
		}
		Ok(result)
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
	use persidict_core::StoreConfig;

	fn make_wrapper() -> Arc<AppendOnlyCacheWrapper> {
		let main = MemoryBackend::with_config(StoreConfig::new().with_append_only(true));
		AppendOnlyCacheWrapper::new(main, MemoryBackend::new())
	}

	#[tokio::test]
	async fn first_write_then_cached_read_never_touches_main_again() {
		let main = MemoryBackend::with_config(StoreConfig::new().with_append_only(true));
		let cache = MemoryBackend::new();
		let wrapper = AppendOnlyCacheWrapper::new(main.clone(), cache.clone());
		let key = SafeKey::from_single("k").unwrap();

		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"v"));
		assert!(cache.contains(&key).await.unwrap());
	}

	#[tokio::test]
	async fn overwrite_and_delete_are_rejected() {
		let wrapper = make_wrapper();
		let key = SafeKey::from_single("k").unwrap();
		wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();

		let err = wrapper.set(&key, ValueInput::Real(Bytes::from_static(b"v2"))).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));

		let err = wrapper.discard(&key).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));

		let err = wrapper
			.discard_if(&key, EtagSlot::NotAvailable, ConditionFlag::AnyEtag)
			.await
			.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
	}

	#[tokio::test]
	async fn absent_key_miss_falls_through_to_main_and_populates_cache() {
		let main = MemoryBackend::with_config(StoreConfig::new().with_append_only(true));
		let cache = MemoryBackend::new();
		let key = SafeKey::from_single("k").unwrap();
		main.set(&key, ValueInput::Real(Bytes::from_static(b"direct"))).await.unwrap();

		let wrapper = AppendOnlyCacheWrapper::new(main, cache.clone());
		assert_eq!(wrapper.get(&key).await.unwrap(), Bytes::from_static(b"direct"));
		assert!(cache.contains(&key).await.unwrap());
	}
}
