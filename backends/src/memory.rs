//! Process-local [`PersiDict`] backed by a mutex-guarded map.
//!
//! Every mutation is serialized by a single instance-wide
//! `tokio::sync::Mutex`, and the ETag is a single monotonically increasing
//! counter shared across all keys in the instance, not a per-key counter:
//! two successive writes to two different keys still produce two different
//! ETags. This is the simplest backend and the one every conformance test
//! is first written against.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput, ValueSlot};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::{Bytes, StoreConfig};

struct StoredItem {
	value: Bytes,
	etag: u64,
	timestamp_ns: i64,
}

struct MemoryState {
	items: BTreeMap<SafeKey, StoredItem>,
	next_etag: u64,
}

impl MemoryState {
	fn current_etag(&self, key: &SafeKey) -> EtagSlot {
		match self.items.get(key) {
			Some(item) => EtagSlot::Tag(item.etag.to_string()),
			None => EtagSlot::NotAvailable,
		}
	}

	fn bump_etag(&mut self) -> u64 {
		self.next_etag += 1;
		self.next_etag
	}
}

fn now_ns() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}

/// Process-local [`PersiDict`]: a mutex-guarded [`BTreeMap`] with a monotonic
/// per-instance ETag counter. Nothing outlives the process; useful for
/// tests and as a cache layer for the other backends.
pub struct MemoryBackend {
	state: Mutex<MemoryState>,
	config: StoreConfig,
}

impl MemoryBackend {
	/// Builds an empty instance with default configuration.
	pub fn new() -> Arc<Self> {
		Self::with_config(StoreConfig::new())
	}

	/// Builds an empty instance configured by `config`.
	pub fn with_config(config: StoreConfig) -> Arc<Self> {
		Arc::new(MemoryBackend {
			state: Mutex::new(MemoryState { items: BTreeMap::new(), next_etag: 0 }),
			config,
		})
	}

	fn check_value(&self, value: &[u8]) -> Result<(), PersiDictError> {
		if let Some(predicate) = self.config.base_class_for_values() {
			if !predicate(value) {
				return Err(PersiDictError::InvalidArgument(
					"value rejected by configured base_class_for_values predicate".to_string(),
				));
			}
		}
		Ok(())
	}

	fn check_not_append_only(&self, operation: &str) -> Result<(), PersiDictError> {
		if self.config.append_only() {
			Err(PersiDictError::MutationPolicy(format!(
				"{} is rejected: this store is append-only",
				operation
			)))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl PersiDict for MemoryBackend {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		let state = self.state.lock().await;
		state
			.items
			.get(key)
			.map(|item| item.value.clone())
			.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
	}

	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError> {
		match value {
			ValueInput::KeepCurrent => Ok(()),
			ValueInput::DeleteCurrent => {
				self.discard(key).await?;
				Ok(())
			},
			ValueInput::Real(bytes) => {
				self.check_value(&bytes)?;
				let mut state = self.state.lock().await;
				if state.items.contains_key(key) {
					self.check_not_append_only("overwriting an existing key")?;
				}
				let etag = state.bump_etag();
				state.items.insert(
					key.clone(),
					StoredItem { value: bytes, etag, timestamp_ns: now_ns() },
				);
				Ok(())
			},
		}
	}

	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		let mut state = self.state.lock().await;
		if state.items.contains_key(key) {
			self.check_not_append_only("deleting a key")?;
		}
		Ok(state.items.remove(key).is_some())
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		let state = self.state.lock().await;
		Ok(state.items.contains_key(key))
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		let state = self.state.lock().await;
		Ok(state.items.len())
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		let state = self.state.lock().await;
		state
			.items
			.get(key)
			.map(|item| item.etag.to_string())
			.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		let state = self.state.lock().await;
		state
			.items
			.get(key)
			.map(|item| item.timestamp_ns)
			.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		let state = self.state.lock().await;
		Ok(state.items.keys().cloned().collect())
	}

	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
		let state = self.state.lock().await;
		if state.items.is_empty() {
			return Ok(None);
		}
		let idx = state.items.len() / 2;
		Ok(state.items.keys().nth(idx).cloned())
	}

	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		let state = self.state.lock().await;
		let mut entries: Vec<(&SafeKey, i64)> =
			state.items.iter().map(|(k, v)| (k, v.timestamp_ns)).collect();
		entries.sort_by_key(|(_, ts)| *ts);
		Ok(entries.into_iter().take(n).map(|(k, _)| k.clone()).collect())
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		let state = self.state.lock().await;
		let mut entries: Vec<(&SafeKey, i64)> =
			state.items.iter().map(|(k, v)| (k, v.timestamp_ns)).collect();
		entries.sort_by_key(|(_, ts)| std::cmp::Reverse(*ts));
		Ok(entries.into_iter().take(n).map(|(k, _)| k.clone()).collect())
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
		let state = self.state.lock().await;
		let actual_etag = state.current_etag(key);
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		let new_value = match state.items.get(key) {
			None => ValueSlot::NotAvailable,
			Some(item) => {
				if retrieve.should_retrieve(&expected_etag, &actual_etag) {
					ValueSlot::Real(item.value.clone())
				} else {
					ValueSlot::NotRetrieved
				}
			},
		};

		Ok(ConditionalResult {
			condition_was_satisfied: satisfied,
			actual_etag: actual_etag.clone(),
			resulting_etag: actual_etag,
			new_value,
		})
	}

	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		let mut state = self.state.lock().await;
		let actual_etag = state.current_etag(key);
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		if !satisfied {
			let new_value = match state.items.get(key) {
				None => ValueSlot::NotAvailable,
				Some(item) => {
					if retrieve.should_retrieve(&expected_etag, &actual_etag) {
						ValueSlot::Real(item.value.clone())
					} else {
						ValueSlot::NotRetrieved
					}
				},
			};
			return Ok(ConditionalResult {
				condition_was_satisfied: false,
				actual_etag: actual_etag.clone(),
				resulting_etag: actual_etag,
				new_value,
			});
		}

		match value {
			ValueInput::KeepCurrent => Ok(ConditionalResult {
				condition_was_satisfied: true,
				actual_etag: actual_etag.clone(),
				resulting_etag: actual_etag,
				new_value: ValueSlot::NotRetrieved,
			}),
			ValueInput::DeleteCurrent => {
				if state.items.contains_key(key) {
					self.check_not_append_only("deleting a key")?;
				}
				state.items.remove(key);
				Ok(ConditionalResult {
					condition_was_satisfied: true,
					actual_etag,
					resulting_etag: EtagSlot::NotAvailable,
					new_value: ValueSlot::NotAvailable,
				})
			},
			ValueInput::Real(bytes) => {
				self.check_value(&bytes)?;
				if state.items.contains_key(key) {
					self.check_not_append_only("overwriting an existing key")?;
				}
				let etag = state.bump_etag();
				state.items.insert(
					key.clone(),
					StoredItem { value: bytes, etag, timestamp_ns: now_ns() },
				);
				Ok(ConditionalResult {
					condition_was_satisfied: true,
					actual_etag,
					resulting_etag: EtagSlot::Tag(etag.to_string()),
					new_value: ValueSlot::NotRetrieved,
				})
			},
		}
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		{
			let state = self.state.lock().await;
			if let Some(item) = state.items.get(key) {
				let actual_etag = EtagSlot::Tag(item.etag.to_string());
				let new_value = if retrieve.should_retrieve(&expected_etag, &actual_etag) {
					ValueSlot::Real(item.value.clone())
				} else {
					ValueSlot::NotRetrieved
				};
				return Ok(ConditionalResult {
					condition_was_satisfied: false,
					actual_etag: actual_etag.clone(),
					resulting_etag: actual_etag,
					new_value,
				});
			}
		}
		self.set_item_if(key, ValueInput::Real(default_value), expected_etag, condition, retrieve)
			.await
	}

	async fn discard_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError> {
		let mut state = self.state.lock().await;
		let actual_etag = state.current_etag(key);
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		if !satisfied {
			let new_value =
				if state.items.contains_key(key) { ValueSlot::NotRetrieved } else { ValueSlot::NotAvailable };
			return Ok(ConditionalResult {
				condition_was_satisfied: false,
				actual_etag: actual_etag.clone(),
				resulting_etag: actual_etag,
				new_value,
			});
		}

		if state.items.contains_key(key) {
			self.check_not_append_only("deleting a key")?;
		}
		state.items.remove(key);
		Ok(ConditionalResult {
			condition_was_satisfied: true,
			actual_etag,
			resulting_etag: EtagSlot::NotAvailable,
			new_value: ValueSlot::NotAvailable,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	persidict_core::define_persidict_tests!(MemoryConformanceTest, MemoryBackend, MemoryBackend::new());

	#[tokio::test]
	async fn append_only_rejects_overwrite_and_delete() {
		let store = MemoryBackend::with_config(StoreConfig::new().with_append_only(true));
		let key = SafeKey::from_single("k").unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();

		let err = store.set(&key, ValueInput::Real(Bytes::from_static(b"v2"))).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));

		let err = store.discard(&key).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
	}

	#[tokio::test]
	async fn value_predicate_rejects_bad_values() {
		let store = MemoryBackend::with_config(
			StoreConfig::new().with_base_class_for_values(Arc::new(|v: &[u8]| v.len() <= 2)),
		);
		let key = SafeKey::from_single("k").unwrap();
		let err =
			store.set(&key, ValueInput::Real(Bytes::from_static(b"too long"))).await.unwrap_err();
		assert!(matches!(err, PersiDictError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn etag_counter_is_instance_wide_not_per_key() {
		let store = MemoryBackend::new();
		let a = SafeKey::from_single("a").unwrap();
		let b = SafeKey::from_single("b").unwrap();
		store.set(&a, ValueInput::Real(Bytes::from_static(b"1"))).await.unwrap();
		store.set(&b, ValueInput::Real(Bytes::from_static(b"2"))).await.unwrap();
		assert_ne!(store.etag(&a).await.unwrap(), store.etag(&b).await.unwrap());
	}
}
