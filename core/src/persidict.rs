//! The capability surface every backend and wrapper implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::condition::{ConditionFlag, RetrieveMode};
use crate::error::PersiDictError;
use crate::results::ConditionalResult;
use crate::safe_key::SafeKey;
use crate::sentinel::{EtagSlot, ValueInput};
use crate::Bytes;

/// The capability set shared by every backend (`MemoryBackend`,
/// `FileDirBackend`, `S3Backend`) and every composable wrapper
/// (`MutableCacheWrapper`, `AppendOnlyCacheWrapper`, `WriteOnceWrapper`):
/// mapping operations, the ETag/conditional protocol, and subdict views.
///
/// Wrappers hold their inner `PersiDict` as an owned `Arc<dyn PersiDict>`
/// handle and delegate to it; there are no cyclic references.
#[async_trait]
pub trait PersiDict: Send + Sync {
	/// Retrieves the value stored at `key`.
	///
	/// Raises [`PersiDictError::KeyMissing`] if `key` is absent.
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError>;

	/// Retrieves the value stored at `key`, or `default` if absent.
	async fn get_or(&self, key: &SafeKey, default: Bytes) -> Result<Bytes, PersiDictError> {
		match self.get(key).await {
			Ok(value) => Ok(value),
			Err(PersiDictError::KeyMissing(_)) => Ok(default),
			Err(e) => Err(e),
		}
	}

	/// Writes `value` to `key`.
	///
	/// `ValueInput::KeepCurrent` is a no-op; `ValueInput::DeleteCurrent` is
	/// equivalent to [`PersiDict::discard`].
	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError>;

	/// Removes `key` if present. Returns `true` if an item was removed,
	/// `false` if `key` was already absent. Never raises for a missing key.
	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError>;

	/// Retrieves `key` then removes it, atomically with respect to this
	/// call (backend-dependent beyond that). Returns `None` if absent.
	async fn pop(&self, key: &SafeKey) -> Result<Option<Bytes>, PersiDictError> {
		match self.get(key).await {
			Ok(value) => {
				self.discard(key).await?;
				Ok(Some(value))
			},
			Err(PersiDictError::KeyMissing(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Returns `true` if `key` is present.
	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError>;

	/// Returns the number of items currently stored.
	async fn len(&self) -> Result<usize, PersiDictError>;

	/// Returns `true` if no items are currently stored.
	async fn is_empty(&self) -> Result<bool, PersiDictError> {
		Ok(self.len().await? == 0)
	}

	/// Returns the current ETag of `key`.
	///
	/// Raises [`PersiDictError::KeyMissing`] if `key` is absent. Calling
	/// this twice with no intervening write returns equal strings.
	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError>;

	/// Returns the last-modification timestamp of `key`, as nanoseconds
	/// since the Unix epoch.
	///
	/// Raises [`PersiDictError::KeyMissing`] if `key` is absent.
	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError>;

	/// Returns every key currently stored. Iteration is unordered and
	/// reflects a non-atomic snapshot.
	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError>;

	/// Returns every currently-stored value. Iteration is unordered and
	/// reflects a non-atomic snapshot; a key that vanishes between the
	/// listing and the fetch is silently skipped, the same race tolerance
	/// [`PersiDict::keys`] itself documents for backends that walk a
	/// directory or bucket listing.
	async fn values(&self) -> Result<Vec<Bytes>, PersiDictError> {
		let mut values = Vec::new();
		for key in self.keys().await? {
			if let Ok(value) = self.get(&key).await {
				values.push(value);
			}
		}
		Ok(values)
	}

	/// Returns every currently-stored `(key, value)` pair, with the same
	/// race tolerance as [`PersiDict::values`].
	async fn items(&self) -> Result<Vec<(SafeKey, Bytes)>, PersiDictError> {
		let mut items = Vec::new();
		for key in self.keys().await? {
			if let Ok(value) = self.get(&key).await {
				items.push((key, value));
			}
		}
		Ok(items)
	}

	/// Returns a uniformly-chosen key, or `None` if the store is empty.
	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError>;

	/// Returns up to `n` keys with the oldest last-modification timestamps,
	/// oldest first.
	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError>;

	/// Returns up to `n` keys with the newest last-modification timestamps,
	/// newest first.
	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError>;

	/// Returns a view scoped to keys starting with `prefix`, with `prefix`
	/// stripped from every key the view exposes.
	fn get_subdict(self: Arc<Self>, prefix: SafeKey) -> Arc<dyn PersiDict>;

	/// Returns one subdict view per distinct first-level key component,
	/// paired with that component as a single-element `SafeKey`.
	async fn subdicts(self: Arc<Self>) -> Result<Vec<(SafeKey, Arc<dyn PersiDict>)>, PersiDictError>;

	/// Evaluates `condition` against `key`'s current ETag without
	/// mutating. `retrieve` governs whether the value is fetched; see
	/// [`RetrieveMode`] for the exact rules, including the
	/// always-`ITEM_NOT_AVAILABLE` behavior for an absent key.
	async fn get_item_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError>;

	/// Writes, no-ops, or deletes `key` depending on `value` and whether
	/// `condition` is satisfied against the current ETag; see the module
	/// documentation on the four conditional primitives for the exact
	/// per-branch result fields. `retrieve` governs what `new_value` carries
	/// on a not-satisfied outcome, the same way it does for
	/// [`PersiDict::get_item_if`].
	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError>;

	/// If `key` exists, returns its current state with no mutation
	/// regardless of `condition`. If `key` is absent, behaves as
	/// [`PersiDict::set_item_if`] with `default_value`.
	///
	/// `default_value` is a plain [`Bytes`], not a `ValueInput`: rejecting
	/// `KEEP_CURRENT`/`DELETE_CURRENT` here is therefore a compile-time
	/// guarantee rather than a runtime type error.
	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError>;

	/// Deletes `key` if `condition` is satisfied against its current ETag.
	/// No retrieval parameter: on a satisfied delete or a satisfied no-op
	/// (key already absent), every ETag/value field is
	/// `ITEM_NOT_AVAILABLE`; on not-satisfied with the key present,
	/// `new_value` is `VALUE_NOT_RETRIEVED`.
	async fn discard_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError>;
}
