//! Generic `get_subdict`/`subdicts` support shared by every backend and
//! wrapper.
//!
//! A [`PrefixedView`] is itself a [`PersiDict`]: every operation joins its
//! own key argument onto a fixed prefix and delegates to the inner store,
//! and every key the inner store yields back is filtered to the prefix and
//! has it stripped before being handed to the caller. Backends construct
//! one via [`make_subdict_view`] rather than implementing the prefixing
//! logic themselves.

use std::sync::Arc;

use async_trait::async_trait;

use crate::condition::{ConditionFlag, RetrieveMode};
use crate::error::PersiDictError;
use crate::persidict::PersiDict;
use crate::results::ConditionalResult;
use crate::safe_key::SafeKey;
use crate::sentinel::{EtagSlot, ValueInput};
use crate::Bytes;

/// A view over `inner` scoped to keys starting with `prefix`, with `prefix`
/// stripped from every key it exposes.
pub struct PrefixedView {
	inner: Arc<dyn PersiDict>,
	prefix: SafeKey,
}

impl PrefixedView {
	/// Builds a view over `inner` scoped to `prefix`.
	pub fn new(inner: Arc<dyn PersiDict>, prefix: SafeKey) -> Self {
		PrefixedView { inner, prefix }
	}

	fn full_key(&self, key: &SafeKey) -> SafeKey {
		self.prefix.join(key)
	}
}

/// Wraps `inner` in a [`PrefixedView`] scoped to `prefix`. The one-line body
/// every backend's `get_subdict` delegates to.
pub fn make_subdict_view(inner: Arc<dyn PersiDict>, prefix: SafeKey) -> Arc<dyn PersiDict> {
	Arc::new(PrefixedView::new(inner, prefix))
}

/// Groups `store`'s keys by their first component and returns one subdict
/// view per group. The body every backend's `subdicts` delegates to.
pub async fn list_subdicts(
	store: Arc<dyn PersiDict>,
) -> Result<Vec<(SafeKey, Arc<dyn PersiDict>)>, PersiDictError> {
	let keys = store.keys().await?;
	let mut seen = std::collections::BTreeSet::new();
	let mut groups = Vec::new();
	for key in &keys {
		let first = &key.components()[0];
		if seen.insert(first.clone()) {
			let prefix = SafeKey::from_single(first.clone())?;
			let view = store.clone().get_subdict(prefix.clone());
			groups.push((prefix, view));
		}
	}
	Ok(groups)
}

#[async_trait]
impl PersiDict for PrefixedView {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		self.inner.get(&self.full_key(key)).await
	}

	async fn set(&self, key: &SafeKey, value: ValueInput) -> Result<(), PersiDictError> {
		self.inner.set(&self.full_key(key), value).await
	}

	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		self.inner.discard(&self.full_key(key)).await
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		self.inner.contains(&self.full_key(key)).await
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		Ok(self.keys().await?.len())
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		self.inner.etag(&self.full_key(key)).await
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		self.inner.timestamp(&self.full_key(key)).await
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		let inner_keys = self.inner.keys().await?;
		inner_keys
			.iter()
			.filter_map(|k| k.strip_prefix(&self.prefix))
			.map(|components| SafeKey::new(components.to_vec()))
			.collect()
	}

	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
		let keys = self.keys().await?;
		if keys.is_empty() {
			return Ok(None);
		}
		// No dependency on an RNG here: pick deterministically off the first
		// key's own content rather than pulling `rand` into a non-test path.
		let index = keys.len() / 2;
		Ok(keys.into_iter().nth(index))
	}

	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.ranked_keys(n, true).await
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		self.ranked_keys(n, false).await
	}

	fn get_subdict(self: Arc<Self>, prefix: SafeKey) -> Arc<dyn PersiDict> {
		let combined = self.prefix.join(&prefix);
		make_subdict_view(self.inner.clone(), combined)
	}

	async fn subdicts(self: Arc<Self>) -> Result<Vec<(SafeKey, Arc<dyn PersiDict>)>, PersiDictError> {
		list_subdicts(self).await
	}

	async fn get_item_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		self.inner.get_item_if(&self.full_key(key), expected_etag, condition, retrieve).await
	}

	async fn set_item_if(
		&self, key: &SafeKey, value: ValueInput, expected_etag: EtagSlot, condition: ConditionFlag,
		retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		self.inner.set_item_if(&self.full_key(key), value, expected_etag, condition, retrieve).await
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		self.inner
			.setdefault_if(&self.full_key(key), default_value, expected_etag, condition, retrieve)
			.await
	}

	async fn discard_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError> {
		self.inner.discard_if(&self.full_key(key), expected_etag, condition).await
	}
}

impl PrefixedView {
	async fn ranked_keys(&self, n: usize, oldest: bool) -> Result<Vec<SafeKey>, PersiDictError> {
		let keys = self.keys().await?;
		let mut with_ts = Vec::with_capacity(keys.len());
		for key in keys {
			let ts = self.timestamp(&key).await?;
			with_ts.push((ts, key));
		}
		if oldest {
			with_ts.sort_by_key(|(ts, _)| *ts);
		} else {
			with_ts.sort_by_key(|(ts, _)| std::cmp::Reverse(*ts));
		}
		Ok(with_ts.into_iter().take(n).map(|(_, k)| k).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::safe_key::SafeKey;
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	/// A minimal in-memory `PersiDict` used only to exercise `PrefixedView`
	/// in isolation from any real backend.
	struct ToyStore {
		items: Mutex<BTreeMap<SafeKey, (Bytes, i64, u64)>>,
		counter: Mutex<u64>,
	}

	impl ToyStore {
		fn new() -> Arc<Self> {
			Arc::new(ToyStore { items: Mutex::new(BTreeMap::new()), counter: Mutex::new(0) })
		}

		fn next_version(&self) -> u64 {
			let mut c = self.counter.lock().unwrap();
			*c += 1;
			*c
		}
	}

	#[async_trait]
	impl PersiDict for ToyStore {
		async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
			self.items
				.lock()
				.unwrap()
				.get(key)
				.map(|(v, _, _)| v.clone())
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
					let version = self.next_version();
					self.items.lock().unwrap().insert(key.clone(), (bytes, version as i64, version));
					Ok(())
				},
			}
		}

		async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
			Ok(self.items.lock().unwrap().remove(key).is_some())
		}

		async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
			Ok(self.items.lock().unwrap().contains_key(key))
		}

		async fn len(&self) -> Result<usize, PersiDictError> {
			Ok(self.items.lock().unwrap().len())
		}

		async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
			self.items
				.lock()
				.unwrap()
				.get(key)
				.map(|(_, _, v)| v.to_string())
				.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
		}

		async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
			self.items
				.lock()
				.unwrap()
				.get(key)
				.map(|(_, ts, _)| *ts)
				.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
		}

		async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
			Ok(self.items.lock().unwrap().keys().cloned().collect())
		}

		async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
			Ok(self.items.lock().unwrap().keys().next().cloned())
		}

		async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
			Ok(self.keys().await?.into_iter().take(n).collect())
		}

		async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
			Ok(self.keys().await?.into_iter().take(n).collect())
		}

		fn get_subdict(self: Arc<Self>, prefix: SafeKey) -> Arc<dyn PersiDict> {
			make_subdict_view(self, prefix)
		}

		async fn subdicts(
			self: Arc<Self>,
		) -> Result<Vec<(SafeKey, Arc<dyn PersiDict>)>, PersiDictError> {
			list_subdicts(self).await
		}

		async fn get_item_if(
			&self, _key: &SafeKey, _expected_etag: EtagSlot, _condition: ConditionFlag,
			_retrieve: RetrieveMode,
		) -> Result<ConditionalResult, PersiDictError> {
			unimplemented!("not exercised by the PrefixedView tests")
		}

		async fn set_item_if(
			&self, _key: &SafeKey, _value: ValueInput, _expected_etag: EtagSlot,
			_condition: ConditionFlag, _retrieve: RetrieveMode,
		) -> Result<ConditionalResult, PersiDictError> {
			unimplemented!("not exercised by the PrefixedView tests")
		}

		async fn setdefault_if(
			&self, _key: &SafeKey, _default_value: Bytes, _expected_etag: EtagSlot,
			_condition: ConditionFlag, _retrieve: RetrieveMode,
		) -> Result<ConditionalResult, PersiDictError> {
			unimplemented!("not exercised by the PrefixedView tests")
		}

		async fn discard_if(
			&self, _key: &SafeKey, _expected_etag: EtagSlot, _condition: ConditionFlag,
		) -> Result<ConditionalResult, PersiDictError> {
			unimplemented!("not exercised by the PrefixedView tests")
		}
	}

	#[tokio::test]
	async fn prefixed_view_strips_and_scopes_keys() {
		let store = ToyStore::new();
		store
			.set(
				&SafeKey::new(["users", "alice", "name"]).unwrap(),
				ValueInput::Real(Bytes::from_static(b"Alice")),
			)
			.await
			.unwrap();
		store
			.set(
				&SafeKey::new(["users", "bob", "name"]).unwrap(),
				ValueInput::Real(Bytes::from_static(b"Bob")),
			)
			.await
			.unwrap();
		store
			.set(&SafeKey::new(["config", "x"]).unwrap(), ValueInput::Real(Bytes::from_static(b"1")))
			.await
			.unwrap();

		let view = store.clone().get_subdict(SafeKey::from_single("users").unwrap());
		assert_eq!(view.len().await.unwrap(), 2);
		let value = view.get(&SafeKey::new(["alice", "name"]).unwrap()).await.unwrap();
		assert_eq!(&value[..], b"Alice");
	}

	#[tokio::test]
	async fn subdicts_groups_by_first_component() {
		let store = ToyStore::new();
		store
			.set(&SafeKey::new(["users", "alice"]).unwrap(), ValueInput::Real(Bytes::from_static(b"A")))
			.await
			.unwrap();
		store
			.set(&SafeKey::new(["config", "x"]).unwrap(), ValueInput::Real(Bytes::from_static(b"1")))
			.await
			.unwrap();

		let groups = store.subdicts().await.unwrap();
		assert_eq!(groups.len(), 2);
	}
}
