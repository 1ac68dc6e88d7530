//! The conformance suite every [`crate::persidict::PersiDict`] implementation
//! is expected to pass.
//!
//! Modeled on the teacher's `define_kv_store_tests!`/`KvStoreTestSuite`
//! pair: [`define_persidict_tests!`] instantiates one `#[tokio::test]`
//! function per default method on [`PersiDictConformanceSuite`], so a
//! backend crate gets the whole suite by writing one macro invocation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::condition::{ConditionFlag, RetrieveMode};
use crate::error::PersiDictError;
use crate::persidict::PersiDict;
use crate::safe_key::SafeKey;
use crate::sentinel::{EtagSlot, ValueInput, ValueSlot};
use crate::Bytes;

/// Instantiates a `#[tokio::test]` function per [`PersiDictConformanceSuite`]
/// default method, backed by `$create_store_expr`.
///
/// `$create_store_expr` must evaluate to `Arc<$store_type>` with a fresh,
/// empty store each time it runs (every test gets its own store).
#[macro_export]
macro_rules! define_persidict_tests {
	($test_suite_name:ident, $store_type:path, $create_store_expr:expr) => {
		struct $test_suite_name;

		#[async_trait::async_trait]
		impl $crate::conformance::PersiDictConformanceSuite for $test_suite_name {
			type Store = $store_type;

			async fn create_store() -> std::sync::Arc<Self::Store> {
				$create_store_expr
			}
		}

		macro_rules! create_test {
			($test_fn:ident) => {
				#[tokio::test]
				async fn $test_fn() -> Result<(), $crate::error::PersiDictError> {
					$test_suite_name::$test_fn().await
				}
			};
		}

		create_test!(set_then_get_round_trips);
		create_test!(discard_is_idempotent);
		create_test!(pop_returns_value_and_removes_it);
		create_test!(joker_keep_current_is_noop);
		create_test!(joker_delete_current_equals_discard);
		create_test!(any_etag_satisfies_unconditionally);
		create_test!(etag_is_the_same_absent_sentinel_satisfies_iff_absent);
		create_test!(etag_has_changed_absent_expected_satisfies_iff_present);
		create_test!(etag_is_stable_with_no_intervening_write);
		create_test!(conditional_get_never_mutates_and_reports_not_retrieved);
		create_test!(insert_if_absent_is_race_safe);
		create_test!(delete_known_version_scenario);
		create_test!(hierarchical_subdict_scenario);
		create_test!(values_and_items_cover_every_stored_pair);
	};
}

/// The conformance suite itself: one default-implemented async method per
/// tested property, runnable against any `PersiDict` via
/// [`define_persidict_tests!`].
#[allow(missing_docs)]
#[async_trait]
pub trait PersiDictConformanceSuite {
	/// The backend under test.
	type Store: PersiDict + 'static;

	/// Builds a fresh, empty instance of the backend under test.
	async fn create_store() -> Arc<Self::Store>;

	async fn set_then_get_round_trips() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let value = store.get(&key).await?;
		assert_eq!(&value[..], b"v");
		assert!(store.contains(&key).await?);
		Ok(())
	}

	async fn discard_is_idempotent() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		assert!(store.discard(&key).await?);
		assert!(!store.discard(&key).await?);
		assert!(!store.contains(&key).await?);
		Ok(())
	}

	async fn pop_returns_value_and_removes_it() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let popped = store.pop(&key).await?;
		assert_eq!(popped.as_deref(), Some(&b"v"[..]));
		assert_eq!(store.pop(&key).await?, None);
		Ok(())
	}

	async fn joker_keep_current_is_noop() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let etag_before = store.etag(&key).await?;
		store.set(&key, ValueInput::KeepCurrent).await?;
		assert_eq!(store.get(&key).await?, Bytes::from_static(b"v"));
		assert_eq!(store.etag(&key).await?, etag_before);
		Ok(())
	}

	async fn joker_delete_current_equals_discard() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		store.set(&key, ValueInput::DeleteCurrent).await?;
		assert!(!store.contains(&key).await?);
		Ok(())
	}

	async fn any_etag_satisfies_unconditionally() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		let result = store
			.set_item_if(
				&key,
				ValueInput::Real(Bytes::from_static(b"v")),
				EtagSlot::Tag("bogus".to_string()),
				ConditionFlag::AnyEtag,
				RetrieveMode::NeverRetrieve,
			)
			.await?;
		assert!(result.condition_was_satisfied);
		Ok(())
	}

	async fn etag_is_the_same_absent_sentinel_satisfies_iff_absent() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;

		let result = store
			.set_item_if(
				&key,
				ValueInput::Real(Bytes::from_static(b"v")),
				EtagSlot::NotAvailable,
				ConditionFlag::EtagIsTheSame,
				RetrieveMode::NeverRetrieve,
			)
			.await?;
		assert!(result.condition_was_satisfied, "insert-if-absent should succeed on an absent key");

		let result = store
			.set_item_if(
				&key,
				ValueInput::Real(Bytes::from_static(b"v2")),
				EtagSlot::NotAvailable,
				ConditionFlag::EtagIsTheSame,
				RetrieveMode::NeverRetrieve,
			)
			.await?;
		assert!(!result.condition_was_satisfied, "key now exists; absent-sentinel match must fail");
		Ok(())
	}

	async fn etag_has_changed_absent_expected_satisfies_iff_present() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;

		let result =
			store.get_item_if(&key, EtagSlot::NotAvailable, ConditionFlag::EtagHasChanged, RetrieveMode::NeverRetrieve).await?;
		assert!(!result.condition_was_satisfied, "absent key: ETAG_HAS_CHANGED vs absent must fail");

		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let result =
			store.get_item_if(&key, EtagSlot::NotAvailable, ConditionFlag::EtagHasChanged, RetrieveMode::NeverRetrieve).await?;
		assert!(result.condition_was_satisfied, "present key: ETAG_HAS_CHANGED vs absent must succeed");
		Ok(())
	}

	async fn etag_is_stable_with_no_intervening_write() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let first = store.etag(&key).await?;
		let second = store.etag(&key).await?;
		assert_eq!(first, second);
		Ok(())
	}

	/// End-to-end scenario 3: conditional GET bandwidth saving.
	async fn conditional_get_never_mutates_and_reports_not_retrieved() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("k")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await?;
		let recorded_etag = store.etag(&key).await?;

		let result = store
			.get_item_if(
				&key,
				EtagSlot::Tag(recorded_etag.clone()),
				ConditionFlag::EtagHasChanged,
				RetrieveMode::IfEtagChanged,
			)
			.await?;
		assert!(!result.condition_was_satisfied);
		assert_eq!(result.new_value, ValueSlot::NotRetrieved);
		assert_eq!(result.actual_etag, EtagSlot::Tag(recorded_etag));
		assert_eq!(store.get(&key).await?, Bytes::from_static(b"v"));
		Ok(())
	}

	/// End-to-end scenario 2: insert-if-absent race, run with two genuinely
	/// concurrent callers. Requires `Self::Store: Send + Sync + 'static`,
	/// already guaranteed by [`PersiDict`]'s supertrait bound.
	async fn insert_if_absent_is_race_safe() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("x")?;

		let store_a = store.clone();
		let key_a = key.clone();
		let task_a = tokio::spawn(async move {
			store_a
				.setdefault_if(
					&key_a,
					Bytes::from_static(b"A"),
					EtagSlot::NotAvailable,
					ConditionFlag::EtagIsTheSame,
					RetrieveMode::NeverRetrieve,
				)
				.await
		});
		let store_b = store.clone();
		let key_b = key.clone();
		let task_b = tokio::spawn(async move {
			store_b
				.setdefault_if(
					&key_b,
					Bytes::from_static(b"B"),
					EtagSlot::NotAvailable,
					ConditionFlag::EtagIsTheSame,
					RetrieveMode::NeverRetrieve,
				)
				.await
		});

		let result_a = task_a.await.expect("task panicked")?;
		let result_b = task_b.await.expect("task panicked")?;

		let satisfied_count =
			[&result_a, &result_b].iter().filter(|r| r.condition_was_satisfied).count();
		assert_eq!(satisfied_count, 1, "exactly one caller must observe the insert as satisfied");

		let final_value = store.get(&key).await?;
		assert!(final_value == Bytes::from_static(b"A") || final_value == Bytes::from_static(b"B"));
		Ok(())
	}

	/// End-to-end scenario 4: delete-known-version.
	async fn delete_known_version_scenario() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		let key = SafeKey::from_single("d")?;
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v1"))).await?;
		let e1 = store.etag(&key).await?;

		let result = store
			.discard_if(&key, EtagSlot::Tag("bogus".to_string()), ConditionFlag::EtagIsTheSame)
			.await?;
		assert!(!result.condition_was_satisfied);
		assert!(store.contains(&key).await?);

		let result =
			store.discard_if(&key, EtagSlot::Tag(e1), ConditionFlag::EtagIsTheSame).await?;
		assert!(result.condition_was_satisfied);
		assert!(!store.contains(&key).await?);
		Ok(())
	}

	/// End-to-end scenario 5: hierarchical subdict.
	async fn hierarchical_subdict_scenario() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		store
			.set(&SafeKey::new(["users", "alice", "name"])?, ValueInput::Real(Bytes::from_static(b"A")))
			.await?;
		store
			.set(&SafeKey::new(["users", "bob", "name"])?, ValueInput::Real(Bytes::from_static(b"B")))
			.await?;
		store.set(&SafeKey::new(["config", "x"])?, ValueInput::Real(Bytes::from_static(b"1"))).await?;

		let users = store.clone().get_subdict(SafeKey::from_single("users")?);
		assert_eq!(users.len().await?, 2);
		let mut keys = users.keys().await?;
		keys.sort();
		assert_eq!(
			keys,
			vec![SafeKey::new(["alice", "name"])?, SafeKey::new(["bob", "name"])?]
		);
		Ok(())
	}

	async fn values_and_items_cover_every_stored_pair() -> Result<(), PersiDictError> {
		let store = Self::create_store().await;
		store.set(&SafeKey::from_single("a")?, ValueInput::Real(Bytes::from_static(b"1"))).await?;
		store.set(&SafeKey::from_single("b")?, ValueInput::Real(Bytes::from_static(b"2"))).await?;

		let mut values = store.values().await?;
		values.sort();
		assert_eq!(values, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);

		let mut items = store.items().await?;
		items.sort_by(|a, b| a.0.cmp(&b.0));
		assert_eq!(
			items,
			vec![
				(SafeKey::from_single("a")?, Bytes::from_static(b"1")),
				(SafeKey::from_single("b")?, Bytes::from_static(b"2")),
			]
		);
		Ok(())
	}
}
