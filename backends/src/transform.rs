//! The retry-driven read-modify-write loop built atop the conditional
//! operation protocol.

use std::sync::Arc;

use persidict_core::condition::ConditionFlag;
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::OperationResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput, ValueSlot};
use persidict_core::Bytes;

/// What a [`TransformEngine::transform`] closure decides to do with the
/// current value it was handed.
pub enum Transformation {
	/// Write `Bytes` as the new value.
	Set(Bytes),
	/// Leave the current value untouched.
	KeepCurrent,
	/// Remove the key.
	DeleteCurrent,
}

/// Retries `key`'s conditional read-modify-write loop atop any
/// [`PersiDict`], per the algorithm: read the current value and ETag,
/// invoke `transformer`, translate its decision into a conditional write
/// guarded by the ETag just read, and retry on a lost race.
///
/// `transformer` must be effect-free except for its return value: it may be
/// invoked more than once per call if the conditional write loses a race.
pub struct TransformEngine;

impl TransformEngine {
	/// Runs the transform loop against `store` for `key`, retrying up to
	/// `n_retries` times (`None` for unbounded) whenever the conditional
	/// write is not satisfied.
	pub async fn transform<F>(
		store: Arc<dyn PersiDict>, key: &SafeKey, mut transformer: F, n_retries: Option<u32>,
	) -> Result<OperationResult, PersiDictError>
	where
		F: FnMut(ValueSlot) -> Transformation + Send,
	{
		let mut attempts: u32 = 0;
		let mut remaining = n_retries;

		loop {
			attempts += 1;
			let read = store
				.get_item_if(
					key,
					EtagSlot::NotAvailable,
					ConditionFlag::AnyEtag,
					persidict_core::condition::RetrieveMode::AlwaysRetrieve,
				)
				.await?;

			let decision = transformer(read.new_value);

			let result = match decision {
				Transformation::KeepCurrent => {
					return Ok(OperationResult {
						resulting_etag: read.actual_etag,
						new_value: ValueSlot::NotRetrieved,
					});
				},
				Transformation::Set(bytes) => {
					store
						.set_item_if(
							key,
							ValueInput::Real(bytes),
							read.actual_etag.clone(),
							ConditionFlag::EtagIsTheSame,
							persidict_core::condition::RetrieveMode::NeverRetrieve,
						)
						.await?
				},
				Transformation::DeleteCurrent => {
					store.discard_if(key, read.actual_etag.clone(), ConditionFlag::EtagIsTheSame).await?
				},
			};

			if result.condition_was_satisfied {
				return Ok(OperationResult {
					resulting_etag: result.resulting_etag,
					new_value: result.new_value,
				});
			}

			if let Some(budget) = remaining {
				if budget == 0 {
					return Err(PersiDictError::ConcurrencyConflict {
						key: key.to_string(),
						attempts,
					});
				}
				remaining = Some(budget - 1);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryBackend;

	#[tokio::test]
	async fn cas_increment_ten_times_sequentially() {
		let store: Arc<dyn PersiDict> = MemoryBackend::new();
		let key = SafeKey::from_single("counter").unwrap();

		for _ in 0..10 {
			TransformEngine::transform(
				store.clone(),
				&key,
				|current| match current {
					ValueSlot::NotAvailable => Transformation::Set(Bytes::from_static(b"1")),
					ValueSlot::Real(bytes) => {
						let n: u64 = std::str::from_utf8(&bytes).unwrap().parse().unwrap();
						Transformation::Set(Bytes::from(format!("{}", n + 1)))
					},
					ValueSlot::NotRetrieved => unreachable!("ALWAYS_RETRIEVE always retrieves"),
				},
				Some(10),
			)
			.await
			.unwrap();
		}

		assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"10"));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn retry_exhaustion_raises_concurrency_conflict() {
		let store: Arc<dyn PersiDict> = MemoryBackend::new();
		let key = SafeKey::from_single("x").unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();

		// Every invocation of this transformer loses its race: a background
		// task rewrites the key (changing its ETag) before the transformer
		// returns, so the conditional write it triggers always finds a
		// stale ETag. Exercises retry exhaustion deterministically.
		let err = TransformEngine::transform(
			store.clone(),
			&key,
			move |_current| {
				let (tx, rx) = std::sync::mpsc::channel();
				let store = store.clone();
				let key = key.clone();
				tokio::spawn(async move {
					store.set(&key, ValueInput::Real(Bytes::from_static(b"interference"))).await.unwrap();
					let _ = tx.send(());
				});
				rx.recv().unwrap();
				Transformation::Set(Bytes::from_static(b"mine"))
			},
			Some(2),
		)
		.await
		.unwrap_err();

		assert!(matches!(err, PersiDictError::ConcurrencyConflict { attempts: 3, .. }));
	}
}
