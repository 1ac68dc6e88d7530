//! S3-compatible object-store [`PersiDict`]: native ETags, conditional
//! request headers give atomic-by-construction conditional operations.
//!
//! `set_item_if`/`setdefault_if` map the condition/expected-ETag pair onto
//! `If-Match`/`If-None-Match` request headers per the table in the module
//! documentation below, so the check-and-act is one server-side operation.
//! `discard_if` has no portable conditional-delete header across
//! S3-compatible providers, so it falls back to check-then-act (HEAD, then
//! DELETE): the same documented non-atomicity as [`crate::filedir`], scoped
//! to delete only.
//!
//! | condition × expected | header | effect |
//! |---|---|---|
//! | `EtagIsTheSame`, real ETag | `If-Match: <etag>` | write iff unchanged |
//! | `EtagIsTheSame`, `NotAvailable` | `If-None-Match: *` | insert iff absent |
//! | `EtagHasChanged`, real ETag | `If-None-Match: <etag>` | write iff different |
//! | `EtagHasChanged`, `NotAvailable` | `If-Match: <actual from HEAD>` | write iff exists; needs an extra HEAD |
//! | `AnyEtag` | none | unconditional |

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::debug;

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput, ValueSlot};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::{Bytes, StoreConfig};

fn is_precondition_failure<E>(err: &SdkError<E>) -> bool {
	match err {
		SdkError::ServiceError(service_err) => {
			let status = service_err.raw().status().as_u16();
			status == 412 || status == 409
		},
		_ => false,
	}
}

/// S3-compatible object-store [`PersiDict`]. SafeKey components are joined
/// with `/` under an optional root prefix to form the object key; the
/// configured codec's extension is appended to the terminal component.
pub struct S3Backend {
	client: Client,
	bucket: String,
	root_prefix: Option<String>,
	config: StoreConfig,
}

impl S3Backend {
	/// Builds a backend against `bucket` in `region`, authenticating via the
	/// ambient AWS credential chain (environment, profile, IMDS).
	pub async fn new(
		bucket: impl Into<String>, region: impl Into<String>, root_prefix: Option<String>,
	) -> Arc<Self> {
		Self::with_config(bucket, region, root_prefix, None, StoreConfig::new()).await
	}

	/// Builds a backend with explicit static credentials and an optional
	/// custom endpoint, for S3-compatible services that are not AWS itself
	/// (MinIO, Backblaze B2, Tigris).
	pub async fn with_static_credentials(
		bucket: impl Into<String>, region: impl Into<String>, root_prefix: Option<String>,
		endpoint: Option<String>, key_id: impl Into<String>, key_secret: impl Into<String>,
		config: StoreConfig,
	) -> Arc<Self> {
		let credentials = Credentials::new(key_id, key_secret, None, None, "persidict-static");
		Self::build(bucket, region, root_prefix, endpoint, Some(credentials), config).await
	}

	async fn with_config(
		bucket: impl Into<String>, region: impl Into<String>, root_prefix: Option<String>,
		endpoint: Option<String>, config: StoreConfig,
	) -> Arc<Self> {
		Self::build(bucket, region, root_prefix, endpoint, None, config).await
	}

	async fn build(
		bucket: impl Into<String>, region: impl Into<String>, root_prefix: Option<String>,
		endpoint: Option<String>, credentials: Option<Credentials>, config: StoreConfig,
	) -> Arc<Self> {
		let region = Region::new(region.into());
		let mut config_builder = aws_sdk_s3::Config::builder()
			.behavior_version(BehaviorVersion::latest())
			.region(region)
			.retry_config(RetryConfig::standard().with_max_attempts(4))
			.force_path_style(true);
		if let Some(credentials) = credentials {
			config_builder = config_builder.credentials_provider(credentials);
		} else {
			let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
			if let Some(provider) = shared.credentials_provider() {
				config_builder = config_builder.credentials_provider(provider);
			}
		}
		if let Some(endpoint_url) = endpoint {
			config_builder = config_builder.endpoint_url(endpoint_url);
		}
		let client = Client::from_conf(config_builder.build());
		Arc::new(S3Backend { client, bucket: bucket.into(), root_prefix, config })
	}

	/// Best-effort bucket creation: already-exists and not-authorized (for
	/// cross-account buckets that already exist) are the only swallowed
	/// errors, per the documented bucket-lifecycle policy.
	pub async fn ensure_bucket_exists(&self) -> Result<(), PersiDictError> {
		match self.client.create_bucket().bucket(&self.bucket).send().await {
			Ok(_) => Ok(()),
			Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 409 => {
				// BucketAlreadyOwnedByYou / BucketAlreadyExists: swallowed.
				debug!("create_bucket for {} returned 409, bucket already exists", self.bucket);
				Ok(())
			},
			Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 403 => {
				// Bucket exists in another account we can't administer, but
				// may still be usable for object operations: swallowed.
				debug!("create_bucket for {} returned 403, assuming bucket is usable", self.bucket);
				Ok(())
			},
			Err(e) => Err(PersiDictError::backend_failure("S3Backend", "create_bucket", e)),
		}
	}

	fn object_key(&self, key: &SafeKey) -> String {
		let mut components: Vec<&str> = Vec::new();
		if let Some(prefix) = &self.root_prefix {
			components.push(prefix.trim_end_matches('/'));
		}
		let joined = key.components().join("/");
		let extension = self.config.codec().extension().to_string();
		format!("{}/{}.{}", components.join("/"), joined, extension).trim_start_matches('/').to_string()
	}

	async fn head_etag(&self, object_key: &str) -> Result<EtagSlot, PersiDictError> {
		match self.client.head_object().bucket(&self.bucket).key(object_key).send().await {
			Ok(output) => Ok(output.e_tag().map(|s| s.to_string()).into()),
			Err(SdkError::ServiceError(e)) if matches!(e.err(), HeadObjectError::NotFound(_)) => {
				Ok(EtagSlot::NotAvailable)
			},
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"S3Backend", "head_object", object_key, e,
			)),
		}
	}

	async fn get_object_bytes(&self, object_key: &str) -> Result<Option<Bytes>, PersiDictError> {
		match self.client.get_object().bucket(&self.bucket).key(object_key).send().await {
			Ok(output) => {
				let raw = output
					.body
					.collect()
					.await
					.map_err(|e| {
						PersiDictError::backend_failure_for_key(
							"S3Backend", "get_object body", object_key, e,
						)
					})?
					.into_bytes();
				Ok(Some(self.config.codec().decode(&raw)?))
			},
			Err(SdkError::ServiceError(e)) if matches!(e.err(), GetObjectError::NoSuchKey(_)) => Ok(None),
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"S3Backend", "get_object", object_key, e,
			)),
		}
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

	async fn check_not_append_only(&self, object_key: &str, operation: &str) -> Result<(), PersiDictError> {
		if self.config.append_only() && !matches!(self.head_etag(object_key).await?, EtagSlot::NotAvailable)
		{
			Err(PersiDictError::MutationPolicy(format!(
				"{} is rejected: this store is append-only",
				operation
			)))
		} else {
			Ok(())
		}
	}

	/// Issues the conditional PUT for `set_item_if`'s satisfied path,
	/// translating the condition/expected pair into the request's
	/// `If-Match`/`If-None-Match` header per the module table. `actual_etag`
	/// is the caller's already-fetched HEAD result, reused here rather than
	/// re-fetched, so it can double as the pre-write ETag the caller reports
	/// back. Returns `Ok(None)` if the provider reported a precondition
	/// failure (the condition was not actually satisfied when the PUT
	/// landed, e.g. a concurrent writer raced ahead between the caller's
	/// HEAD and this PUT).
	async fn conditional_put(
		&self, object_key: &str, body: &[u8], expected_etag: &EtagSlot, condition: ConditionFlag,
		actual_etag: &EtagSlot,
	) -> Result<Option<String>, PersiDictError> {
		let mut request = self.client.put_object().bucket(&self.bucket).key(object_key).body(
			ByteStream::from(body.to_vec()),
		);
		request = match (condition, expected_etag) {
			(ConditionFlag::AnyEtag, _) => request,
			(ConditionFlag::EtagIsTheSame, EtagSlot::Tag(tag)) => request.if_match(tag.as_str()),
			(ConditionFlag::EtagIsTheSame, EtagSlot::NotAvailable) => request.if_none_match("*"),
			(ConditionFlag::EtagHasChanged, EtagSlot::Tag(tag)) => request.if_none_match(tag.as_str()),
			(ConditionFlag::EtagHasChanged, EtagSlot::NotAvailable) => match actual_etag {
				EtagSlot::Tag(actual) => request.if_match(actual.as_str()),
				EtagSlot::NotAvailable => return Ok(None),
			},
		};
		match request.send().await {
			Ok(output) => Ok(Some(output.e_tag().unwrap_or_default().to_string())),
			Err(e) if is_precondition_failure(&e) => Ok(None),
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"S3Backend", "put_object", object_key, e,
			)),
		}
	}
}

#[async_trait]
impl PersiDict for S3Backend {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		self.get_object_bytes(&self.object_key(key))
			.await?
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
				let object_key = self.object_key(key);
				self.check_not_append_only(&object_key, "overwriting an existing key").await?;
				let encoded = self.config.codec().encode(&bytes)?;
				self.conditional_put(
					&object_key, &encoded, &EtagSlot::NotAvailable, ConditionFlag::AnyEtag,
					&EtagSlot::NotAvailable,
				)
				.await?;
				Ok(())
			},
		}
	}

	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		let object_key = self.object_key(key);
		self.check_not_append_only(&object_key, "deleting a key").await?;
		let existed = !matches!(self.head_etag(&object_key).await?, EtagSlot::NotAvailable);
		self.client
			.delete_object()
			.bucket(&self.bucket)
			.key(&object_key)
			.send()
			.await
			.map_err(|e| {
				PersiDictError::backend_failure_for_key("S3Backend", "delete_object", key.to_string(), e)
			})?;
		Ok(existed)
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		Ok(!matches!(self.head_etag(&self.object_key(key)).await?, EtagSlot::NotAvailable))
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		Ok(self.keys().await?.len())
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		match self.head_etag(&self.object_key(key)).await? {
			EtagSlot::Tag(tag) => Ok(tag),
			EtagSlot::NotAvailable => Err(PersiDictError::KeyMissing(key.to_string())),
		}
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		let object_key = self.object_key(key);
		let output = self
			.client
			.head_object()
			.bucket(&self.bucket)
			.key(&object_key)
			.send()
			.await
			.map_err(|e| match e {
				SdkError::ServiceError(ref se) if matches!(se.err(), HeadObjectError::NotFound(_)) => {
					PersiDictError::KeyMissing(key.to_string())
				},
				e => PersiDictError::backend_failure_for_key("S3Backend", "head_object", key.to_string(), e),
			})?;
		Ok(output
			.last_modified()
			.and_then(|dt| dt.as_nanos().try_into().ok())
			.unwrap_or(0))
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		let extension = format!(".{}", self.config.codec().extension());
		let list_prefix = self.root_prefix.as_deref().map(|p| format!("{}/", p.trim_end_matches('/')));
		let mut keys = Vec::new();
		let mut continuation_token = None;
		loop {
			let mut request = self.client.list_objects_v2().bucket(&self.bucket);
			if let Some(prefix) = &list_prefix {
				request = request.prefix(prefix);
			}
			if let Some(token) = &continuation_token {
				request = request.continuation_token(token);
			}
			let output = request
				.send()
				.await
				.map_err(|e| PersiDictError::backend_failure("S3Backend", "list_objects_v2", e))?;
			for object in output.contents() {
				let Some(object_key) = object.key() else { continue };
				let relative = match &list_prefix {
					Some(prefix) => object_key.strip_prefix(prefix.as_str()).unwrap_or(object_key),
					None => object_key,
				};
				let Some(stem) = relative.strip_suffix(&extension) else { continue };
				let components: Vec<String> = stem.split('/').map(|s| s.to_string()).collect();
				if let Ok(safe_key) = SafeKey::new(components) {
					keys.push(safe_key);
				}
			}
			continuation_token = output.next_continuation_token().map(|s| s.to_string());
			if continuation_token.is_none() {
				break;
			}
		}
		Ok(keys)
	}

	async fn random_key(&self) -> Result<Option<SafeKey>, PersiDictError> {
		let keys = self.keys().await?;
		if keys.is_empty() {
			return Ok(None);
		}
		Ok(Some(keys[keys.len() / 2].clone()))
	}

	async fn oldest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		let mut entries = Vec::new();
		for key in self.keys().await? {
			entries.push((key.clone(), self.timestamp(&key).await?));
		}
		entries.sort_by_key(|(_, ts)| *ts);
		Ok(entries.into_iter().take(n).map(|(k, _)| k).collect())
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		let mut entries = Vec::new();
		for key in self.keys().await? {
			entries.push((key.clone(), self.timestamp(&key).await?));
		}
		entries.sort_by_key(|(_, ts)| std::cmp::Reverse(*ts));
		Ok(entries.into_iter().take(n).map(|(k, _)| k).collect())
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
		let object_key = self.object_key(key);
		let actual_etag = self.head_etag(&object_key).await?;
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);
		let new_value = match &actual_etag {
			EtagSlot::NotAvailable => ValueSlot::NotAvailable,
			EtagSlot::Tag(_) => {
				if retrieve.should_retrieve(&expected_etag, &actual_etag) {
					match self.get_object_bytes(&object_key).await? {
						Some(bytes) => ValueSlot::Real(bytes),
						None => ValueSlot::NotAvailable,
					}
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
		let object_key = self.object_key(key);
		let actual_etag = self.head_etag(&object_key).await?;
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		if !satisfied {
			let new_value = match &actual_etag {
				EtagSlot::NotAvailable => ValueSlot::NotAvailable,
				EtagSlot::Tag(_) => {
					if retrieve.should_retrieve(&expected_etag, &actual_etag) {
						match self.get_object_bytes(&object_key).await? {
							Some(bytes) => ValueSlot::Real(bytes),
							None => ValueSlot::NotAvailable,
						}
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
				self.check_not_append_only(&object_key, "deleting a key").await?;
				if let EtagSlot::Tag(_) = &actual_etag {
					self.client
						.delete_object()
						.bucket(&self.bucket)
						.key(&object_key)
						.send()
						.await
						.map_err(|e| {
							PersiDictError::backend_failure_for_key(
								"S3Backend", "delete_object", key.to_string(), e,
							)
						})?;
				}
				Ok(ConditionalResult {
					condition_was_satisfied: true,
					actual_etag,
					resulting_etag: EtagSlot::NotAvailable,
					new_value: ValueSlot::NotAvailable,
				})
			},
			ValueInput::Real(bytes) => {
				self.check_value(&bytes)?;
				self.check_not_append_only(&object_key, "overwriting an existing key").await?;
				let encoded = self.config.codec().encode(&bytes)?;
				match self
					.conditional_put(&object_key, &encoded, &expected_etag, condition, &actual_etag)
					.await?
				{
					Some(new_etag) => Ok(ConditionalResult {
						condition_was_satisfied: true,
						actual_etag: actual_etag.clone(),
						resulting_etag: EtagSlot::Tag(new_etag),
						new_value: ValueSlot::NotRetrieved,
					}),
					None => {
						// A concurrent writer raced ahead between our HEAD
						// above and this PUT landing; re-read the current
						// state rather than trust the now-stale actual_etag.
						let actual_etag = self.head_etag(&object_key).await?;
						let new_value = match &actual_etag {
							EtagSlot::NotAvailable => ValueSlot::NotAvailable,
							EtagSlot::Tag(_) => {
								if retrieve.should_retrieve(&expected_etag, &actual_etag) {
									match self.get_object_bytes(&object_key).await? {
										Some(bytes) => ValueSlot::Real(bytes),
										None => ValueSlot::NotAvailable,
									}
								} else {
									ValueSlot::NotRetrieved
								}
							},
						};
						Ok(ConditionalResult {
							condition_was_satisfied: false,
							actual_etag: actual_etag.clone(),
							resulting_etag: actual_etag,
							new_value,
						})
					},
				}
			},
		}
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		let object_key = self.object_key(key);
		let actual_etag = self.head_etag(&object_key).await?;
		if let EtagSlot::Tag(_) = &actual_etag {
			let new_value = if retrieve.should_retrieve(&expected_etag, &actual_etag) {
				match self.get_object_bytes(&object_key).await? {
					Some(bytes) => ValueSlot::Real(bytes),
					None => ValueSlot::NotAvailable,
				}
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
		self.set_item_if(key, ValueInput::Real(default_value), expected_etag, condition, retrieve)
			.await
	}

	async fn discard_if(
		&self, key: &SafeKey, expected_etag: EtagSlot, condition: ConditionFlag,
	) -> Result<ConditionalResult, PersiDictError> {
		let object_key = self.object_key(key);
		let actual_etag = self.head_etag(&object_key).await?;
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		if !satisfied {
			let new_value = match &actual_etag {
				EtagSlot::NotAvailable => ValueSlot::NotAvailable,
				EtagSlot::Tag(_) => ValueSlot::NotRetrieved,
			};
			return Ok(ConditionalResult {
				condition_was_satisfied: false,
				actual_etag: actual_etag.clone(),
				resulting_etag: actual_etag,
				new_value,
			});
		}

		self.check_not_append_only(&object_key, "deleting a key").await?;
		if let EtagSlot::Tag(_) = &actual_etag {
			self.client
				.delete_object()
				.bucket(&self.bucket)
				.key(&object_key)
				.send()
				.await
				.map_err(|e| {
					PersiDictError::backend_failure_for_key("S3Backend", "delete_object", key.to_string(), e)
				})?;
		}
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

	async fn test_backend(root_prefix: Option<String>) -> Arc<S3Backend> {
		S3Backend::with_static_credentials(
			"test-bucket", "us-east-1", root_prefix, None, "test-key", "test-secret",
			StoreConfig::new(),
		)
		.await
	}

	#[tokio::test]
	async fn object_key_joins_components_with_root_prefix() {
		let backend = test_backend(Some("library".to_string())).await;
		let key = SafeKey::new(["users", "alice", "name"]).unwrap();
		assert_eq!(backend.object_key(&key), "library/users/alice/name.bin");
	}

	#[tokio::test]
	async fn object_key_without_root_prefix_has_no_leading_slash() {
		let backend = test_backend(None).await;
		let key = SafeKey::from_single("solo").unwrap();
		assert_eq!(backend.object_key(&key), "solo.bin");
	}
}
