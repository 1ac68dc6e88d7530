//! Filesystem-backed [`PersiDict`]: one file per item, atomic replace,
//! stat-derived ETags.
//!
//! Conditional operations here are check-then-act, not atomic across
//! processes: a shared folder synced by multiple machines can observe a
//! race between the ETag check and the subsequent write. This is a
//! documented limitation, not an oversight — callers needing cross-process
//! atomicity are directed to [`crate::s3::S3Backend`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};

use persidict_core::condition::{ConditionFlag, RetrieveMode};
use persidict_core::error::PersiDictError;
use persidict_core::persidict::PersiDict;
use persidict_core::results::ConditionalResult;
use persidict_core::safe_key::SafeKey;
use persidict_core::sentinel::{EtagSlot, ValueInput, ValueSlot};
use persidict_core::subdict::{list_subdicts, make_subdict_view};
use persidict_core::{Bytes, StoreConfig};

const RENAME_RETRY_ATTEMPTS: u32 = 5;
const RENAME_RETRY_BASE_DELAY: Duration = Duration::from_millis(20);

fn digest_suffix(component: &str, digest_len: usize) -> String {
	let mut hasher = DefaultHasher::new();
	component.hash(&mut hasher);
	let full = format!("{:016x}", hasher.finish());
	full.chars().take(digest_len.max(1)).collect()
}

fn render_terminal(component: &str, digest_len: usize) -> String {
	if digest_len == 0 {
		component.to_string()
	} else {
		format!("{}_{}", component, digest_suffix(component, digest_len))
	}
}

/// Strips a digest suffix previously applied by [`render_terminal`],
/// returning `None` if `rendered` does not carry a suffix matching
/// `digest_len`'s expected shape — such a name is foreign, not ours.
fn parse_terminal(rendered: &str, digest_len: usize) -> Option<String> {
	if digest_len == 0 {
		return Some(rendered.to_string());
	}
	let (orig, suffix) = rendered.rsplit_once('_')?;
	if suffix.len() != digest_len || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
		return None;
	}
	if digest_suffix(orig, digest_len) == suffix {
		Some(orig.to_string())
	} else {
		None
	}
}

fn stat_etag(meta: &std::fs::Metadata) -> String {
	#[cfg(unix)]
	{
		use std::os::unix::fs::MetadataExt;
		format!("{}:{}:{}", meta.mtime_nsec() as i64 + meta.mtime() * 1_000_000_000, meta.len(), meta.ino())
	}
	#[cfg(not(unix))]
	{
		let modified_ns = meta
			.modified()
			.ok()
			.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
			.map(|d| d.as_nanos())
			.unwrap_or(0);
		format!("{}:{}:0", modified_ns, meta.len())
	}
}

fn stat_timestamp_ns(meta: &std::fs::Metadata) -> i64 {
	meta.modified()
		.ok()
		.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}

/// Filesystem-backed [`PersiDict`] rooted at a base directory: the SafeKey's
/// non-terminal components become nested subdirectories, the terminal
/// component (digest-suffixed per [`StoreConfig::digest_len`]) becomes the
/// filename, with the configured codec's extension appended.
pub struct FileDirBackend {
	base_dir: PathBuf,
	config: StoreConfig,
	tmp_counter: AtomicU64,
}

impl FileDirBackend {
	/// Builds a backend rooted at `base_dir` with default configuration.
	/// `base_dir` is created if absent.
	pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Arc<Self>, PersiDictError> {
		Self::with_config(base_dir, StoreConfig::new()).await
	}

	/// Builds a backend rooted at `base_dir`, configured by `config`.
	pub async fn with_config(
		base_dir: impl Into<PathBuf>, config: StoreConfig,
	) -> Result<Arc<Self>, PersiDictError> {
		let base_dir = base_dir.into();
		tokio::fs::create_dir_all(&base_dir).await.map_err(|e| {
			PersiDictError::backend_failure("FileDirBackend", "create_dir_all", e)
		})?;
		Ok(Arc::new(FileDirBackend { base_dir, config, tmp_counter: AtomicU64::new(0) }))
	}

	fn extension(&self) -> String {
		self.config.codec().extension().to_string()
	}

	fn path_for(&self, key: &SafeKey) -> PathBuf {
		let components = key.components();
		let digest_len = self.config.digest_len();
		let mut path = self.base_dir.clone();
		for component in &components[..components.len() - 1] {
			path.push(render_terminal(component, digest_len));
		}
		let terminal = render_terminal(&components[components.len() - 1], digest_len);
		path.push(format!("{}.{}", terminal, self.extension()));
		path
	}

	fn temp_path_for(&self, final_path: &Path) -> PathBuf {
		let counter = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
		let file_name = final_path.file_name().and_then(|n| n.to_str()).unwrap_or("item");
		final_path.with_file_name(format!("{}.tmp-{}-{}", file_name, std::process::id(), counter))
	}

	async fn fsync_parent_best_effort(&self, path: &Path) {
		if let Some(parent) = path.parent() {
			let parent = parent.to_path_buf();
			let display = parent.display().to_string();
			let result = tokio::task::spawn_blocking(move || {
				std::fs::File::open(&parent).and_then(|f| f.sync_all())
			})
			.await;
			match result {
				Ok(Ok(())) => {},
				Ok(Err(e)) => warn!("fsync of {} failed, continuing: {}", display, e),
				Err(e) => warn!("fsync task for {} panicked, continuing: {}", display, e),
			}
		}
	}

	async fn write_atomic(&self, key: &SafeKey, path: &Path, bytes: &[u8]) -> Result<(), PersiDictError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(|e| {
				PersiDictError::backend_failure_for_key(
					"FileDirBackend", "create_dir_all", key.to_string(), e,
				)
			})?;
		}
		let temp_path = self.temp_path_for(path);
		tokio::fs::write(&temp_path, bytes).await.map_err(|e| {
			PersiDictError::backend_failure_for_key("FileDirBackend", "write", key.to_string(), e)
		})?;

		let mut attempt = 0;
		loop {
			match tokio::fs::rename(&temp_path, path).await {
				Ok(()) => break,
				Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied
					&& attempt < RENAME_RETRY_ATTEMPTS =>
				{
					attempt += 1;
					debug!("rename of {} busy, retrying ({}/{})", key, attempt, RENAME_RETRY_ATTEMPTS);
					tokio::time::sleep(RENAME_RETRY_BASE_DELAY * attempt).await;
				},
				Err(e) => {
					let _ = tokio::fs::remove_file(&temp_path).await;
					return Err(PersiDictError::backend_failure_for_key(
						"FileDirBackend", "rename", key.to_string(), e,
					));
				},
			}
		}
		self.fsync_parent_best_effort(path).await;
		Ok(())
	}

	async fn stat(&self, key: &SafeKey) -> Result<Option<std::fs::Metadata>, PersiDictError> {
		let path = self.path_for(key);
		match tokio::fs::metadata(&path).await {
			Ok(meta) => Ok(Some(meta)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"FileDirBackend", "metadata", key.to_string(), e,
			)),
		}
	}

	async fn current_etag(&self, key: &SafeKey) -> Result<EtagSlot, PersiDictError> {
		Ok(match self.stat(key).await? {
			Some(meta) => EtagSlot::Tag(stat_etag(&meta)),
			None => EtagSlot::NotAvailable,
		})
	}

	async fn read_value(&self, key: &SafeKey) -> Result<Option<Bytes>, PersiDictError> {
		let path = self.path_for(key);
		match tokio::fs::read(&path).await {
			Ok(raw) => Ok(Some(self.config.codec().decode(&raw)?)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"FileDirBackend", "read", key.to_string(), e,
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

	async fn check_not_append_only(&self, key: &SafeKey, operation: &str) -> Result<(), PersiDictError> {
		if self.config.append_only() && self.stat(key).await?.is_some() {
			Err(PersiDictError::MutationPolicy(format!(
				"{} is rejected: this store is append-only",
				operation
			)))
		} else {
			Ok(())
		}
	}

	fn walk<'a>(
		&'a self, dir: PathBuf, prefix: Vec<String>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<SafeKey>, PersiDictError>> + Send + 'a>> {
		Box::pin(async move {
			let mut read_dir = match tokio::fs::read_dir(&dir).await {
				Ok(rd) => rd,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
				Err(e) => return Err(PersiDictError::backend_failure("FileDirBackend", "read_dir", e)),
			};
			let mut found = Vec::new();
			loop {
				let entry = match read_dir.next_entry().await {
					Ok(Some(e)) => e,
					Ok(None) => break,
					Err(_) => break,
				};
				let file_type = match entry.file_type().await {
					Ok(ft) => ft,
					Err(_) => continue,
				};
				let name = entry.file_name();
				let name = match name.to_str() {
					Some(n) => n.to_string(),
					None => continue,
				};
				if file_type.is_dir() {
					if let Some(orig) = parse_terminal(&name, self.config.digest_len()) {
						let mut nested_prefix = prefix.clone();
						nested_prefix.push(orig);
						let nested = self.walk(entry.path(), nested_prefix).await?;
						found.extend(nested);
					}
				} else if file_type.is_file() {
					let ext = self.extension();
					let suffix = format!(".{}", ext);
					if let Some(stem) = name.strip_suffix(&suffix) {
						if let Some(orig) = parse_terminal(stem, self.config.digest_len()) {
							let mut components = prefix.clone();
							components.push(orig);
							if let Ok(key) = SafeKey::new(components) {
								found.push(key);
							}
						}
					}
				}
			}
			Ok(found)
		})
	}
}

#[async_trait]
impl PersiDict for FileDirBackend {
	async fn get(&self, key: &SafeKey) -> Result<Bytes, PersiDictError> {
		self.read_value(key).await?.ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
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
				self.check_not_append_only(key, "overwriting an existing key").await?;
				let encoded = self.config.codec().encode(&bytes)?;
				self.write_atomic(key, &self.path_for(key), &encoded).await
			},
		}
	}

	async fn discard(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		self.check_not_append_only(key, "deleting a key").await?;
		let path = self.path_for(key);
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(PersiDictError::backend_failure_for_key(
				"FileDirBackend", "remove_file", key.to_string(), e,
			)),
		}
	}

	async fn contains(&self, key: &SafeKey) -> Result<bool, PersiDictError> {
		Ok(self.stat(key).await?.is_some())
	}

	async fn len(&self) -> Result<usize, PersiDictError> {
		Ok(self.keys().await?.len())
	}

	async fn etag(&self, key: &SafeKey) -> Result<String, PersiDictError> {
		match self.current_etag(key).await? {
			EtagSlot::Tag(tag) => Ok(tag),
			EtagSlot::NotAvailable => Err(PersiDictError::KeyMissing(key.to_string())),
		}
	}

	async fn timestamp(&self, key: &SafeKey) -> Result<i64, PersiDictError> {
		self.stat(key).await?.map(|m| stat_timestamp_ns(&m)).ok_or_else(|| PersiDictError::KeyMissing(key.to_string()))
	}

	async fn keys(&self) -> Result<Vec<SafeKey>, PersiDictError> {
		self.walk(self.base_dir.clone(), Vec::new()).await
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
			let ts = self.timestamp(&key).await?;
			entries.push((key, ts));
		}
		entries.sort_by_key(|(_, ts)| *ts);
		Ok(entries.into_iter().take(n).map(|(k, _)| k).collect())
	}

	async fn newest_keys(&self, n: usize) -> Result<Vec<SafeKey>, PersiDictError> {
		let mut entries = Vec::new();
		for key in self.keys().await? {
			let ts = self.timestamp(&key).await?;
			entries.push((key, ts));
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
		let actual_etag = self.current_etag(key).await?;
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);
		let new_value = match &actual_etag {
			EtagSlot::NotAvailable => ValueSlot::NotAvailable,
			EtagSlot::Tag(_) => {
				if retrieve.should_retrieve(&expected_etag, &actual_etag) {
					ValueSlot::Real(self.read_value(key).await?.ok_or_else(|| {
						PersiDictError::backend_failure_for_key(
							"FileDirBackend",
							"get_item_if",
							key.to_string(),
							"item vanished between stat and read",
						)
					})?)
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
		let actual_etag = self.current_etag(key).await?;
		let satisfied = condition.is_satisfied(&expected_etag, &actual_etag);

		if !satisfied {
			let new_value = match &actual_etag {
				EtagSlot::NotAvailable => ValueSlot::NotAvailable,
				EtagSlot::Tag(_) => {
					if retrieve.should_retrieve(&expected_etag, &actual_etag) {
						ValueSlot::Real(self.read_value(key).await?.unwrap_or(Bytes::new()))
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
				self.check_not_append_only(key, "deleting a key").await?;
				let path = self.path_for(key);
				match tokio::fs::remove_file(&path).await {
					Ok(()) => {},
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
					Err(e) => return Err(PersiDictError::backend_failure_for_key(
						"FileDirBackend", "remove_file", key.to_string(), e,
					)),
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
				self.check_not_append_only(key, "overwriting an existing key").await?;
				let encoded = self.config.codec().encode(&bytes)?;
				self.write_atomic(key, &self.path_for(key), &encoded).await?;
				let resulting_etag = self.current_etag(key).await?;
				Ok(ConditionalResult {
					condition_was_satisfied: true,
					actual_etag,
					resulting_etag,
					new_value: ValueSlot::NotRetrieved,
				})
			},
		}
	}

	async fn setdefault_if(
		&self, key: &SafeKey, default_value: Bytes, expected_etag: EtagSlot,
		condition: ConditionFlag, retrieve: RetrieveMode,
	) -> Result<ConditionalResult, PersiDictError> {
		if let Some(meta) = self.stat(key).await? {
			let actual_etag = EtagSlot::Tag(stat_etag(&meta));
			let new_value = if retrieve.should_retrieve(&expected_etag, &actual_etag) {
				ValueSlot::Real(self.read_value(key).await?.unwrap_or(Bytes::new()))
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
		let actual_etag = self.current_etag(key).await?;
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

		self.check_not_append_only(key, "deleting a key").await?;
		let path = self.path_for(key);
		match tokio::fs::remove_file(&path).await {
			Ok(()) => {},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
			Err(e) => return Err(PersiDictError::backend_failure_for_key(
				"FileDirBackend", "remove_file", key.to_string(), e,
			)),
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

	async fn make_backend() -> (Arc<FileDirBackend>, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let backend = FileDirBackend::new(dir.path()).await.unwrap();
		(backend, dir)
	}

	// Each generated test gets its own backend; the backing tempdir is
	// intentionally leaked onto disk since `create_store()` only returns
	// the store itself; acceptable for one-shot conformance runs.
	persidict_core::define_persidict_tests!(
		FileDirConformanceTest,
		FileDirBackend,
		FileDirBackend::new(tempfile::tempdir().unwrap().into_path()).await.unwrap()
	);

	#[tokio::test]
	async fn nested_keys_materialize_as_subdirectories() {
		let (store, _dir) = make_backend().await;
		let key = SafeKey::new(["users", "alice", "name"]).unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"Alice"))).await.unwrap();
		assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"Alice"));
		assert_eq!(store.keys().await.unwrap(), vec![key]);
	}

	#[tokio::test]
	async fn digest_suffixed_filenames_round_trip_through_keys() {
		let dir = tempfile::tempdir().unwrap();
		let store =
			FileDirBackend::with_config(dir.path(), StoreConfig::new().with_digest_len(6)).await.unwrap();
		let key = SafeKey::from_single("report").unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();
		assert_eq!(store.keys().await.unwrap(), vec![key]);
	}

	#[tokio::test]
	async fn digest_suffix_applies_to_intermediate_directories_too() {
		let dir = tempfile::tempdir().unwrap();
		let store =
			FileDirBackend::with_config(dir.path(), StoreConfig::new().with_digest_len(6)).await.unwrap();
		let key = SafeKey::new(["users", "alice", "name"]).unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"Alice"))).await.unwrap();

		let users_dir = dir.path().join(render_terminal("users", 6));
		assert!(users_dir.is_dir());
		let alice_dir = users_dir.join(render_terminal("alice", 6));
		assert!(alice_dir.is_dir());

		assert_eq!(store.keys().await.unwrap(), vec![key]);
	}

	#[tokio::test]
	async fn foreign_files_are_ignored_on_iteration() {
		let (store, dir) = make_backend().await;
		tokio::fs::write(dir.path().join("not-ours.dat"), b"junk").await.unwrap();
		assert_eq!(store.keys().await.unwrap().len(), 0);
	}

	#[tokio::test]
	async fn append_only_rejects_overwrite_and_delete() {
		let dir = tempfile::tempdir().unwrap();
		let store =
			FileDirBackend::with_config(dir.path(), StoreConfig::new().with_append_only(true))
				.await
				.unwrap();
		let key = SafeKey::from_single("k").unwrap();
		store.set(&key, ValueInput::Real(Bytes::from_static(b"v"))).await.unwrap();
		let err = store.set(&key, ValueInput::Real(Bytes::from_static(b"v2"))).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
		let err = store.discard(&key).await.unwrap_err();
		assert!(matches!(err, PersiDictError::MutationPolicy(_)));
	}
}
