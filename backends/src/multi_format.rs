//! Groups sibling [`PersiDict`] instances that share one key-space but
//! differ only in serialization format.

use std::collections::BTreeMap;
use std::sync::Arc;

use persidict_core::error::PersiDictError;
use persidict_core::PersiDict;

/// A named record of [`PersiDict`] instances addressing the same logical
/// items under different formats/extensions (e.g. `container.json` next to
/// `container.pkl`, both rooted at the same directory or bucket prefix).
///
/// This is deliberately *not* a [`PersiDict`] itself: it has no keys or
/// values of its own, only named sub-dicts, so calling a mapping operation
/// on it directly would be a structural type error rather than a runtime
/// one. Index into it by format name to reach an ordinary `PersiDict`.
pub struct MultiFormatContainer {
	formats: BTreeMap<String, Arc<dyn PersiDict>>,
}

impl MultiFormatContainer {
	/// Builds a container from `(format_name, store)` pairs. Panics if a
	/// format name repeats, since that would silently shadow one store with
	/// another.
	pub fn new(formats: impl IntoIterator<Item = (String, Arc<dyn PersiDict>)>) -> Self {
		let mut map = BTreeMap::new();
		for (name, store) in formats {
			if map.insert(name.clone(), store).is_some() {
				panic!("duplicate format name in MultiFormatContainer: {}", name);
			}
		}
		MultiFormatContainer { formats: map }
	}

	/// Returns the sub-dict addressed by `format_name`, or
	/// [`PersiDictError::InvalidArgument`] if no such format was configured.
	pub fn get(&self, format_name: &str) -> Result<Arc<dyn PersiDict>, PersiDictError> {
		self.formats.get(format_name).cloned().ok_or_else(|| {
			PersiDictError::InvalidArgument(format!("no such format: {}", format_name))
		})
	}

	/// Returns every configured format name, in sorted order.
	pub fn format_names(&self) -> Vec<&str> {
		self.formats.keys().map(String::as_str).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryBackend;
	use persidict_core::sentinel::ValueInput;
	use persidict_core::safe_key::SafeKey;
	use persidict_core::Bytes;

	fn make_container() -> MultiFormatContainer {
		MultiFormatContainer::new([
			("json".to_string(), MemoryBackend::new() as Arc<dyn PersiDict>),
			("pkl".to_string(), MemoryBackend::new() as Arc<dyn PersiDict>),
		])
	}

	#[tokio::test]
	async fn each_format_is_an_independent_store() {
		let container = make_container();
		let key = SafeKey::from_single("k").unwrap();

		let json = container.get("json").unwrap();
		json.set(&key, ValueInput::Real(Bytes::from_static(b"{}"))).await.unwrap();

		let pkl = container.get("pkl").unwrap();
		assert!(!pkl.contains(&key).await.unwrap());
		assert!(json.contains(&key).await.unwrap());
	}

	#[test]
	fn unknown_format_is_invalid_argument() {
		let container = make_container();
		let err = container.get("xml").unwrap_err();
		assert!(matches!(err, PersiDictError::InvalidArgument(_)));
	}

	#[test]
	fn format_names_are_sorted() {
		let container = make_container();
		assert_eq!(container.format_names(), vec!["json", "pkl"]);
	}

	#[test]
	#[should_panic(expected = "duplicate format name")]
	fn duplicate_format_name_panics() {
		MultiFormatContainer::new([
			("json".to_string(), MemoryBackend::new() as Arc<dyn PersiDict>),
			("json".to_string(), MemoryBackend::new() as Arc<dyn PersiDict>),
		]);
	}
}
