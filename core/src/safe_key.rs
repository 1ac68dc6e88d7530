//! Canonical key representation.

use crate::error::PersiDictError;
use std::fmt;
use std::sync::Arc;

/// Maximum length, in bytes, of a single safe-string component.
///
/// Chosen well under common filesystem name limits (255 bytes on most
/// Unix filesystems) to leave headroom for digest suffixing.
pub const MAX_SAFE_STRING_LEN: usize = 200;

/// Returns `true` if `s` satisfies the safe-string predicate: non-empty,
/// strictly ASCII-printable, free of path separators/null/control
/// characters, not `.` or `..`, and within [`MAX_SAFE_STRING_LEN`].
pub fn is_safe_string(s: &str) -> bool {
	if s.is_empty() || s.len() > MAX_SAFE_STRING_LEN {
		return false;
	}
	if s == "." || s == ".." {
		return false;
	}
	s.bytes().all(|b| (0x20..=0x7e).contains(&b) && b != b'/' && b != b'\\')
}

fn validate_component(s: &str) -> Result<(), PersiDictError> {
	if is_safe_string(s) {
		Ok(())
	} else {
		Err(PersiDictError::InvalidArgument(format!(
			"{:?} is not a safe string component",
			s
		)))
	}
}

/// An immutable, non-empty, ordered sequence of safe-string components.
///
/// `SafeKey` is the canonical internal form of every key the core and its
/// backends operate on. Callers may construct one from a single string
/// ([`SafeKey::from_single`]) or from an ordered sequence
/// ([`SafeKey::new`]); both paths validate every component. Two keys are
/// value-equal iff their component sequences are equal — any `SafeKey`
/// returned from the core round-trips to an equal `SafeKey` when re-passed.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SafeKey(Arc<[String]>);

impl SafeKey {
	/// Builds a `SafeKey` from an ordered, non-empty sequence of components.
	///
	/// Returns [`PersiDictError::InvalidArgument`] if the sequence is empty
	/// or any component fails the safe-string predicate.
	pub fn new<I, S>(components: I) -> Result<Self, PersiDictError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let components: Vec<String> = components.into_iter().map(Into::into).collect();
		if components.is_empty() {
			return Err(PersiDictError::InvalidArgument(
				"a SafeKey must have at least one component".to_string(),
			));
		}
		for c in &components {
			validate_component(c)?;
		}
		Ok(SafeKey(components.into()))
	}

	/// Builds a single-component `SafeKey` from one string.
	pub fn from_single(component: impl Into<String>) -> Result<Self, PersiDictError> {
		Self::new([component.into()])
	}

	/// Returns the key's components in order.
	pub fn components(&self) -> &[String] {
		&self.0
	}

	/// Returns the number of components.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if this key has exactly zero components. Never true
	/// for a validly constructed `SafeKey`; provided for API symmetry.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns `true` if `self` starts with every component of `prefix`, in
	/// order. Used by `get_subdict`/`subdicts` to scope a view.
	pub fn starts_with(&self, prefix: &SafeKey) -> bool {
		prefix.0.len() <= self.0.len() && self.0[..prefix.0.len()] == *prefix.0
	}

	/// Returns the components after `prefix`, or `None` if `self` does not
	/// start with `prefix`.
	pub fn strip_prefix(&self, prefix: &SafeKey) -> Option<&[String]> {
		if self.starts_with(prefix) {
			Some(&self.0[prefix.0.len()..])
		} else {
			None
		}
	}

	/// Appends `suffix`'s components after `self`'s, returning a new key.
	pub fn join(&self, suffix: &SafeKey) -> SafeKey {
		let joined: Vec<String> = self.0.iter().chain(suffix.0.iter()).cloned().collect();
		SafeKey(joined.into())
	}
}

impl fmt::Display for SafeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "(")?;
		for (i, c) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{:?}", c)?;
		}
		write!(f, ")")
	}
}

impl TryFrom<&str> for SafeKey {
	type Error = PersiDictError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		SafeKey::from_single(value)
	}
}

impl TryFrom<Vec<String>> for SafeKey {
	type Error = PersiDictError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		SafeKey::new(value)
	}
}

impl TryFrom<&[&str]> for SafeKey {
	type Error = PersiDictError;

	fn try_from(value: &[&str]) -> Result<Self, Self::Error> {
		SafeKey::new(value.iter().map(|s| s.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_component() {
		assert!(SafeKey::new::<_, String>([]).is_err());
		assert!(SafeKey::new(["a", ""]).is_err());
	}

	#[test]
	fn rejects_dot_and_dotdot() {
		assert!(SafeKey::new(["."]).is_err());
		assert!(SafeKey::new([".."]).is_err());
		assert!(SafeKey::new(["users", ".."]).is_err());
	}

	#[test]
	fn rejects_path_separators_and_control_chars() {
		assert!(SafeKey::new(["a/b"]).is_err());
		assert!(SafeKey::new(["a\\b"]).is_err());
		assert!(SafeKey::new(["a\nb"]).is_err());
		assert!(SafeKey::new(["a\0b"]).is_err());
	}

	#[test]
	fn round_trips_through_components() {
		let key = SafeKey::new(["users", "alice", "name"]).unwrap();
		let again = SafeKey::new(key.components().to_vec()).unwrap();
		assert_eq!(key, again);
	}

	#[test]
	fn value_equality_not_identity() {
		let a = SafeKey::new(["x", "y"]).unwrap();
		let b = SafeKey::new(["x", "y"]).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn starts_with_and_strip_prefix() {
		let key = SafeKey::new(["users", "alice", "name"]).unwrap();
		let prefix = SafeKey::new(["users"]).unwrap();
		assert!(key.starts_with(&prefix));
		assert_eq!(key.strip_prefix(&prefix), Some(&["alice".to_string(), "name".to_string()][..]));

		let other = SafeKey::new(["config"]).unwrap();
		assert!(!key.starts_with(&other));
		assert_eq!(key.strip_prefix(&other), None);
	}
}
