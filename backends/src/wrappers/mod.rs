//! The three composable policy/caching wrappers, each an ordinary
//! [`persidict_core::PersiDict`] holding an owned `Arc<dyn PersiDict>` handle
//! to the store it wraps, in the same style as
//! [`persidict_core::subdict::PrefixedView`].

/// Skips ETag validation on cache hits because append-only values are
/// immutable once written; rejects mutation at the wrapper boundary.
pub mod append_only_cache;
/// Value + ETag caches kept coherent with a main backend via the
/// conditional-operation protocol.
pub mod mutable_cache;
/// Policy layer enforcing first-write-wins with an optional sampled
/// consistency check.
pub mod write_once;

pub use append_only_cache::AppendOnlyCacheWrapper;
pub use mutable_cache::MutableCacheWrapper;
pub use write_once::WriteOnceWrapper;
