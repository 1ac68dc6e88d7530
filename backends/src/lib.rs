//! Concrete [`PersiDict`] backends and the composable wrappers/utilities
//! built atop them.
//!
//! Three reference backends own storage directly: [`memory::MemoryBackend`]
//! (process-local), [`filedir::FileDirBackend`] (local filesystem, atomic
//! replace), and [`s3::S3Backend`] (S3-compatible object store, native
//! conditional headers). [`transform::TransformEngine`] implements the
//! retry-driven read-modify-write loop atop any backend's conditional
//! surface. The `wrappers` module holds the three composable policy/caching
//! layers, and [`multi_format::MultiFormatContainer`] groups sibling
//! PersiDicts that share a key-space but differ in codec.
//!
//! [`PersiDict`]: persidict_core::PersiDict

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

/// Filesystem-backed [`persidict_core::PersiDict`]: one file per item, atomic
/// replace, stat-derived ETags.
pub mod filedir;
/// Process-local [`persidict_core::PersiDict`]: a mutex-guarded map with a
/// monotonic per-instance ETag counter.
pub mod memory;
/// Groups named, same-key-space [`persidict_core::PersiDict`] instances that
/// differ only in serialization format.
pub mod multi_format;
/// S3-compatible object-store [`persidict_core::PersiDict`]: native ETags,
/// conditional request headers.
pub mod s3;
/// The retry-driven read-modify-write loop built atop the conditional
/// operation protocol.
pub mod transform;
/// The three composable wrappers: cached mutable, cached append-only, and
/// write-once.
pub mod wrappers;

pub use filedir::FileDirBackend;
pub use memory::MemoryBackend;
pub use multi_format::MultiFormatContainer;
pub use s3::S3Backend;
pub use transform::TransformEngine;
