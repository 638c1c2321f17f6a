//! Small utilities shared by the octree indexing core.
//!
//! This crate plays the same role for `octree-index` that `feldspar-core` plays for
//! `feldspar-map`: hash map aliases, a fixed-identity block allocator, and the error
//! types that both the single-threaded and concurrent paths propagate.

pub mod allocator;
pub mod error;

use ahash::{AHashMap, AHashSet};

/// Hash map keyed on small, cheaply-hashable keys (chunk keys, origins).
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

pub use error::{CoreError, CoreResult};
