//! Point-cloud-to-octree indexing core: key arithmetic, chunk storage, the chunk cache
//! and per-worker clipper, the hierarchy, and the builder that drives them over a worker
//! pool. File parsing, the wire chunk codec, and the blob-store endpoint are external
//! collaborators (see [`collaborators`]), not implemented here.

pub mod builder;
pub mod chunk;
pub mod chunk_cache;
pub mod clipper;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod grid;
pub mod hierarchy;
pub mod key;
pub mod manifest;
pub mod merge;
pub mod metadata;
pub mod overflow;
pub mod point;
pub mod scan;
pub mod subset;

pub use builder::Builder;
pub use chunk_cache::ChunkCache;
pub use clipper::Clipper;
pub use config::BuildConfig;
pub use error::{BuildError, BuildResult};
pub use key::{Bounds, Direction, Key};
pub use manifest::Manifest;
pub use merge::{merge, MergeSource};
pub use metadata::Metadata;
pub use point::{Schema, ScaleOffset, Voxel};
pub use subset::SubsetDescriptor;
