//! The point-source collaborator (spec §6): file parsing and reprojection live outside
//! this core. `octree-index` only needs a stream of `(point, attributes)` pairs plus
//! pre-scan bounds/count.

use crate::point::Voxel;
use glam::DVec3;

/// One opened input file, yielding points in whatever order the underlying format
/// stores them. Implementations (LAS/LAZ readers, reprojection) live outside this crate.
pub trait PointStream {
    fn next(&mut self) -> Option<Voxel>;
}

pub trait PointSource {
    type Stream: PointStream;
    type Error: std::error::Error + Send + Sync + 'static;

    fn open(&self, path: &str) -> Result<Self::Stream, Self::Error>;

    /// Pre-scan bounds and point count, used by the scan pre-pass (spec §4.9/§14).
    fn bounds(&self, path: &str) -> Result<(DVec3, DVec3), Self::Error>;
    fn point_count(&self, path: &str) -> Result<u64, Self::Error>;
}

/// An in-memory point source, for tests only: "files" are just named point vectors.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use super::*;
    use octree_core::SmallKeyHashMap;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("no such in-memory source file: {0}")]
    pub struct NoSuchFile(pub String);

    #[derive(Clone, Default)]
    pub struct MemoryPointSource {
        files: Arc<SmallKeyHashMap<String, Vec<Voxel>>>,
    }

    impl MemoryPointSource {
        pub fn new(files: impl IntoIterator<Item = (String, Vec<Voxel>)>) -> Self {
            Self {
                files: Arc::new(files.into_iter().collect()),
            }
        }
    }

    pub struct MemoryStream {
        remaining: std::vec::IntoIter<Voxel>,
    }

    impl PointStream for MemoryStream {
        fn next(&mut self) -> Option<Voxel> {
            self.remaining.next()
        }
    }

    impl PointSource for MemoryPointSource {
        type Stream = MemoryStream;
        type Error = NoSuchFile;

        fn open(&self, path: &str) -> Result<Self::Stream, Self::Error> {
            let points = self
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| NoSuchFile(path.to_string()))?;
            Ok(MemoryStream {
                remaining: points.into_iter(),
            })
        }

        fn bounds(&self, path: &str) -> Result<(DVec3, DVec3), Self::Error> {
            let points = self.files.get(path).ok_or_else(|| NoSuchFile(path.to_string()))?;
            let mut min = DVec3::splat(f64::INFINITY);
            let mut max = DVec3::splat(f64::NEG_INFINITY);
            for v in points {
                min = min.min(v.point);
                max = max.max(v.point);
            }
            Ok((min, max))
        }

        fn point_count(&self, path: &str) -> Result<u64, Self::Error> {
            self.files
                .get(path)
                .map(|v| v.len() as u64)
                .ok_or_else(|| NoSuchFile(path.to_string()))
        }
    }
}
