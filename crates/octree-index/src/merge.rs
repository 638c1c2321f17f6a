//! Reconciles an independently-built subset into a unified index (spec §4.8 `merge(dst,
//! src)`).
//!
//! Grounded on `examples/original_source/entwine/builder/merger.{hpp,cpp}`: walk the
//! source's hierarchy entry by entry; shared head chunks (above the shared-depth
//! threshold) get rehydrated and replayed through `dst`'s ordinary insert path, since
//! every subset independently wrote its own copy of them; everything below that
//! threshold is already disjoint and final, so its count is simply adopted.

use crate::chunk_cache::{chunk_file_path, ChunkCache};
use crate::clipper::Clipper;
use crate::collaborators::{ChunkCodec, Endpoint};
use crate::error::BuildResult;
use crate::hierarchy::Hierarchy;
use crate::key::Key;
use crate::point::Schema;
use crate::subset::SubsetDescriptor;
use std::sync::Arc;

/// One previously-built subset, as `merge` needs to see it: its hierarchy and wherever
/// its chunk bytes live.
pub struct MergeSource<'a, C, E> {
    pub hierarchy: &'a Hierarchy,
    pub endpoint: &'a E,
    pub codec: &'a C,
    pub schema: Schema,
    pub subset: Option<SubsetDescriptor>,
}

/// Merges `src` into `dst` (spec §4.8). Does not call `dst.save()`/write anything beyond
/// `dst`'s in-memory hierarchy and cache — the caller (typically iterating over every
/// subset of a build, then calling [`crate::builder::Builder::save`]) does that once at
/// the end.
pub fn merge<C, E>(
    dst: &Arc<ChunkCache<C, E>>,
    src: &MergeSource<'_, C, E>,
    shared_depth_threshold: u8,
    merge_origin: u64,
) -> BuildResult<()>
where
    C: ChunkCodec,
    E: Endpoint,
{
    let mut clipper = Clipper::new(dst.clone(), merge_origin);

    for (key, count) in src.hierarchy.entries() {
        if key.depth < shared_depth_threshold {
            let path = chunk_file_path(key, shared_depth_threshold, src.subset.as_ref());
            let bytes = src
                .endpoint
                .get(&path)
                .map_err(|e| crate::error::BuildError::Endpoint(e.to_string()))?;
            let points = src
                .codec
                .decode(&src.schema, &bytes)
                .map_err(|e| crate::error::BuildError::Codec(e.to_string()))?;
            for voxel in points {
                dst.insert(Key::root(), dst.root_bounds(), voxel, &mut clipper)?;
            }
        } else {
            dst.hierarchy().set(key, count);
        }
    }

    drop(clipper);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::codec::raw::RawCodec;
    use crate::collaborators::endpoint::local::LocalEndpoint;
    use crate::config::BuildConfig;
    use crate::key::Bounds;
    use crate::point::Voxel;
    use crate::subset::partition_bounds;
    use glam::DVec3;
    use std::sync::Arc;

    fn cache(dir: &std::path::Path, config: BuildConfig) -> Arc<ChunkCache<RawCodec, LocalEndpoint>> {
        Arc::new(ChunkCache::new(
            Arc::new(Hierarchy::new()),
            Arc::new(RawCodec),
            Arc::new(LocalEndpoint::new(dir)),
            Schema::absolute(0),
            Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0)),
            config,
        ))
    }

    #[test]
    fn deep_entries_are_adopted_without_rehydration() {
        let dst_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            shared_depth_threshold: 2,
            ..BuildConfig::default()
        };
        let dst = cache(dst_dir.path(), config);
        let src_hierarchy = Hierarchy::new();
        let deep_key = Key {
            depth: 5,
            x: 3,
            y: 1,
            z: 0,
        };
        src_hierarchy.set(deep_key, 17);

        let src_endpoint = LocalEndpoint::new(src_dir.path());
        let src_codec = RawCodec;
        let source = MergeSource {
            hierarchy: &src_hierarchy,
            endpoint: &src_endpoint,
            codec: &src_codec,
            schema: Schema::absolute(0),
            subset: Some(SubsetDescriptor { id: 1, of: 4 }),
        };

        merge(&dst, &source, 2, u64::MAX).unwrap();
        assert_eq!(dst.hierarchy().get(deep_key), 17);
    }

    #[test]
    fn head_entries_are_rehydrated_and_replayed_into_dst() {
        let dst_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            shared_depth_threshold: 2,
            ..BuildConfig::default()
        };

        // Build subset 1 of 4 directly against a ChunkCache, writing its own head chunk.
        let subset = SubsetDescriptor { id: 1, of: 4 };
        let cube = Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0));
        let sub_cube = partition_bounds(cube, subset.id, subset.of).unwrap();
        let src_cache = Arc::new(ChunkCache::with_subset(
            Arc::new(Hierarchy::new()),
            Arc::new(RawCodec),
            Arc::new(LocalEndpoint::new(src_dir.path())),
            Schema::absolute(0),
            cube,
            config,
            Some(subset),
        ));
        let mut src_clipper = Clipper::new(src_cache.clone(), 0);
        let point = Voxel::new(sub_cube.mid(), Box::new([]));
        src_cache
            .insert(Key::root(), cube, point.clone(), &mut src_clipper)
            .unwrap();
        drop(src_clipper);

        let src_hierarchy = src_cache.hierarchy().entries();
        let src_hierarchy_store = Hierarchy::new();
        for (k, v) in src_hierarchy {
            src_hierarchy_store.set(k, v);
        }

        let dst = cache(dst_dir.path(), config);
        let src_endpoint = LocalEndpoint::new(src_dir.path());
        let src_codec = RawCodec;
        let source = MergeSource {
            hierarchy: &src_hierarchy_store,
            endpoint: &src_endpoint,
            codec: &src_codec,
            schema: Schema::absolute(0),
            subset: Some(subset),
        };

        merge(&dst, &source, 2, 0).unwrap();
        assert_eq!(dst.hierarchy().get(Key::root()), 1);
    }
}
