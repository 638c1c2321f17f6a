//! Drives a pool of worker threads through the manifest, inserting every point from
//! every outstanding file into the chunk cache, then persists the hierarchy, manifest,
//! and top-level metadata (spec §4.7).
//!
//! Grounded on `examples/original_source/entwine/builder/builder.hpp`'s ownership shape
//! (endpoint pair, schema, bounds, registry, hierarchy, manifest) and
//! `thread-pools.cpp`'s fixed-size work pool, reimplemented here with a bounded
//! `crossbeam::channel` queue feeding a `crossbeam::scope` of worker threads — the
//! channel's bound is this crate's version of spec §5's "worker-pool queue is bounded;
//! enqueue blocks when full."

use crate::chunk_cache::ChunkCache;
use crate::clipper::Clipper;
use crate::collaborators::{ChunkCodec, Endpoint, PointSource, PointStream};
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::hierarchy::Hierarchy;
use crate::key::{Bounds, Key};
use crate::manifest::{FileCounts, Manifest};
use crate::metadata::{Metadata, SerializableSchema};
use crate::point::Schema;
use crate::subset::{partition_bounds, SubsetDescriptor};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Builder<P, C, E> {
    point_source: Arc<P>,
    output: Arc<E>,
    codec_name: String,
    schema: Schema,
    cube_bounds: Bounds,
    /// The subset's own sub-cube, used only to filter input points. `cube_bounds`
    /// itself always stays the *whole* root cube, even for a subset build, so every
    /// subset assigns the same `(depth, x, y, z)` key to the same spatial region —
    /// required for `merge` to line entries up across subsets (spec §4.8).
    subset_bounds: Option<Bounds>,
    cache: Arc<ChunkCache<C, E>>,
    hierarchy: Arc<Hierarchy>,
    manifest: Arc<Manifest>,
    subset: Option<SubsetDescriptor>,
}

impl<P, C, E> Builder<P, C, E>
where
    P: PointSource + Send + Sync,
    C: ChunkCodec + Send + Sync,
    E: Endpoint + Send + Sync,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        point_source: Arc<P>,
        output: Arc<E>,
        codec: Arc<C>,
        codec_name: impl Into<String>,
        schema: Schema,
        cube_bounds: Bounds,
        manifest: Arc<Manifest>,
        subset: Option<SubsetDescriptor>,
        config: BuildConfig,
    ) -> BuildResult<Self> {
        let subset_bounds = subset
            .map(|s| partition_bounds(cube_bounds, s.id, s.of))
            .transpose()?;
        let hierarchy = Arc::new(Hierarchy::new());
        let cache = Arc::new(ChunkCache::with_subset(
            hierarchy.clone(),
            codec,
            output.clone(),
            schema,
            cube_bounds,
            config,
            subset,
        ));
        Ok(Self {
            point_source,
            output,
            codec_name: codec_name.into(),
            schema,
            cube_bounds,
            subset_bounds,
            cache,
            hierarchy,
            manifest,
            subset,
        })
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The underlying chunk cache, exposed so callers can drive `merge` against it
    /// directly between independently-built subsets (spec §4.8).
    pub fn cache(&self) -> &Arc<ChunkCache<C, E>> {
        &self.cache
    }

    /// Drives `threads` workers over up to `limit` outstanding origins (spec §4.7
    /// steps 1-3). A fatal error (`RetryExhausted`, `MaxDepthExceeded`) from any worker
    /// stops new work from being dispatched and is returned once every in-flight task
    /// has finished; per-file errors never reach this return value.
    pub fn run(&self, threads: usize, limit: usize) -> BuildResult<()> {
        let origins = self.manifest.outstanding(limit);
        let threads = threads.max(1);
        let (tx, rx) = crossbeam::channel::bounded::<(u64, String)>(threads * 2);
        let fatal: Mutex<Option<BuildError>> = Mutex::new(None);

        crossbeam::scope(|scope| {
            for _ in 0..threads {
                let rx = rx.clone();
                let fatal = &fatal;
                scope.spawn(move |_| {
                    while let Ok((origin, path)) = rx.recv() {
                        if fatal.lock().is_some() {
                            continue;
                        }
                        if let Err(e) = self.process_origin(origin, &path) {
                            log::error!("fatal error processing origin {origin} ({path}): {e}");
                            let mut guard = fatal.lock();
                            if guard.is_none() {
                                *guard = Some(e);
                            }
                        }
                    }
                });
            }

            for item in origins {
                if fatal.lock().is_some() {
                    break;
                }
                if tx.send(item).is_err() {
                    break;
                }
            }
            drop(tx);
        })
        .expect("a build worker thread panicked");

        if let Some(e) = fatal.into_inner() {
            return Err(e);
        }
        Ok(())
    }

    fn process_origin(&self, origin: u64, path: &str) -> BuildResult<()> {
        let mut stream = match self.point_source.open(path) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("origin {origin} ({path}) failed to open: {e}");
                self.manifest.mark_errored(origin, e.to_string());
                return Ok(());
            }
        };

        let mut clipper = Clipper::new(self.cache.clone(), origin);
        let mut inserted = 0u64;
        let mut out_of_bounds = 0u64;

        while let Some(voxel) = stream.next() {
            let in_bounds = self.cube_bounds.contains(voxel.point)
                && self.subset_bounds.map_or(true, |b| b.contains(voxel.point));
            if !in_bounds {
                out_of_bounds += 1;
                continue;
            }
            self.cache.insert(Key::root(), self.cube_bounds, voxel, &mut clipper)?;
            inserted += 1;
        }

        drop(clipper);
        self.manifest.mark_inserted(
            origin,
            FileCounts {
                inserted,
                out_of_bounds,
            },
        );
        Ok(())
    }

    /// Writes the sharded hierarchy, the manifest, and the top-level metadata file
    /// (spec §4.7 step 4). By the time this runs, every worker's `Clipper` has already
    /// dropped and every chunk touched by this build has therefore already been
    /// evicted and encoded.
    pub fn save(&self) -> BuildResult<()> {
        let (step, analyses) = self.hierarchy.choose_step(Key::root());
        for analysis in &analyses {
            log::debug!(
                "hierarchy step {} candidate: {} files, max {} entries/file, rsd {:.4}",
                analysis.step,
                analysis.total_files,
                analysis.max_entries_per_file,
                analysis.rsd
            );
        }

        let suffix = crate::metadata::subset_suffix(self.subset.as_ref());

        for (key, contents) in self.hierarchy.shard_files(Key::root(), step) {
            let bytes = serde_json::to_vec(&contents)
                .map_err(|e| BuildError::InvariantViolation { detail: e.to_string() })?;
            let path = format!("ept-hierarchy/{}{}.json", key.to_file_string(), suffix);
            self.output
                .put(&path, &bytes)
                .map_err(|e| BuildError::Endpoint(e.to_string()))?;
        }

        let manifest_bytes = serde_json::to_vec(&self.manifest.snapshot())
            .map_err(|e| BuildError::InvariantViolation { detail: e.to_string() })?;
        self.output
            .put(&format!("ept-sources/list{suffix}.json"), &manifest_bytes)
            .map_err(|e| BuildError::Endpoint(e.to_string()))?;

        let metadata = Metadata {
            schema: SerializableSchema::from(self.schema),
            conforming_bounds: self.cube_bounds,
            cube_bounds: self.cube_bounds,
            srs: None,
            codec: self.codec_name.clone(),
            subset: self.subset,
            hierarchy_step: step,
            point_count: self.hierarchy.get(Key::root()),
        };
        let metadata_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| BuildError::InvariantViolation { detail: e.to_string() })?;
        self.output
            .put(&format!("ept{suffix}.json"), &metadata_bytes)
            .map_err(|e| BuildError::Endpoint(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::codec::raw::RawCodec;
    use crate::collaborators::endpoint::local::LocalEndpoint;
    use crate::collaborators::point_source::memory::MemoryPointSource;
    use crate::point::Voxel;
    use glam::DVec3;

    fn builder(
        dir: &std::path::Path,
        files: Vec<(String, Vec<Voxel>)>,
    ) -> Builder<MemoryPointSource, RawCodec, LocalEndpoint> {
        let manifest = Arc::new(Manifest::new(files.iter().map(|(p, _)| p.clone())));
        Builder::new(
            Arc::new(MemoryPointSource::new(files)),
            Arc::new(LocalEndpoint::new(dir)),
            Arc::new(RawCodec),
            "raw",
            Schema::absolute(0),
            Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0)),
            manifest,
            None,
            BuildConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn single_point_at_center_lands_in_the_root_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(
            dir.path(),
            vec![(
                "a".to_string(),
                vec![Voxel::new(DVec3::splat(4.0), Box::new([]))],
            )],
        );
        b.run(2, usize::MAX).unwrap();
        b.save().unwrap();

        assert_eq!(b.hierarchy().get(Key::root()), 1);
        let bytes = std::fs::read(dir.path().join("0-0-0-0.bin")).unwrap();
        let points = RawCodec.decode(&Schema::absolute(0), &bytes).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn out_of_bounds_points_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(
            dir.path(),
            vec![(
                "a".to_string(),
                vec![
                    Voxel::new(DVec3::splat(4.0), Box::new([])),
                    Voxel::new(DVec3::splat(100.0), Box::new([])),
                ],
            )],
        );
        b.run(1, usize::MAX).unwrap();
        let snapshot = b.manifest().snapshot();
        assert_eq!(snapshot[0].counts.inserted, 1);
        assert_eq!(snapshot[0].counts.out_of_bounds, 1);
    }

    #[test]
    fn errored_file_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(Manifest::new(["missing".to_string()]));
        let files: Vec<(String, Vec<Voxel>)> = Vec::new();
        let b = Builder::new(
            Arc::new(MemoryPointSource::new(files)),
            Arc::new(LocalEndpoint::new(dir.path())),
            Arc::new(RawCodec),
            "raw",
            Schema::absolute(0),
            Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0)),
            manifest,
            None,
            BuildConfig::default(),
        )
        .unwrap();
        b.run(1, usize::MAX).unwrap();
        let snapshot = b.manifest().snapshot();
        assert!(matches!(snapshot[0].status, crate::manifest::FileStatus::Errored { .. }));
    }

    #[test]
    fn subset_build_only_inserts_points_inside_its_own_partition() {
        use crate::subset::SubsetDescriptor;

        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(Manifest::new(["a".to_string()]));
        let files = vec![(
            "a".to_string(),
            vec![
                // Quadrant 1 (id=1 of 4) is x in [0,4), y in [0,4).
                Voxel::new(DVec3::new(1.0, 1.0, 4.0), Box::new([])),
                // Quadrant 2 (id=2 of 4) is x in [4,8), y in [0,4) — out of id=1's partition.
                Voxel::new(DVec3::new(7.0, 1.0, 4.0), Box::new([])),
            ],
        )];
        let b = Builder::new(
            Arc::new(MemoryPointSource::new(files)),
            Arc::new(LocalEndpoint::new(dir.path())),
            Arc::new(RawCodec),
            "raw",
            Schema::absolute(0),
            Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0)),
            manifest,
            Some(SubsetDescriptor { id: 1, of: 4 }),
            BuildConfig::default(),
        )
        .unwrap();
        b.run(1, usize::MAX).unwrap();
        let snapshot = b.manifest().snapshot();
        assert_eq!(snapshot[0].counts.inserted, 1);
        assert_eq!(snapshot[0].counts.out_of_bounds, 1);
    }
}
