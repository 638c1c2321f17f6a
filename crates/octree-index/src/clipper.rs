//! The per-worker chunk residency cache that batches ref-count traffic against the
//! global [`ChunkCache`] (spec §4.5).
//!
//! Grounded on `examples/original_source/entwine/builder/clipper.{hpp,cpp}`'s two-tier
//! fast/slow design (a one-slot-per-depth fast array plus a `Map<Xyz, ChunkPtr>` slow
//! tier per depth, each slow slot carrying a fresh flag cleared on clip and set on
//! access) and on `pruner.hpp`'s simpler array-of-`CachedChunk` fast tier, which
//! confirms the same shape survived into the newer chunk-cache redesign.

use crate::chunk::Chunk;
use crate::chunk_cache::ChunkCache;
use crate::collaborators::{ChunkCodec, Endpoint};
use crate::error::{BuildError, BuildResult};
use crate::key::Key;
use octree_core::SmallKeyHashMap;
use std::sync::Arc;

struct SlowEntry {
    chunk: Arc<Chunk>,
    fresh: bool,
}

pub struct Clipper<C, E> {
    cache: Arc<ChunkCache<C, E>>,
    origin: u64,
    min_clip_depth: u8,
    clip_cache_size: usize,
    sleep_count: u64,
    since_clip: u64,
    fast: Vec<Option<(Key, Arc<Chunk>)>>,
    slow: Vec<SmallKeyHashMap<(u64, u64, u64), SlowEntry>>,
}

impl<C, E> Clipper<C, E>
where
    C: ChunkCodec,
    E: Endpoint,
{
    pub fn new(cache: Arc<ChunkCache<C, E>>, origin: u64) -> Self {
        let config = *cache.config();
        let max_depth = config.max_depth as usize + 1;
        Self {
            cache,
            origin,
            min_clip_depth: config.min_clip_depth,
            clip_cache_size: config.clip_cache_size,
            sleep_count: config.sleep_count.max(1),
            since_clip: 0,
            fast: vec![None; max_depth],
            slow: (0..max_depth).map(|_| SmallKeyHashMap::default()).collect(),
        }
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Resolves `key` to a chunk pointer, checking the fast slot then the slow map
    /// before falling through to [`ChunkCache::acquire_ref`] (spec §4.5 `get`).
    pub fn get(&mut self, key: Key) -> BuildResult<Arc<Chunk>> {
        let depth = key.depth as usize;
        let fast = self.fast.get(depth).ok_or(BuildError::MaxDepthExceeded {
            max_depth: key.depth,
        })?;
        if let Some((k, chunk)) = fast {
            if *k == key {
                let chunk = chunk.clone();
                if let Some(entry) = self.slow[depth].get_mut(&(key.x, key.y, key.z)) {
                    entry.fresh = true;
                }
                return Ok(chunk);
            }
        }

        if let Some(entry) = self.slow[depth].get_mut(&(key.x, key.y, key.z)) {
            entry.fresh = true;
            let chunk = entry.chunk.clone();
            self.fast[depth] = Some((key, chunk.clone()));
            return Ok(chunk);
        }

        let chunk = self.cache.acquire_ref(key, self.origin)?;
        self.slow[depth].insert(
            (key.x, key.y, key.z),
            SlowEntry {
                chunk: chunk.clone(),
                fresh: true,
            },
        );
        self.fast[depth] = Some((key, chunk.clone()));
        Ok(chunk)
    }

    /// Called once per point processed by this worker; triggers a clip pass every
    /// `sleep_count` calls (spec §4.5: "after processing every `sleep_count` points").
    pub fn on_point_processed(&mut self) -> BuildResult<()> {
        self.since_clip += 1;
        if self.since_clip >= self.sleep_count {
            self.since_clip = 0;
            self.clip()?;
        }
        Ok(())
    }

    /// Walks the slow tier from deepest to shallowest, releasing stale (non-fresh)
    /// entries above `min_clip_depth` and clearing the fresh flag on survivors (spec
    /// §4.5 clip policy).
    pub fn clip(&mut self) -> BuildResult<()> {
        for depth in (0..self.slow.len()).rev() {
            if (depth as u8) < self.min_clip_depth {
                continue;
            }

            let stale: Vec<(u64, u64, u64)> = self.slow[depth]
                .iter()
                .filter(|(_, entry)| !entry.fresh)
                .map(|(xyz, _)| *xyz)
                .collect();
            for xyz in stale {
                self.slow[depth].remove(&xyz);
                self.release(depth, xyz)?;
            }

            // Enforce the retained-count ceiling even over still-fresh entries, oldest
            // (arbitrary iteration order) first, so a single hot stretch can't grow the
            // clipper without bound between clip passes.
            while self.slow[depth].len() > self.clip_cache_size {
                let xyz = *self.slow[depth].keys().next().expect("len > 0 checked above");
                self.slow[depth].remove(&xyz);
                self.release(depth, xyz)?;
            }

            for entry in self.slow[depth].values_mut() {
                entry.fresh = false;
            }
        }
        Ok(())
    }

    fn release(&mut self, depth: usize, xyz: (u64, u64, u64)) -> BuildResult<()> {
        if let Some((k, _)) = &self.fast[depth] {
            if (k.x, k.y, k.z) == xyz {
                self.fast[depth] = None;
            }
        }
        let key = Key {
            depth: depth as u8,
            x: xyz.0,
            y: xyz.1,
            z: xyz.2,
        };
        self.cache.release_ref(key, self.origin)
    }
}

impl<C, E> Drop for Clipper<C, E> {
    fn drop(&mut self) {
        for depth in 0..self.slow.len() {
            for (xyz, _) in self.slow[depth].drain() {
                let key = Key {
                    depth: depth as u8,
                    x: xyz.0,
                    y: xyz.1,
                    z: xyz.2,
                };
                if let Err(err) = self.cache.release_ref(key, self.origin) {
                    log::error!("failed to release chunk {key} on clipper drop: {err}");
                }
            }
        }
    }
}
