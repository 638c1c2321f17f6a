//! One octree node's storage: a grid, an overflow set, and the policy that decides
//! when overflow justifies spawning a child (spec §3 "Chunk", §4.3).
//!
//! Grounded on `examples/original_source/entwine/builder/chunk.cpp`'s `Chunk::insert`/
//! `insertOverflow`/`maybeOverflow`/`doOverflow`. The cache-recursion those methods do
//! directly (calling back into `ChunkCache::insert` for split re-inserts and for normal
//! descent) is kept out of `Chunk` here — it returns enough information for
//! `ChunkCache` to drive that recursion itself, so this module only ever touches its
//! own `Grid` and `Overflow`.

use crate::grid::{Grid, Outcome as GridOutcome};
use crate::key::{Bounds, Direction, Key};
use crate::overflow::{Overflow, Placement, SplitOutcome};
use crate::point::Voxel;

/// What became of a point handed to [`Chunk::insert`].
pub enum Settled {
    /// The point is now resident in this chunk (grid or overflow).
    Resident,
    /// Neither the grid nor overflow could hold it; the caller must step `key`/`bounds`
    /// toward this voxel's point and recurse into the child chunk.
    Descend(Voxel),
}

/// The full result of [`Chunk::insert`]: where the inserted point settled, plus an
/// overflow split that must be drained into a child chunk if one occurred.
pub struct InsertOutcome {
    pub settled: Settled,
    pub split: Option<SplitOutcome>,
}

pub struct Chunk {
    key: Key,
    bounds: Bounds,
    grid: Grid,
    overflow: Overflow,
}

impl Chunk {
    /// Builds a new chunk at `key`/`bounds`. `child_has_entries(dir)` should report
    /// whether the hierarchy already has a nonzero count for `key.child(dir)` — such a
    /// child already exists, so this chunk is born with that overflow slot null (spec
    /// §3: "`overflow[dir]` is non-null iff no child chunk yet exists").
    pub fn new(
        key: Key,
        bounds: Bounds,
        body_depth: u8,
        child_has_entries: impl Fn(Direction) -> bool,
    ) -> Self {
        let mut seed_null = [false; 8];
        for dir in Direction::all() {
            seed_null[dir.index()] = child_has_entries(dir);
        }
        Self {
            key,
            bounds,
            grid: Grid::new(body_depth),
            overflow: Overflow::new(seed_null),
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Drains every resident voxel (grid and overflow) for eviction/encoding. Only
    /// called once, from the cache, on the chunk's last `release_ref`.
    pub fn drain_all(&self) -> Vec<Voxel> {
        let mut out = self.grid.drain_all();
        out.extend(self.overflow.drain_all().into_iter().map(|(_, v)| v));
        out
    }

    /// Attempts to settle `voxel`, arriving at `key` (same depth as this chunk), into
    /// the grid or overflow (spec §4.3).
    pub fn insert(
        &self,
        key: Key,
        voxel: Voxel,
        shared_depth_threshold: u8,
        min_node_size: usize,
        max_node_size: usize,
        split_promotion_floor: usize,
    ) -> InsertOutcome {
        let voxel = match self.grid.insert(&self.bounds, voxel) {
            GridOutcome::Placed => {
                return InsertOutcome {
                    settled: Settled::Resident,
                    split: None,
                };
            }
            GridOutcome::Displaced(old) => old,
            GridOutcome::Collision(v) => v,
        };

        if self.key.depth < shared_depth_threshold {
            return InsertOutcome {
                settled: Settled::Descend(voxel),
                split: None,
            };
        }

        let dir = crate::key::direction_of(self.bounds.mid(), voxel.point);
        let grid_resident = self.grid.resident_count();
        let (placement, split) = self.overflow.insert(
            dir,
            key,
            voxel,
            grid_resident,
            min_node_size,
            max_node_size,
            split_promotion_floor,
        );

        match placement {
            Placement::Resident => InsertOutcome {
                settled: Settled::Resident,
                split,
            },
            // The bucket for this octant is already gone (its child was created by an
            // earlier split); the caller must descend.
            Placement::ChildExists(voxel) => InsertOutcome {
                settled: Settled::Descend(voxel),
                split,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::DVec3;

    fn root_chunk(body_depth: u8) -> Chunk {
        let bounds = Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0));
        Chunk::new(Key::root(), bounds, body_depth, |_| false)
    }

    fn voxel(p: DVec3) -> Voxel {
        Voxel::new(p, Box::new([]))
    }

    #[test]
    fn single_point_at_root_settles_in_grid() {
        let chunk = root_chunk(4);
        let outcome = chunk.insert(Key::root(), voxel(DVec3::splat(4.0)), 4, 4, 8, 4);
        assert!(matches!(outcome.settled, Settled::Resident));
        assert!(outcome.split.is_none());
    }

    #[test]
    fn collision_below_shared_depth_descends() {
        // shared_depth_threshold = 4, chunk is at depth 0 < 4, so any collision (or
        // displaced voxel) must descend rather than overflow.
        let chunk = root_chunk(1); // S = 2, deliberately small to force a collision
        let key = Key::root();
        // Both points quantize into the same [0,4)^3 cell (x/y/z cell 0 of 2).
        let a = chunk.insert(key, voxel(DVec3::new(1.0, 1.0, 1.0)), 4, 4, 8, 4);
        assert!(matches!(a.settled, Settled::Resident));

        // Same cell, farther from the chunk's center: collides and must descend.
        let b = chunk.insert(key, voxel(DVec3::new(0.1, 0.1, 0.1)), 4, 4, 8, 4);
        assert!(matches!(b.settled, Settled::Descend(_)));
        assert!(b.split.is_none());
    }
}
