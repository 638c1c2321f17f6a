//! Per-chunk overflow buffers: one packed buffer per child octant, holding points that
//! missed the grid but haven't yet justified spawning that child (spec §3/§4.2/§4.3).
//!
//! Grounded on `examples/original_source/entwine/builder/overflow.hpp`'s `Overflow`,
//! which pairs each buffered point with the key it arrived at. All eight buckets and
//! the running count share a single lock here, matching the source's one-mutex-per-chunk
//! overflow design (and §5's lock ordering: "Chunk overflow mutex" sits above the grid's
//! block-allocator and per-tube locks).

use crate::key::{Direction, Key};
use crate::point::Voxel;
use parking_lot::Mutex;

/// Whether an overflow insert landed, or found that a child chunk already claims this
/// octant (so the caller must descend instead).
pub enum Placement {
    Resident,
    /// The bucket for this octant is null (its child already exists); the voxel is
    /// handed back unchanged so the caller can descend instead.
    ChildExists(Voxel),
}

/// The largest bucket crossed the split threshold; its entries are detached and handed
/// back to the caller for re-insertion one level deeper.
pub struct SplitOutcome {
    pub direction: Direction,
    pub entries: Vec<(Key, Voxel)>,
}

struct State {
    buckets: [Option<Vec<(Key, Voxel)>>; 8],
    count: usize,
}

pub struct Overflow {
    state: Mutex<State>,
}

impl Overflow {
    /// `seed_null[i]` is `true` when the hierarchy already reports a non-empty child at
    /// octant `i`, in which case that bucket is born null (spec §3: "`overflow[dir]` is
    /// non-null iff no child chunk yet exists").
    pub fn new(seed_null: [bool; 8]) -> Self {
        let buckets = std::array::from_fn(|i| if seed_null[i] { None } else { Some(Vec::new()) });
        Self {
            state: Mutex::new(State { buckets, count: 0 }),
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Drains every bucket's buffered entries for eviction/encoding, leaving the
    /// overflow empty (but each bucket still `Some`, i.e. open — a chunk is only ever
    /// drained as part of being evicted from the cache entirely).
    pub fn drain_all(&self) -> Vec<(Key, Voxel)> {
        let mut state = self.state.lock();
        let mut out = Vec::new();
        for bucket in state.buckets.iter_mut().flatten() {
            out.append(bucket);
        }
        state.count = 0;
        out
    }

    /// Inserts `voxel` (arriving at `key`) into the bucket for `dir`, then checks whether
    /// the largest bucket has grown enough to split off a child. `grid_resident` is the
    /// chunk's current grid occupancy, needed for the split's `total` threshold.
    /// `split_promotion_floor` is the (possibly ratio-adjusted) minimum a single bucket
    /// must reach to be worth promoting, distinct from `min_node_size`, which only
    /// gates whether `maybe-split` runs at all (spec §9 open question).
    pub fn insert(
        &self,
        dir: Direction,
        key: Key,
        voxel: Voxel,
        grid_resident: usize,
        min_node_size: usize,
        max_node_size: usize,
        split_promotion_floor: usize,
    ) -> (Placement, Option<SplitOutcome>) {
        let mut state = self.state.lock();

        let Some(bucket) = state.buckets[dir.index()].as_mut() else {
            return (Placement::ChildExists(voxel), None);
        };
        bucket.push((key, voxel));
        state.count += 1;

        if state.count < min_node_size {
            return (Placement::Resident, None);
        }
        let total = grid_resident + state.count;
        if total < max_node_size {
            return (Placement::Resident, None);
        }

        let largest = state
            .buckets
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|entries| (i, entries.len())))
            .max_by_key(|&(_, len)| len);

        let split = match largest {
            Some((idx, len)) if len >= split_promotion_floor => {
                let entries = state.buckets[idx].take().unwrap();
                state.count -= len;
                Some(SplitOutcome {
                    direction: Direction::new(idx as u8),
                    entries,
                })
            }
            _ => None,
        };

        (Placement::Resident, split)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::DVec3;

    fn voxel() -> Voxel {
        Voxel::new(DVec3::ZERO, Box::new([]))
    }

    fn key() -> Key {
        Key {
            depth: 1,
            x: 0,
            y: 0,
            z: 0,
        }
    }

    #[test]
    fn null_bucket_reports_child_exists() {
        let mut seed = [false; 8];
        seed[3] = true;
        let overflow = Overflow::new(seed);
        let (placement, split) = overflow.insert(Direction::new(3), key(), voxel(), 0, 4, 8, 4);
        assert!(matches!(placement, Placement::ChildExists(_)));
        assert!(split.is_none());
        assert_eq!(overflow.count(), 0);
    }

    #[test]
    fn accumulation_below_threshold_does_not_split() {
        let overflow = Overflow::new([false; 8]);
        for _ in 0..3 {
            let (placement, split) = overflow.insert(Direction::new(0), key(), voxel(), 0, 4, 8, 4);
            assert!(matches!(placement, Placement::Resident));
            assert!(split.is_none());
        }
        assert_eq!(overflow.count(), 3);
    }

    #[test]
    fn largest_bucket_splits_once_total_crosses_max() {
        let overflow = Overflow::new([false; 8]);
        // 4 points in octant 0 cross min_node_size = 4; grid is empty so total = 4,
        // which does not yet reach max_node_size = 8.
        for _ in 0..4 {
            let (_, split) = overflow.insert(Direction::new(0), key(), voxel(), 0, 4, 8, 4);
            assert!(split.is_none());
        }
        // A 9th point overall (grid_resident simulated at 4) pushes total to 9 >= 8.
        let (_, split) = overflow.insert(Direction::new(0), key(), voxel(), 4, 4, 8, 4);
        let outcome = split.expect("expected a split");
        assert_eq!(outcome.direction.index(), 0);
        assert_eq!(outcome.entries.len(), 5);
        assert_eq!(overflow.count(), 0);
    }

    #[test]
    fn bucket_is_null_after_split() {
        let overflow = Overflow::new([false; 8]);
        for _ in 0..5 {
            overflow.insert(Direction::new(0), key(), voxel(), 4, 4, 8, 4);
        }
        // The 5th insert above triggered the split; a 6th must see the bucket as null.
        let (placement, _) = overflow.insert(Direction::new(0), key(), voxel(), 4, 4, 8, 4);
        assert!(matches!(placement, Placement::ChildExists(_)));
    }
}
