//! The `Key -> point-count` map and its sharded, step-selected JSON serialization
//! (spec §3 "Hierarchy", §4.6).
//!
//! Grounded on `examples/original_source/entwine/builder/hierarchy.{hpp,cpp}`:
//! `set`/`get` behind a single lock, recursive save that starts a new shard file every
//! `step` depths (writing a `-1` sentinel at the boundary key), and a grid search over
//! candidate steps scored by `(fits-under-65536, relative-stddev, step)`.

use crate::key::{Direction, Key};
use octree_core::SmallKeyHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Candidate hierarchy steps tried during automatic step selection.
const CANDIDATE_STEPS: [u64; 4] = [5, 6, 8, 10];

/// Entries per file above which a candidate step is rejected (spec §4.6: "~65 536").
const MAX_ENTRIES_PER_FILE: u64 = 65_536;

/// Sentinel value meaning "see the child file rooted at this key" (spec §4.6).
pub const CONTINUATION_SENTINEL: i64 = -1;

pub struct Hierarchy {
    map: Mutex<SmallKeyHashMap<Key, u64>>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(SmallKeyHashMap::default()),
        }
    }

    /// Records (or overwrites) the resident count for `key`. Called exactly once per
    /// chunk at eviction time.
    pub fn set(&self, key: Key, count: u64) {
        self.map.lock().insert(key, count);
    }

    /// Zero if `key` has never been set — a chunk that has never been evicted.
    pub fn get(&self, key: Key) -> u64 {
        self.map.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(key, count)` entry currently recorded, in no particular order. Used by
    /// [`crate::merge::merge`] to walk a source build's full hierarchy.
    pub fn entries(&self) -> Vec<(Key, u64)> {
        self.map.lock().iter().map(|(&k, &v)| (k, v)).collect()
    }

    /// One shard's contents, rooted at `root`: true counts for every key down to (and
    /// excluding) the next step boundary, where a [`CONTINUATION_SENTINEL`] is written
    /// instead and a new shard takes over (spec §4.6).
    pub fn shard_contents(&self, root: Key, step: u64) -> Option<BTreeMap<String, i64>> {
        let map = self.map.lock();
        if map.get(&root).copied().unwrap_or(0) == 0 {
            return None;
        }
        let mut shard = BTreeMap::new();
        let mut rest = Vec::new();
        Self::build_shard(&map, root, step, true, &mut shard, &mut rest);
        Some(shard)
    }

    /// Every shard file reachable from `root`, as `(shard-root-key, contents)` pairs.
    pub fn shard_files(&self, root: Key, step: u64) -> Vec<(Key, BTreeMap<String, i64>)> {
        let map = self.map.lock();
        if map.get(&root).copied().unwrap_or(0) == 0 {
            return Vec::new();
        }
        let mut root_shard = BTreeMap::new();
        let mut files = Vec::new();
        Self::build_shard(&map, root, step, true, &mut root_shard, &mut files);
        files.push((root, root_shard));
        files
    }

    /// Recursively fills `shard` with entries belonging to the shard rooted wherever
    /// the nearest ancestor boundary (or the hierarchy root) started it. Each time a
    /// deeper boundary key is reached, writes a sentinel into `shard`, starts a fresh
    /// shard for that key and its subtree, and appends it to `files` once complete.
    fn build_shard(
        map: &SmallKeyHashMap<Key, u64>,
        key: Key,
        step: u64,
        is_shard_root: bool,
        shard: &mut BTreeMap<String, i64>,
        files: &mut Vec<(Key, BTreeMap<String, i64>)>,
    ) {
        let n = map.get(&key).copied().unwrap_or(0);
        if n == 0 {
            return;
        }

        let is_boundary = step != 0 && key.depth != 0 && key.depth as u64 % step == 0;

        if is_boundary && !is_shard_root {
            shard.insert(key.to_file_string(), CONTINUATION_SENTINEL);

            let mut next = BTreeMap::new();
            next.insert(key.to_file_string(), n as i64);
            for dir in Direction::all() {
                Self::build_shard(map, key.step(dir), step, false, &mut next, files);
            }
            files.push((key, next));
        } else {
            shard.insert(key.to_file_string(), n as i64);
            for dir in Direction::all() {
                Self::build_shard(map, key.step(dir), step, false, shard, files);
            }
        }
    }

    /// Per-candidate-step statistics used by [`Hierarchy::choose_step`].
    pub fn analyze(&self, root: Key, step: u64) -> StepAnalysis {
        let map = self.map.lock();
        let mut per_file: SmallKeyHashMap<Key, u64> = SmallKeyHashMap::default();
        per_file.insert(root, 1);
        Self::analyze_into(&map, root, step, root, &mut per_file);

        let total_files = per_file.len() as u64;
        let total_nodes: u64 = per_file.values().sum();
        let max_entries_per_file = per_file.values().copied().max().unwrap_or(0);
        let mean = total_nodes as f64 / total_files as f64;
        let variance: f64 = per_file
            .values()
            .map(|&n| (n as f64 - mean).powi(2))
            .sum::<f64>()
            / (total_nodes as f64 - 1.0).max(1.0);
        let stddev = variance.sqrt();
        let rsd = if mean > 0.0 { stddev / mean } else { 0.0 };

        StepAnalysis {
            step,
            total_files,
            max_entries_per_file,
            mean,
            stddev,
            rsd,
        }
    }

    fn analyze_into(
        map: &SmallKeyHashMap<Key, u64>,
        key: Key,
        step: u64,
        current_file: Key,
        per_file: &mut SmallKeyHashMap<Key, u64>,
    ) {
        let n = map.get(&key).copied().unwrap_or(0);
        if n == 0 {
            return;
        }
        *per_file.entry(current_file).or_insert(0) += 1;

        if step != 0 && key.depth != 0 && key.depth as u64 % step == 0 {
            per_file.insert(key, 1);
            for dir in Direction::all() {
                Self::analyze_into(map, key.step(dir), step, key, per_file);
            }
        } else {
            for dir in Direction::all() {
                Self::analyze_into(map, key.step(dir), step, current_file, per_file);
            }
        }
    }

    /// Runs the grid search over [`CANDIDATE_STEPS`] and returns the chosen step plus
    /// every candidate's analysis (the latter purely for logging, spec §14).
    pub fn choose_step(&self, root: Key) -> (u64, Vec<StepAnalysis>) {
        if self.len() as u64 <= MAX_ENTRIES_PER_FILE {
            return (0, Vec::new());
        }

        let mut analyses: Vec<StepAnalysis> =
            CANDIDATE_STEPS.iter().map(|&s| self.analyze(root, s)).collect();
        analyses.sort_by(StepAnalysis::cmp_preference);
        let chosen = analyses[0].step;
        (chosen, analyses)
    }
}

/// `(total_files, max_entries_per_file, mean, stddev, rsd)` for one candidate step
/// (spec §14 "Hierarchy analysis summary").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepAnalysis {
    pub step: u64,
    pub total_files: u64,
    pub max_entries_per_file: u64,
    pub mean: f64,
    pub stddev: f64,
    pub rsd: f64,
}

impl StepAnalysis {
    pub fn fits(&self) -> bool {
        self.max_entries_per_file <= MAX_ENTRIES_PER_FILE
    }

    /// Ordering used to pick the best candidate: fitting beats not fitting; among
    /// fitting candidates prefer markedly lower relative stddev, then the higher step
    /// (fewer files) when they're close.
    fn cmp_preference(a: &Self, b: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (a.fits(), b.fits()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        if a.rsd < b.rsd / 5.0 {
            return Ordering::Less;
        }
        if b.rsd < a.rsd / 5.0 {
            return Ordering::Greater;
        }
        b.step.cmp(&a.step)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Direction;

    #[test]
    fn get_is_zero_for_unset_key() {
        let h = Hierarchy::new();
        assert_eq!(h.get(Key::root()), 0);
    }

    #[test]
    fn set_then_get_round_trips() {
        let h = Hierarchy::new();
        h.set(Key::root(), 42);
        assert_eq!(h.get(Key::root()), 42);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn shard_contents_stops_at_unset_descendants() {
        let h = Hierarchy::new();
        h.set(Key::root(), 9);
        let child = Key::root().step(Direction::new(3));
        h.set(child, 4);

        let shard = h.shard_contents(Key::root(), 0).unwrap();
        assert_eq!(shard.get("0-0-0-0"), Some(&9));
        assert_eq!(shard.get(&child.to_file_string()), Some(&4));
    }

    #[test]
    fn step_boundary_writes_sentinel_and_starts_new_shard() {
        let h = Hierarchy::new();
        h.set(Key::root(), 3);
        let mut key = Key::root();
        for d in 0..3 {
            key = key.step(Direction::new(d % 8));
            h.set(key, 1);
        }
        // step = 2: depth 2 is a boundary.
        let shard = h.shard_contents(Key::root(), 2).unwrap();
        let boundary_key = Key::root()
            .step(Direction::new(0))
            .step(Direction::new(1));
        assert_eq!(
            shard.get(&boundary_key.to_file_string()),
            Some(&CONTINUATION_SENTINEL)
        );
    }

    #[test]
    fn choose_step_skips_analysis_under_the_file_limit() {
        let h = Hierarchy::new();
        h.set(Key::root(), 1);
        let (step, analyses) = h.choose_step(Key::root());
        assert_eq!(step, 0);
        assert!(analyses.is_empty());
    }
}
