//! Per-input-file bookkeeping: status, scanned bounds, and point counts (spec §6/§7,
//! SPEC_FULL.md §14 "Manifest file-info detail").
//!
//! Grounded on `examples/original_source/entwine/types/file-info.{hpp,cpp}`: one entry
//! per origin, carrying its own bounds/point-count alongside the aggregate status the
//! distilled spec already calls for.

use glam::DVec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Where one input file stands in the build (spec §7: "outstanding, inserted, omitted,
/// errored").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    Outstanding,
    Inserted,
    Omitted,
    Errored { message: String },
}

/// Per-file counters recorded alongside [`FileStatus`] once a file has been processed
/// (spec §7: "per-file point counts (inserted, out-of-bounds, overflow)").
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileCounts {
    pub inserted: u64,
    pub out_of_bounds: u64,
}

/// One manifest entry: an origin's path plus everything learned about it from scanning
/// and building.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub origin: u64,
    pub path: String,
    pub status: FileStatus,
    pub bounds: Option<(DVec3, DVec3)>,
    pub point_count: Option<u64>,
    pub counts: FileCounts,
}

impl ManifestEntry {
    pub fn new(origin: u64, path: impl Into<String>) -> Self {
        Self {
            origin,
            path: path.into(),
            status: FileStatus::Outstanding,
            bounds: None,
            point_count: None,
            counts: FileCounts::default(),
        }
    }
}

/// The origin -> file manifest a [`crate::builder::Builder`] drives through (spec §4.7:
/// "the manifest (origin -> file)").
#[derive(Default)]
pub struct Manifest {
    entries: Mutex<Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn new(paths: impl IntoIterator<Item = String>) -> Self {
        let entries = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| ManifestEntry::new(i as u64, path))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Origins still `Outstanding`, in manifest order, capped at `limit` (spec §4.7:
    /// "for each unindexed origin in the manifest (bounded by `limit`)").
    pub fn outstanding(&self, limit: usize) -> Vec<(u64, String)> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status == FileStatus::Outstanding)
            .take(limit)
            .map(|e| (e.origin, e.path.clone()))
            .collect()
    }

    pub fn set_scan_result(&self, origin: u64, bounds: (DVec3, DVec3), point_count: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.origin == origin) {
            entry.bounds = Some(bounds);
            entry.point_count = Some(point_count);
        }
    }

    pub fn mark_inserted(&self, origin: u64, counts: FileCounts) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.origin == origin) {
            entry.status = FileStatus::Inserted;
            entry.counts = counts;
        }
    }

    pub fn mark_errored(&self, origin: u64, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.origin == origin) {
            entry.status = FileStatus::Errored {
                message: message.into(),
            };
        }
    }

    pub fn snapshot(&self) -> Vec<ManifestEntry> {
        self.entries.lock().clone()
    }
}
