//! A standalone bounds/point-count pre-pass over the manifest, independent of `build`
//! (spec SPEC_FULL.md §14 "Scan pre-pass as its own entry point").
//!
//! Grounded on `examples/original_source/entwine/builder/scan.{hpp,cpp}`'s `Scan::go`,
//! which walks every input file recording its bounds/point count and aggregates them
//! into the overall conforming bounds before any chunk insertion starts. Threaded with
//! `crossbeam::scope`, matching `feldspar-map`'s own scoped-thread test style.

use crate::collaborators::PointSource;
use crate::key::Bounds;
use crate::manifest::Manifest;
use glam::DVec3;

/// Aggregate result of scanning every outstanding file in `manifest`: the conforming
/// bounds across all of them (before cube-extension) and the total point count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanResult {
    pub conforming_bounds: Bounds,
    pub point_count: u64,
}

/// Scans every outstanding file in `manifest` with `threads` worker threads, recording
/// each file's bounds/point count into the manifest and returning the aggregate.
/// Per-file scan failures are not fatal: the file is left `Outstanding` with no
/// bounds/point-count recorded, and `build` will surface the real error when it tries to
/// open the file.
pub fn scan_sources<P: PointSource + Sync>(
    manifest: &Manifest,
    source: &P,
    threads: usize,
) -> ScanResult {
    let origins = manifest.outstanding(usize::MAX);
    let threads = threads.max(1).min(origins.len().max(1));

    let results: Vec<Option<(DVec3, DVec3, u64)>> = if threads <= 1 {
        origins.iter().map(|(origin, path)| scan_one(manifest, source, *origin, path)).collect()
    } else {
        crossbeam::scope(|scope| {
            let chunks: Vec<&[(u64, String)]> = origins.chunks(origins.len().div_ceil(threads)).collect();
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    scope.spawn(move |_| {
                        chunk
                            .iter()
                            .map(|(origin, path)| scan_one(manifest, source, *origin, path))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        })
        .unwrap()
    };

    let mut min = DVec3::splat(f64::INFINITY);
    let mut max = DVec3::splat(f64::NEG_INFINITY);
    let mut point_count = 0u64;
    for result in results.into_iter().flatten() {
        min = min.min(result.0);
        max = max.max(result.1);
        point_count += result.2;
    }

    ScanResult {
        conforming_bounds: Bounds::new(min, max),
        point_count,
    }
}

fn scan_one<P: PointSource>(
    manifest: &Manifest,
    source: &P,
    origin: u64,
    path: &str,
) -> Option<(DVec3, DVec3, u64)> {
    let bounds = source.bounds(path).ok()?;
    let point_count = source.point_count(path).ok()?;
    manifest.set_scan_result(origin, bounds, point_count);
    Some((bounds.0, bounds.1, point_count))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::point_source::memory::MemoryPointSource;
    use crate::point::Voxel;

    fn source() -> MemoryPointSource {
        MemoryPointSource::new([
            (
                "a".to_string(),
                vec![
                    Voxel::new(DVec3::new(0.0, 0.0, 0.0), Box::new([])),
                    Voxel::new(DVec3::new(2.0, 2.0, 2.0), Box::new([])),
                ],
            ),
            (
                "b".to_string(),
                vec![Voxel::new(DVec3::new(8.0, 8.0, 8.0), Box::new([]))],
            ),
        ])
    }

    #[test]
    fn aggregates_bounds_and_point_count_across_files() {
        let manifest = Manifest::new(["a".to_string(), "b".to_string()]);
        let result = scan_sources(&manifest, &source(), 2);
        assert_eq!(result.point_count, 3);
        assert_eq!(result.conforming_bounds.min, DVec3::splat(0.0));
        assert_eq!(result.conforming_bounds.max, DVec3::splat(8.0));
    }

    #[test]
    fn records_per_file_scan_results_into_the_manifest() {
        let manifest = Manifest::new(["a".to_string(), "b".to_string()]);
        scan_sources(&manifest, &source(), 1);
        let snapshot = manifest.snapshot();
        assert_eq!(snapshot[0].point_count, Some(2));
        assert_eq!(snapshot[1].point_count, Some(1));
    }
}
