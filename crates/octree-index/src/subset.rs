//! Subset partitioning for parallel, disjoint builds over the same cube (spec §4.8,
//! SPEC_FULL.md §14 "Subset partitioning helper").
//!
//! Grounded on `examples/original_source/entwine/types/subset.{hpp,cpp}`: `of` must be a
//! perfect-square power of two (equivalently, a power of four), `id` is 1-based, and each
//! of `log4(of)` splits narrows the cube along X/Y only by one bit of `id - 1`, leaving Z
//! at full extent.

use crate::error::{BuildError, BuildResult};
use crate::key::Bounds;
use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubsetDescriptor {
    pub id: u64,
    pub of: u64,
}

/// `log4(of)`, or `None` if `of` isn't a power of four greater than one.
fn splits_for(of: u64) -> Option<u32> {
    if of <= 1 || !of.is_power_of_two() {
        return None;
    }
    let log2 = of.trailing_zeros();
    if log2 % 2 != 0 {
        return None;
    }
    Some(log2 / 2)
}

/// Narrows `cube` to the sub-cube subset `id` (1-based) owns out of `of` total subsets,
/// splitting only X/Y at each of `log4(of)` levels (Z is left at full extent).
pub fn partition_bounds(cube: Bounds, id: u64, of: u64) -> BuildResult<Bounds> {
    let splits = splits_for(of).ok_or_else(|| BuildError::InvariantViolation {
        detail: format!("subset `of` must be a power of four greater than one, got {of}"),
    })?;
    if id == 0 || id > of {
        return Err(BuildError::InvariantViolation {
            detail: format!("subset id must be in 1..={of}, got {id}"),
        });
    }

    let mut bounds = cube;
    for i in 0..splits {
        let quadrant = (((id - 1) >> (i * 2)) & 0x3) as u8;
        bounds = step_xy(bounds, quadrant);
    }
    Ok(bounds)
}

fn step_xy(bounds: Bounds, quadrant: u8) -> Bounds {
    let mid = bounds.mid();
    let east = quadrant & 0b01 != 0;
    let north = quadrant & 0b10 != 0;
    let min = DVec3::new(
        if east { mid.x } else { bounds.min.x },
        if north { mid.y } else { bounds.min.y },
        bounds.min.z,
    );
    let max = DVec3::new(
        if east { bounds.max.x } else { mid.x },
        if north { bounds.max.y } else { mid.y },
        bounds.max.z,
    );
    Bounds { min, max }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cube() -> Bounds {
        Bounds::new(DVec3::splat(0.0), DVec3::splat(8.0))
    }

    #[test]
    fn four_subsets_partition_xy_into_quadrants_with_full_z() {
        let mut seen = Vec::new();
        for id in 1..=4 {
            let b = partition_bounds(cube(), id, 4).unwrap();
            assert_eq!(b.min.z, 0.0);
            assert_eq!(b.max.z, 8.0);
            assert_eq!(b.max.x - b.min.x, 4.0);
            assert_eq!(b.max.y - b.min.y, 4.0);
            seen.push(b);
        }
        // All four quadrants are distinct and together cover the root cube's XY extent.
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_ne!(seen[i], seen[j]);
            }
        }
    }

    #[test]
    fn sixteen_subsets_split_twice() {
        let b = partition_bounds(cube(), 1, 16).unwrap();
        assert_eq!(b.max.x - b.min.x, 2.0);
        assert_eq!(b.max.y - b.min.y, 2.0);
        assert_eq!(b.max.z - b.min.z, 8.0);
    }

    #[test]
    fn non_power_of_four_is_rejected() {
        assert!(partition_bounds(cube(), 1, 3).is_err());
        assert!(partition_bounds(cube(), 1, 8).is_err());
    }

    #[test]
    fn id_out_of_range_is_rejected() {
        assert!(partition_bounds(cube(), 0, 4).is_err());
        assert!(partition_bounds(cube(), 5, 4).is_err());
    }
}
