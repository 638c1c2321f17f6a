//! The point/voxel data model (spec §3 "Point").
//!
//! Grounded on `feldspar-map/src/chunk.rs`'s `Chunk`, which stores fixed-size `Pod`
//! voxel payloads and moves them with `bytemuck::bytes_of`; here a voxel's attribute
//! payload is a variable-but-schema-fixed byte blob rather than a compile-time array,
//! since the schema (and therefore the attribute width) is only known at build time.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Describes the fixed-size attribute blob every point in a build carries, and whether
/// coordinates are stored as absolute `f64` or as `i32` scaled by a global
/// `(scale, offset)` triple (spec §3 "Point").
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Schema {
    pub attribute_bytes: usize,
    pub scale_offset: Option<ScaleOffset>,
}

impl Schema {
    pub fn absolute(attribute_bytes: usize) -> Self {
        Self {
            attribute_bytes,
            scale_offset: None,
        }
    }

    pub fn scaled(attribute_bytes: usize, scale_offset: ScaleOffset) -> Self {
        Self {
            attribute_bytes,
            scale_offset: Some(scale_offset),
        }
    }
}

/// Global scale/offset used to pack coordinates into `i32` for codecs (e.g. LAZ) that
/// mandate the scaled form.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleOffset {
    pub scale: DVec3,
    pub offset: DVec3,
}

impl ScaleOffset {
    pub fn to_scaled(&self, p: DVec3) -> glam::IVec3 {
        let v = (p - self.offset) / self.scale;
        glam::IVec3::new(v.x.round() as i32, v.y.round() as i32, v.z.round() as i32)
    }

    pub fn from_scaled(&self, p: glam::IVec3) -> DVec3 {
        DVec3::new(p.x as f64, p.y as f64, p.z as f64) * self.scale + self.offset
    }
}

/// One input point plus its opaque attribute bytes, as yielded by a point source.
#[derive(Clone, Debug, PartialEq)]
pub struct Voxel {
    pub point: DVec3,
    pub attributes: Box<[u8]>,
}

impl Voxel {
    pub fn new(point: DVec3, attributes: Box<[u8]>) -> Self {
        Self { point, attributes }
    }

    /// Lexicographic order on the full point, used to break center-distance ties (spec
    /// §3 invariant: "ties broken lexicographically on the full point").
    pub fn lex_key(&self) -> (u64, u64, u64) {
        (
            self.point.x.to_bits(),
            self.point.y.to_bits(),
            self.point.z.to_bits(),
        )
    }
}

/// Orders two contending voxels at the same grid slot by "closest to the cube center,
/// ties broken lexicographically on the full point" (spec §3 invariant).
///
/// Returns `true` if `candidate` should win over `incumbent`.
pub fn candidate_wins(mid: DVec3, candidate: &Voxel, incumbent: &Voxel) -> bool {
    let d_candidate = candidate.point.distance_squared(mid);
    let d_incumbent = incumbent.point.distance_squared(mid);
    if d_candidate != d_incumbent {
        d_candidate < d_incumbent
    } else {
        candidate.lex_key() < incumbent.lex_key()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equidistant_points_break_tie_lexicographically() {
        let mid = DVec3::splat(4.0);
        let a = Voxel::new(DVec3::new(2.0, 2.0, 2.0), Box::new([]));
        let b = Voxel::new(DVec3::new(6.0, 6.0, 6.0), Box::new([]));
        // Both are sqrt(12) from mid; a is lexicographically smaller.
        assert!(candidate_wins(mid, &a, &b));
        assert!(!candidate_wins(mid, &b, &a));
    }

    #[test]
    fn closer_point_wins_regardless_of_lex_order() {
        let mid = DVec3::splat(4.0);
        let near = Voxel::new(DVec3::new(4.5, 4.0, 4.0), Box::new([]));
        let far = Voxel::new(DVec3::new(0.0, 0.0, 0.0), Box::new([]));
        assert!(candidate_wins(mid, &near, &far));
    }

    #[test]
    fn scale_offset_round_trips_to_nearest_unit() {
        let so = ScaleOffset {
            scale: DVec3::splat(0.01),
            offset: DVec3::splat(0.0),
        };
        let p = DVec3::new(12.34, -5.6, 0.01);
        let scaled = so.to_scaled(p);
        let back = so.from_scaled(scaled);
        assert!((back - p).length() < 0.01);
    }
}
