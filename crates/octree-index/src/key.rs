//! Bit-packed octant keys and the cube-subdivision bounds they index into.
//!
//! Grounded on `examples/original_source/entwine/types/key.hpp`'s `Xyz`/`Dxyz`/`Key`
//! triad: a `Key` packs `(depth, x, y, z)` and descends by shifting each coordinate left
//! and OR-ing in a direction bit, while a separate `Bounds` value tracks the matching
//! cube without needing to be recomputed from the key. Reimplemented with `glam::DVec3`
//! bounds math (the teacher crate re-exports `glam` for exactly this purpose) and an
//! explicit `Direction` newtype in place of the original's raw `Dir` enum.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the eight octants a cube subdivides into, as a 3-bit mask.
///
/// Bit 0 selects `+x` (east), bit 1 selects `+y` (north), bit 2 selects `+z` (up). The
/// exact bit assignment only needs to be internally consistent; `step`/`direction_of`
/// and `Bounds::step` agree on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Direction(pub u8);

impl Direction {
    pub const EAST_BIT: u8 = 0b001;
    pub const NORTH_BIT: u8 = 0b010;
    pub const UP_BIT: u8 = 0b100;

    #[inline]
    pub fn new(bits: u8) -> Self {
        debug_assert!(bits < 8);
        Self(bits)
    }

    #[inline]
    pub fn east(self) -> bool {
        self.0 & Self::EAST_BIT != 0
    }

    #[inline]
    pub fn north(self) -> bool {
        self.0 & Self::NORTH_BIT != 0
    }

    #[inline]
    pub fn up(self) -> bool {
        self.0 & Self::UP_BIT != 0
    }

    /// All eight directions in their fixed `0..8` order.
    pub fn all() -> [Direction; 8] {
        [
            Direction(0),
            Direction(1),
            Direction(2),
            Direction(3),
            Direction(4),
            Direction(5),
            Direction(6),
            Direction(7),
        ]
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An axis-aligned cube (or box, before it has been made cube-extended) in absolute
/// point-source coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn mid(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x < self.max.x
            && p.y < self.max.y
            && p.z < self.max.z
    }

    /// Grows `self` to the smallest cube centered on its midpoint that still contains it.
    pub fn cube_extend(&self) -> Self {
        let size = self.max - self.min;
        let radius = size.max_element() / 2.0;
        let mid = self.mid();
        Self {
            min: mid - DVec3::splat(radius),
            max: mid + DVec3::splat(radius),
        }
    }

    /// Halves the cube toward octant `dir`, returning the child bounds.
    pub fn step(&self, dir: Direction) -> Self {
        let mid = self.mid();
        let min = DVec3::new(
            if dir.east() { mid.x } else { self.min.x },
            if dir.north() { mid.y } else { self.min.y },
            if dir.up() { mid.z } else { self.min.z },
        );
        let max = DVec3::new(
            if dir.east() { self.max.x } else { mid.x },
            if dir.north() { self.max.y } else { mid.y },
            if dir.up() { self.max.z } else { mid.z },
        );
        Self { min, max }
    }
}

/// The direction a point falls from the midpoint of `bounds`.
///
/// Points exactly on the midpoint go to the higher octant on that axis (strict `<` on
/// the low side), matching spec boundary-behavior: "a point exactly on a cube boundary
/// is assigned to the higher (east/north/up) octant."
#[inline]
pub fn direction_of(mid: DVec3, p: DVec3) -> Direction {
    let mut bits = 0u8;
    if p.x >= mid.x {
        bits |= Direction::EAST_BIT;
    }
    if p.y >= mid.y {
        bits |= Direction::NORTH_BIT;
    }
    if p.z >= mid.z {
        bits |= Direction::UP_BIT;
    }
    Direction::new(bits)
}

/// A bit-packed octant key `(d, x, y, z)`, `0 <= x, y, z < 2^d`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub depth: u8,
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl Key {
    pub fn root() -> Self {
        Self {
            depth: 0,
            x: 0,
            y: 0,
            z: 0,
        }
    }

    /// Appends `dir` to this key: shift each coordinate left and OR in its bit.
    #[inline]
    pub fn step(self, dir: Direction) -> Self {
        Self {
            depth: self.depth + 1,
            x: (self.x << 1) | (dir.east() as u64),
            y: (self.y << 1) | (dir.north() as u64),
            z: (self.z << 1) | (dir.up() as u64),
        }
    }

    /// The child key reached by stepping toward octant `dir` from this key's bounds.
    pub fn child(self, dir: Direction) -> Self {
        self.step(dir)
    }

    /// Steps `self`/`bounds` together toward whichever octant `point` falls in,
    /// returning the direction taken and the new (child) bounds.
    pub fn step_toward(self, point: DVec3, bounds: Bounds) -> (Self, Direction, Bounds) {
        let dir = direction_of(bounds.mid(), point);
        (self.step(dir), dir, bounds.step(dir))
    }

    /// Recomputes the cube bounds for this key by descending from `root_bounds`.
    pub fn descend_to(self, root_bounds: Bounds) -> Bounds {
        let mut bounds = root_bounds;
        for d in (0..self.depth).rev() {
            let bit = 1u64 << d;
            let dir = Direction::new(
                (((self.x & bit != 0) as u8) * Direction::EAST_BIT)
                    | (((self.y & bit != 0) as u8) * Direction::NORTH_BIT)
                    | (((self.z & bit != 0) as u8) * Direction::UP_BIT),
            );
            bounds = bounds.step(dir);
        }
        bounds
    }

    /// Canonical `"d-x-y-z"` form used for chunk/hierarchy file names.
    pub fn to_file_string(&self) -> String {
        format!("{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }

    /// Canonical `"x-y-z"` form, used within a single depth (e.g. the Clipper's slow
    /// tier, which is already partitioned by depth).
    pub fn to_xyz_string(&self) -> String {
        format!("{}-{}-{}", self.x, self.y, self.z)
    }

    pub fn from_file_string(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let depth: u8 = parts.next()?.parse().ok()?;
        let x: u64 = parts.next()?.parse().ok()?;
        let y: u64 = parts.next()?.parse().ok()?;
        let z: u64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { depth, x, y, z })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_file_string())
    }
}
