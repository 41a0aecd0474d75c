//! Power-of-two grid cells: the spatial key of an octree node.
//!
//! A cell is an integer grid coordinate `(x, y, z)` plus an `exponent` e,
//! naming the axis-aligned cube `[x·2^e, (x+1)·2^e) × [y·2^e, …) × [z·2^e, …)`.
//! Cubes at exponent e-1 tile their parent exactly, so cells form an infinite
//! octree over all of space without ever storing the tree itself.
//!
//! A cube anchored at a lattice point can never straddle the origin, so a
//! dataset spanning the origin has no finite enclosing cell. The **centered**
//! variant covers this: it spans `[-2^(e-1), +2^(e-1))^3` and is used only
//! for a root cell enclosing the whole dataset.

use crate::geometry::Aabb;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete power-of-two spatial index: grid coordinate plus exponent.
///
/// Pure value type with deterministic equality; no mutation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Grid x coordinate (0 when centered).
    pub x: i64,
    /// Grid y coordinate (0 when centered).
    pub y: i64,
    /// Grid z coordinate (0 when centered).
    pub z: i64,
    /// Power-of-two exponent: the cube edge is `2^exponent`.
    pub exponent: i32,
    /// Centered-at-origin variant spanning `[-2^(e-1), +2^(e-1))^3`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub centered: bool,
}

impl Cell {
    /// Cell at grid coordinate `(x, y, z)` with edge length `2^exponent`.
    pub fn new(x: i64, y: i64, z: i64, exponent: i32) -> Self {
        Self {
            x,
            y,
            z,
            exponent,
            centered: false,
        }
    }

    /// Centered root cell spanning `[-2^(e-1), +2^(e-1))^3`.
    pub fn centered(exponent: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            exponent,
            centered: true,
        }
    }

    /// Smallest cell whose cube contains `bounds`.
    ///
    /// Falls back to the centered variant when the box straddles the origin
    /// on any axis, since no lattice-anchored cube can contain it.
    pub fn from_aabb(bounds: &Aabb) -> Self {
        let straddles = |lo: f64, hi: f64| lo < 0.0 && hi > 0.0;
        if straddles(bounds.min.x, bounds.max.x)
            || straddles(bounds.min.y, bounds.max.y)
            || straddles(bounds.min.z, bounds.max.z)
        {
            // Smallest e with max |coordinate| <= 2^(e-1).
            let r = bounds
                .min
                .abs()
                .max(bounds.max.abs())
                .max_element()
                .max(f64::MIN_POSITIVE);
            let mut e = r.log2().ceil() as i32 + 1;
            while (e - 1) < 1024 && f64::exp2((e - 1) as f64) < r {
                e += 1;
            }
            return Self::centered(e);
        }

        // Start from the smallest exponent whose cube edge covers the largest
        // extent, then walk up until the box falls into a single grid cube.
        // Degenerate (point) boxes start at the precision of their coordinates
        // instead, which also keeps the integer grid coordinates in i64 range.
        let extent = bounds.size().max_element();
        let max_abs = bounds.min.abs().max(bounds.max.abs()).max_element();
        let mut e = if extent > 0.0 {
            extent.log2().ceil() as i32
        } else {
            -52
        };
        if max_abs > 0.0 {
            e = e.max(max_abs.log2().floor() as i32 - 52);
        }
        loop {
            let scale = f64::exp2(e as f64);
            let x = (bounds.min.x / scale).floor();
            let y = (bounds.min.y / scale).floor();
            let z = (bounds.min.z / scale).floor();
            if bounds.max.x <= (x + 1.0) * scale
                && bounds.max.y <= (y + 1.0) * scale
                && bounds.max.z <= (z + 1.0) * scale
            {
                return Self::new(x as i64, y as i64, z as i64, e);
            }
            e += 1;
        }
    }

    /// World-space cube of this cell.
    pub fn aabb(&self) -> Aabb {
        if self.centered {
            let h = f64::exp2((self.exponent - 1) as f64);
            Aabb::new(DVec3::splat(-h), DVec3::splat(h))
        } else {
            let s = f64::exp2(self.exponent as f64);
            let min = DVec3::new(self.x as f64, self.y as f64, self.z as f64) * s;
            Aabb::new(min, min + DVec3::splat(s))
        }
    }

    /// World-space center of the cube. The centered variant is centered at
    /// the origin by construction.
    pub fn center(&self) -> DVec3 {
        if self.centered {
            DVec3::ZERO
        } else {
            let s = f64::exp2(self.exponent as f64);
            DVec3::new(
                (self.x as f64 + 0.5) * s,
                (self.y as f64 + 0.5) * s,
                (self.z as f64 + 0.5) * s,
            )
        }
    }

    /// The 8 child cells at exponent e-1, exactly tiling this cell.
    ///
    /// Octant index: bit 0 = +x half, bit 1 = +y half, bit 2 = +z half.
    pub fn children(&self) -> [Cell; 8] {
        std::array::from_fn(|i| self.child(i as u8))
    }

    /// Child cell for a 3-bit octant index.
    pub fn child(&self, octant: u8) -> Cell {
        debug_assert!(octant < 8, "octant index out of range");
        let dx = (octant & 1) as i64;
        let dy = ((octant >> 1) & 1) as i64;
        let dz = ((octant >> 2) & 1) as i64;
        if self.centered {
            // Octant cells around the origin: coordinate -1 or 0 per axis.
            Cell::new(dx - 1, dy - 1, dz - 1, self.exponent - 1)
        } else {
            Cell::new(
                2 * self.x + dx,
                2 * self.y + dy,
                2 * self.z + dz,
                self.exponent - 1,
            )
        }
    }

    /// 3-bit octant of a world-space point, by three independent axis
    /// comparisons against the cell center (x lowest bit).
    pub fn octant_of_point(&self, p: DVec3) -> u8 {
        let c = self.center();
        (u8::from(p.x >= c.x)) | (u8::from(p.y >= c.y) << 1) | (u8::from(p.z >= c.z) << 2)
    }

    /// The cell at exponent e+1 whose cube contains this one.
    ///
    /// A centered cell's parent is the centered cell one exponent up.
    pub fn parent(&self) -> Cell {
        if self.centered {
            Cell::centered(self.exponent + 1)
        } else {
            // Arithmetic shift = floor division, correct for negatives.
            Cell::new(self.x >> 1, self.y >> 1, self.z >> 1, self.exponent + 1)
        }
    }

    /// Whether `other`'s cube lies fully inside this cell's cube under grid
    /// semantics.
    pub fn contains(&self, other: &Cell) -> bool {
        if self == other {
            return true;
        }
        if other.exponent > self.exponent {
            return false;
        }
        if other.centered {
            // A centered cell straddles the origin; only a larger centered
            // cell can contain it.
            return self.centered && other.exponent <= self.exponent;
        }
        if self.centered {
            // other at exponent eo spans [xo·2^eo, (xo+1)·2^eo); self spans
            // [-2^(e-1), +2^(e-1)). Compare in units of 2^eo using i128.
            let shift = (self.exponent - 1 - other.exponent).min(126) as u32;
            let half = 1i128 << shift;
            let lo = |c: i64| c as i128;
            let hi = |c: i64| c as i128 + 1;
            return lo(other.x) >= -half
                && hi(other.x) <= half
                && lo(other.y) >= -half
                && hi(other.y) <= half
                && lo(other.z) >= -half
                && hi(other.z) <= half;
        }
        // Both lattice-anchored: shifting the finer coordinate down must land
        // on this cell's coordinate (arithmetic shift = floor division).
        let d = (self.exponent - other.exponent).min(63) as u32;
        other.x >> d == self.x && other.y >> d == self.y && other.z >> d == self.z
    }
}

/// Smallest cell whose cube contains both `a` and `b`.
///
/// Cells in different orthants have no common lattice-anchored ancestor
/// (ancestors of non-negative coordinates stay non-negative, ancestors of
/// negative coordinates stay negative), so those pairs get a centered root.
pub fn common_cell(a: &Cell, b: &Cell) -> Cell {
    if a.contains(b) {
        return *a;
    }
    if b.contains(a) {
        return *b;
    }

    let centered_over = |a: &Cell, b: &Cell| {
        let bounds = a.aabb().union(&b.aabb());
        let r = bounds
            .min
            .abs()
            .max(bounds.max.abs())
            .max_element()
            .max(f64::MIN_POSITIVE);
        let mut e = r.log2().ceil() as i32 + 1;
        while f64::exp2((e - 1) as f64) < r {
            e += 1;
        }
        Cell::centered(e)
    };

    if a.centered || b.centered {
        return centered_over(a, b);
    }
    let opposite = |x: i64, y: i64| (x < 0) != (y < 0);
    if opposite(a.x, b.x) || opposite(a.y, b.y) || opposite(a.z, b.z) {
        return centered_over(a, b);
    }

    let mut a = *a;
    let mut b = *b;
    while a.exponent < b.exponent {
        a = a.parent();
    }
    while b.exponent < a.exponent {
        b = b.parent();
    }
    while a != b {
        a = a.parent();
        b = b.parent();
    }
    a
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.centered {
            write!(f, "Cell[centered, 2^{}]", self.exponent)
        } else {
            write!(
                f,
                "Cell[{}, {}, {}, 2^{}]",
                self.x, self.y, self.z, self.exponent
            )
        }
    }
}
