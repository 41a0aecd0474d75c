//! Double-precision axis-aligned bounding boxes.
//!
//! Global point coordinates are `f64` (`glam::DVec3`); survey datasets sit
//! far from the origin, and `f32` loses millimetres at city scale. Cell-local
//! offsets are small enough for `f32` and are handled by the attribute
//! payloads, not here.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
///
/// `min` and `max` are both inclusive corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner (inclusive).
    pub min: DVec3,
    /// Maximum corner (inclusive).
    pub max: DVec3,
}

impl Aabb {
    /// Create a new box from min and max corners.
    ///
    /// Debug-asserts `min <= max` on all axes.
    pub fn new(min: DVec3, max: DVec3) -> Self {
        debug_assert!(
            min.x <= max.x && min.y <= max.y && min.z <= max.z,
            "Aabb min must be <= max on all axes"
        );
        Self { min, max }
    }

    /// The tight box of a non-empty point slice.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_points(points: &[DVec3]) -> Option<Self> {
        let mut iter = points.iter();
        let first = *iter.next()?;
        let mut b = Self {
            min: first,
            max: first,
        };
        for p in iter {
            b.extend(*p);
        }
        Some(b)
    }

    /// Grow the box to include `p`.
    pub fn extend(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether `p` lies inside the box (boundary inclusive).
    #[inline]
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Whether `other` lies entirely inside the box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Whether the two boxes share any point (boundaries count).
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Center of the box.
    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Edge lengths (`max - min`).
    #[inline]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }
}
