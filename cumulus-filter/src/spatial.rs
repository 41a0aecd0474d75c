//! Spatial filters: axis boxes, spheres, convex hulls, XY prisms.
//!
//! All spatial tests run on absolute positions (node cell center plus
//! stored local offset). Node-level tests use the exact global bounding
//! box and are conservative: `false` answers mean "unknown", never a
//! wrong "fully inside/outside".

use crate::error::Result;
use crate::filter::{filter_by_position, tag_json, Filter};
use crate::index_set::IndexSet;
use async_trait::async_trait;
use cumulus_core::{Aabb, OctreeNode};
use glam::DVec3;
use serde::{Deserialize, Serialize};

fn corners(b: &Aabb) -> [DVec3; 8] {
    std::array::from_fn(|i| {
        DVec3::new(
            if i & 1 == 0 { b.min.x } else { b.max.x },
            if i & 2 == 0 { b.min.y } else { b.max.y },
            if i & 4 == 0 { b.min.z } else { b.max.z },
        )
    })
}

// ============================================================================
// Axis boxes
// ============================================================================

/// Points inside an axis-aligned box (boundary inclusive).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInsideBox {
    /// The selecting box.
    pub bounds: Aabb,
}

impl FilterInsideBox {
    pub const TYPE: &'static str = "insideBox";

    /// Filter selecting points inside `bounds`.
    pub fn new(bounds: Aabb) -> Self {
        Self { bounds }
    }
}

#[async_trait]
impl Filter for FilterInsideBox {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        self.bounds.contains(&node.bounding_box_exact_global())
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        !self.bounds.overlaps(&node.bounding_box_exact_global())
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_position(node, selected, |p| self.bounds.contains_point(p)).await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

/// Points outside an axis-aligned box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOutsideBox {
    /// The excluding box.
    pub bounds: Aabb,
}

impl FilterOutsideBox {
    pub const TYPE: &'static str = "outsideBox";

    /// Filter selecting points outside `bounds`.
    pub fn new(bounds: Aabb) -> Self {
        Self { bounds }
    }
}

#[async_trait]
impl Filter for FilterOutsideBox {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        !self.bounds.overlaps(&node.bounding_box_exact_global())
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        self.bounds.contains(&node.bounding_box_exact_global())
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_position(node, selected, |p| !self.bounds.contains_point(p)).await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

// ============================================================================
// Sphere
// ============================================================================

/// Points inside a sphere (boundary inclusive).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInsideSphere {
    /// Sphere center.
    pub center: DVec3,
    /// Sphere radius.
    pub radius: f64,
}

impl FilterInsideSphere {
    pub const TYPE: &'static str = "insideSphere";

    /// Filter selecting points within `radius` of `center`.
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Distance from the center to the closest point of `b`.
    fn min_distance(&self, b: &Aabb) -> f64 {
        let clamped = self.center.clamp(b.min, b.max);
        (clamped - self.center).length()
    }

    /// Distance from the center to the farthest corner of `b`.
    fn max_distance(&self, b: &Aabb) -> f64 {
        let dx = (self.center.x - b.min.x).abs().max((self.center.x - b.max.x).abs());
        let dy = (self.center.y - b.min.y).abs().max((self.center.y - b.max.y).abs());
        let dz = (self.center.z - b.min.z).abs().max((self.center.z - b.max.z).abs());
        DVec3::new(dx, dy, dz).length()
    }
}

#[async_trait]
impl Filter for FilterInsideSphere {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        self.max_distance(&node.bounding_box_exact_global()) <= self.radius
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        self.min_distance(&node.bounding_box_exact_global()) > self.radius
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        let r2 = self.radius * self.radius;
        filter_by_position(node, selected, |p| {
            (p - self.center).length_squared() <= r2
        })
        .await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

// ============================================================================
// Convex hulls
// ============================================================================

/// Half-space `dot(normal, p) <= distance`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plane {
    /// Outward normal of the bounding plane.
    pub normal: DVec3,
    /// Plane offset along the normal.
    pub distance: f64,
}

impl Plane {
    /// Whether `p` lies in the half-space.
    pub fn contains(&self, p: DVec3) -> bool {
        self.normal.dot(p) <= self.distance
    }
}

/// Intersection of half-spaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hull {
    /// Bounding planes with outward normals.
    pub planes: Vec<Plane>,
}

impl Hull {
    /// Whether `p` lies inside all planes.
    pub fn contains(&self, p: DVec3) -> bool {
        self.planes.iter().all(|plane| plane.contains(p))
    }
}

/// Points inside the union of one or more convex hulls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInsideConvexHulls {
    /// The selecting hulls; a point passes if any hull contains it.
    pub hulls: Vec<Hull>,
}

impl FilterInsideConvexHulls {
    pub const TYPE: &'static str = "insideConvexHulls";

    /// Filter selecting points inside any of `hulls`.
    pub fn new(hulls: Vec<Hull>) -> Self {
        Self { hulls }
    }

    fn contains(&self, p: DVec3) -> bool {
        self.hulls.iter().any(|hull| hull.contains(p))
    }
}

#[async_trait]
impl Filter for FilterInsideConvexHulls {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        // Convexity: a hull containing all 8 corners contains the box.
        let corners = corners(&node.bounding_box_exact_global());
        self.hulls
            .iter()
            .any(|hull| corners.iter().all(|c| hull.contains(*c)))
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        // A single separating plane per hull proves the box outside it.
        let corners = corners(&node.bounding_box_exact_global());
        self.hulls.iter().all(|hull| {
            hull.planes
                .iter()
                .any(|plane| corners.iter().all(|c| !plane.contains(*c)))
        })
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_position(node, selected, |p| self.contains(p)).await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

// ============================================================================
// XY prism
// ============================================================================

/// Points whose XY projection lies inside a polygon and whose Z lies in a
/// range: the footprint selection of a site or building.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInsidePrismXY {
    /// Polygon vertices in XY, implicitly closed. Even-odd fill rule.
    pub shape: Vec<[f64; 2]>,
    /// Inclusive `[min, max]` range on Z.
    pub z_range: [f64; 2],
}

impl FilterInsidePrismXY {
    pub const TYPE: &'static str = "insidePrismXy";

    /// Filter selecting points over the polygon within the Z range.
    pub fn new(shape: Vec<[f64; 2]>, z_min: f64, z_max: f64) -> Self {
        Self {
            shape,
            z_range: [z_min, z_max],
        }
    }

    fn contains_xy(&self, x: f64, y: f64) -> bool {
        point_in_polygon(&self.shape, x, y)
    }

    fn contains(&self, p: DVec3) -> bool {
        p.z >= self.z_range[0] && p.z <= self.z_range[1] && self.contains_xy(p.x, p.y)
    }

    /// Whether any polygon edge touches the XY rectangle of `b`.
    ///
    /// When no edge does, the rectangle is homogeneous: entirely inside or
    /// entirely outside the polygon, decided by any one corner.
    fn edges_cross_rect(&self, b: &Aabb) -> bool {
        let n = self.shape.len();
        if n < 3 {
            return false;
        }
        let (x0, y0, x1, y1) = (b.min.x, b.min.y, b.max.x, b.max.y);
        let rect = [
            ([x0, y0], [x1, y0]),
            ([x1, y0], [x1, y1]),
            ([x1, y1], [x0, y1]),
            ([x0, y1], [x0, y0]),
        ];
        let mut j = n - 1;
        for i in 0..n {
            let (p, q) = (self.shape[j], self.shape[i]);
            j = i;
            let inside_rect = |v: [f64; 2]| v[0] >= x0 && v[0] <= x1 && v[1] >= y0 && v[1] <= y1;
            if inside_rect(p) || inside_rect(q) {
                return true;
            }
            if rect
                .iter()
                .any(|(a, b)| segments_intersect(p, q, *a, *b))
            {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Filter for FilterInsidePrismXY {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        let b = node.bounding_box_exact_global();
        if b.min.z < self.z_range[0] || b.max.z > self.z_range[1] {
            return false;
        }
        !self.edges_cross_rect(&b) && self.contains_xy(b.min.x, b.min.y)
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        let b = node.bounding_box_exact_global();
        if b.max.z < self.z_range[0] || b.min.z > self.z_range[1] {
            return true;
        }
        !self.edges_cross_rect(&b) && !self.contains_xy(b.min.x, b.min.y)
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_position(node, selected, |p| self.contains(p)).await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

/// Even-odd point-in-polygon test.
fn point_in_polygon(shape: &[[f64; 2]], x: f64, y: f64) -> bool {
    let n = shape.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (shape[i][0], shape[i][1]);
        let (xj, yj) = (shape[j][0], shape[j][1]);
        if (yi > y) != (yj > y) {
            let t = (y - yi) / (yj - yi);
            if x < xi + t * (xj - xi) {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Segment intersection via orientation tests (collinear overlaps count).
fn segments_intersect(p1: [f64; 2], p2: [f64; 2], q1: [f64; 2], q2: [f64; 2]) -> bool {
    fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
        (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
    }
    fn on_segment(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> bool {
        c[0] >= a[0].min(b[0]) && c[0] <= a[0].max(b[0]) && c[1] >= a[1].min(b[1]) && c[1] <= a[1].max(b[1])
    }
    let (o1, o2) = (orient(p1, p2, q1), orient(p1, p2, q2));
    let (o3, o4) = (orient(q1, q2, p1), orient(q1, q2, p2));
    if (o1 > 0.0) != (o2 > 0.0) && (o3 > 0.0) != (o4 > 0.0) && o1 != 0.0 && o2 != 0.0 && o3 != 0.0 && o4 != 0.0 {
        return true;
    }
    (o1 == 0.0 && on_segment(p1, p2, q1))
        || (o2 == 0.0 && on_segment(p1, p2, q2))
        || (o3 == 0.0 && on_segment(q1, q2, p1))
        || (o4 == 0.0 && on_segment(q1, q2, p2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_in_polygon_square() {
        let square = vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        assert!(point_in_polygon(&square, 2.0, 2.0));
        assert!(!point_in_polygon(&square, 5.0, 2.0));
        assert!(!point_in_polygon(&square, -0.1, 2.0));
    }

    #[test]
    fn test_point_in_polygon_concave() {
        // L-shape: the notch around (3, 3) is outside.
        let l_shape = vec![
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 2.0],
            [2.0, 2.0],
            [2.0, 4.0],
            [0.0, 4.0],
        ];
        assert!(point_in_polygon(&l_shape, 1.0, 1.0));
        assert!(point_in_polygon(&l_shape, 3.0, 1.0));
        assert!(point_in_polygon(&l_shape, 1.0, 3.0));
        assert!(!point_in_polygon(&l_shape, 3.0, 3.0));
    }

    #[test]
    fn test_segments_intersect() {
        assert!(segments_intersect(
            [0.0, 0.0],
            [4.0, 4.0],
            [0.0, 4.0],
            [4.0, 0.0]
        ));
        assert!(!segments_intersect(
            [0.0, 0.0],
            [1.0, 1.0],
            [2.0, 2.0],
            [3.0, 2.0]
        ));
        // Shared endpoint counts.
        assert!(segments_intersect(
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 0.0],
            [3.0, 5.0]
        ));
    }

    #[test]
    fn test_prism_json_roundtrip_is_complete() {
        let filter = FilterInsidePrismXY::new(
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 6.0], [0.0, 6.0]],
            -1.5,
            12.25,
        );
        let json = filter.to_json();
        assert_eq!(json["type"], "insidePrismXy");
        let back: FilterInsidePrismXY = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_sphere_distances() {
        let sphere = FilterInsideSphere::new(DVec3::ZERO, 5.0);
        let inside_box = Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0));
        let outside_box = Aabb::new(DVec3::splat(10.0), DVec3::splat(11.0));
        assert!(sphere.max_distance(&inside_box) <= 5.0);
        assert!(sphere.min_distance(&outside_box) > 5.0);
    }
}
