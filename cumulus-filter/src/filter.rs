//! The filter contract and the JSON registry.
//!
//! A filter classifies octree nodes cheaply (`is_fully_inside` /
//! `is_fully_outside`, bounding-volume and attribute-range tests only —
//! never false positives) and points exactly (`filter_points`). Filters
//! serialize to `type`-tagged JSON for persistence; equality is defined on
//! the serialized form. The type set is closed: deserializing an unknown
//! tag fails loudly.

use crate::error::{FilterError, Result};
use crate::index_set::IndexSet;
use async_trait::async_trait;
use cumulus_core::OctreeNode;
use glam::DVec3;
use std::fmt::Debug;
use std::sync::Arc;

/// Predicate over nodes and points.
#[async_trait]
pub trait Filter: Debug + Send + Sync {
    /// The stable `type` tag of this filter in JSON form.
    fn type_tag(&self) -> &'static str;

    /// Cheap test: does every point of `node` pass? Never a false positive;
    /// `false` means "unknown", not "outside".
    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool;

    /// Cheap test: does no point of `node` pass? Never a false positive.
    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool;

    /// Exact per-point test over `node`'s own points.
    ///
    /// With `selected`, only those candidate indices are evaluated — this
    /// is how combinators compose without re-scanning. Without, all points
    /// are evaluated.
    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet>;

    /// Serialize to the `type`-tagged JSON value.
    fn to_json(&self) -> serde_json::Value;
}

/// Shared handle to a filter.
pub type FilterRef = Arc<dyn Filter>;

/// Filter equality: defined on the serialized form.
pub fn filters_equal(a: &dyn Filter, b: &dyn Filter) -> bool {
    a.to_json() == b.to_json()
}

/// Reconstruct a filter from its `type`-tagged JSON value.
///
/// Unknown tags are a fatal [`FilterError::UnsupportedFilter`].
pub fn filter_from_json(value: &serde_json::Value) -> Result<FilterRef> {
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| FilterError::invalid("filter value without type tag"))?;

    fn parse<T: serde::de::DeserializeOwned + Filter + 'static>(
        value: &serde_json::Value,
    ) -> Result<FilterRef> {
        let filter: T = serde_json::from_value(value.clone())?;
        Ok(Arc::new(filter))
    }

    use crate::attribute::{FilterClassification, FilterIntensity, FilterNormalDirection};
    use crate::combinators::{FilterAnd, FilterOr};
    use crate::spatial::{
        FilterInsideBox, FilterInsideConvexHulls, FilterInsidePrismXY, FilterInsideSphere,
        FilterOutsideBox,
    };

    match tag {
        FilterInsideBox::TYPE => parse::<FilterInsideBox>(value),
        FilterOutsideBox::TYPE => parse::<FilterOutsideBox>(value),
        FilterInsideSphere::TYPE => parse::<FilterInsideSphere>(value),
        FilterInsideConvexHulls::TYPE => parse::<FilterInsideConvexHulls>(value),
        FilterInsidePrismXY::TYPE => parse::<FilterInsidePrismXY>(value),
        FilterIntensity::TYPE => parse::<FilterIntensity>(value),
        FilterClassification::TYPE => parse::<FilterClassification>(value),
        FilterNormalDirection::TYPE => parse::<FilterNormalDirection>(value),
        FilterAnd::TYPE => FilterAnd::from_json(value),
        FilterOr::TYPE => FilterOr::from_json(value),
        other => Err(FilterError::unsupported(format!(
            "unknown filter type: {other}"
        ))),
    }
}

/// Attach the `type` tag to a filter's serialized fields.
pub(crate) fn tag_json(tag: &str, fields: serde_json::Value) -> serde_json::Value {
    let mut value = fields;
    value["type"] = serde_json::Value::String(tag.to_string());
    value
}

/// Evaluate a position predicate over a node's (candidate) points.
pub(crate) async fn filter_by_position(
    node: &dyn OctreeNode,
    selected: Option<&IndexSet>,
    pred: impl Fn(DVec3) -> bool,
) -> Result<IndexSet> {
    let positions = node.positions_global().await?;
    Ok(match selected {
        Some(candidates) => candidates
            .iter()
            .filter(|&i| pred(positions[i as usize]))
            .collect(),
        None => positions
            .iter()
            .enumerate()
            .filter(|(_, p)| pred(**p))
            .map(|(i, _)| i as u32)
            .collect(),
    })
}

/// The candidate set itself: everything passes.
///
/// Used by attribute filters when the node lacks the attribute.
pub(crate) async fn pass_all(
    node: &dyn OctreeNode,
    selected: Option<&IndexSet>,
) -> Result<IndexSet> {
    Ok(match selected {
        Some(candidates) => candidates.clone(),
        None => IndexSet::full(node.positions_global().await?.len() as u32),
    })
}
