//! Attribute filters: intensity ranges, classification sets, normal cones.
//!
//! Attribute filters evaluate per-point attribute arrays. A node lacking
//! the attribute passes entirely — filtering scans by intensity must not
//! erase clouds that were captured without intensity.

use crate::error::Result;
use crate::filter::{pass_all, tag_json, Filter};
use crate::index_set::IndexSet;
use async_trait::async_trait;
use cumulus_core::{AttributeData, AttributeKind, OctreeNode};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Evaluate a typed attribute predicate over a node's (candidate) points.
///
/// Missing attribute ⇒ every candidate passes.
async fn filter_by_attribute<T, P>(
    node: &dyn OctreeNode,
    selected: Option<&IndexSet>,
    kind: AttributeKind,
    extract: fn(&AttributeData) -> Option<&[T]>,
    pred: P,
) -> Result<IndexSet>
where
    P: Fn(&T) -> bool,
{
    let Some(data) = node.attribute(kind).await? else {
        return pass_all(node, selected).await;
    };
    let Some(values) = extract(&data) else {
        return Err(cumulus_core::Error::unsupported_format(format!(
            "attribute {kind:?} holds a mismatched payload"
        ))
        .into());
    };
    Ok(match selected {
        Some(candidates) => candidates
            .iter()
            .filter(|&i| pred(&values[i as usize]))
            .collect(),
        None => values
            .iter()
            .enumerate()
            .filter(|(_, v)| pred(v))
            .map(|(i, _)| i as u32)
            .collect(),
    })
}

// ============================================================================
// Intensity
// ============================================================================

/// Points whose intensity lies in `[min, max)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterIntensity {
    /// Inclusive lower bound.
    pub min: i32,
    /// Exclusive upper bound.
    pub max: i32,
}

impl FilterIntensity {
    pub const TYPE: &'static str = "intensity";

    /// Filter selecting intensities in `[min, max)`.
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }
}

#[async_trait]
impl Filter for FilterIntensity {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        !node.has(AttributeKind::Intensities)
    }

    fn is_fully_outside(&self, _node: &dyn OctreeNode) -> bool {
        false
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_attribute(
            node,
            selected,
            AttributeKind::Intensities,
            |data| match data {
                AttributeData::Intensities(v) => Some(v.as_slice()),
                _ => None,
            },
            |v| *v >= self.min && *v < self.max,
        )
        .await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Points whose classification code is in a set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterClassification {
    /// Accepted classification codes.
    pub classes: BTreeSet<u8>,
}

impl FilterClassification {
    pub const TYPE: &'static str = "classification";

    /// Filter selecting the given classification codes.
    pub fn new(classes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Filter for FilterClassification {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        !node.has(AttributeKind::Classifications)
    }

    fn is_fully_outside(&self, _node: &dyn OctreeNode) -> bool {
        false
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        filter_by_attribute(
            node,
            selected,
            AttributeKind::Classifications,
            |data| match data {
                AttributeData::Classifications(v) => Some(v.as_slice()),
                _ => None,
            },
            |v| self.classes.contains(v),
        )
        .await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}

// ============================================================================
// Normal direction
// ============================================================================

/// Points whose normal lies within an angular cone around a direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterNormalDirection {
    /// Cone axis (normalized on evaluation).
    pub direction: DVec3,
    /// Half-angle of the cone in radians.
    pub epsilon: f64,
}

impl FilterNormalDirection {
    pub const TYPE: &'static str = "normalDirection";

    /// Filter selecting normals within `epsilon` radians of `direction`.
    pub fn new(direction: DVec3, epsilon: f64) -> Self {
        Self { direction, epsilon }
    }
}

#[async_trait]
impl Filter for FilterNormalDirection {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        !node.has(AttributeKind::Normals)
    }

    fn is_fully_outside(&self, _node: &dyn OctreeNode) -> bool {
        false
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        let axis = self.direction.normalize_or_zero();
        let min_dot = self.epsilon.cos();
        filter_by_attribute(
            node,
            selected,
            AttributeKind::Normals,
            |data| match data {
                AttributeData::Normals(v) => Some(v.as_slice()),
                _ => None,
            },
            move |n: &[f32; 3]| {
                let n = DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64).normalize_or_zero();
                n.dot(axis) >= min_dot
            },
        )
        .await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(Self::TYPE, serde_json::to_value(self).expect("serializable"))
    }
}
