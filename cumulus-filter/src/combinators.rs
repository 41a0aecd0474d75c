//! Boolean combinators over filters.
//!
//! `And` and `Or` delegate the cheap node tests with short-circuit logic
//! and compose `filter_points` as set intersection and union. `And` feeds
//! its left result to the right operand as the candidate set, so the right
//! side never scans points the left already rejected.

use crate::error::Result;
use crate::filter::{filter_from_json, tag_json, Filter, FilterRef};
use crate::index_set::IndexSet;
use async_trait::async_trait;
use cumulus_core::OctreeNode;
use serde_json::json;

/// Both operands must pass a point.
#[derive(Clone, Debug)]
pub struct FilterAnd {
    /// Left operand.
    pub left: FilterRef,
    /// Right operand.
    pub right: FilterRef,
}

impl FilterAnd {
    pub const TYPE: &'static str = "and";

    /// Conjunction of two filters.
    pub fn new(left: FilterRef, right: FilterRef) -> Self {
        Self { left, right }
    }

    /// Parse from the `type`-tagged JSON form.
    pub fn from_json(value: &serde_json::Value) -> Result<FilterRef> {
        let (left, right) = operands(value)?;
        Ok(std::sync::Arc::new(Self { left, right }))
    }
}

#[async_trait]
impl Filter for FilterAnd {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        self.left.is_fully_inside(node) && self.right.is_fully_inside(node)
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        self.left.is_fully_outside(node) || self.right.is_fully_outside(node)
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        let left = self.left.filter_points(node, selected).await?;
        if left.is_empty() {
            return Ok(left);
        }
        self.right.filter_points(node, Some(&left)).await
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(
            Self::TYPE,
            json!({ "left": self.left.to_json(), "right": self.right.to_json() }),
        )
    }
}

/// Either operand may pass a point.
#[derive(Clone, Debug)]
pub struct FilterOr {
    /// Left operand.
    pub left: FilterRef,
    /// Right operand.
    pub right: FilterRef,
}

impl FilterOr {
    pub const TYPE: &'static str = "or";

    /// Disjunction of two filters.
    pub fn new(left: FilterRef, right: FilterRef) -> Self {
        Self { left, right }
    }

    /// Parse from the `type`-tagged JSON form.
    pub fn from_json(value: &serde_json::Value) -> Result<FilterRef> {
        let (left, right) = operands(value)?;
        Ok(std::sync::Arc::new(Self { left, right }))
    }
}

#[async_trait]
impl Filter for FilterOr {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn is_fully_inside(&self, node: &dyn OctreeNode) -> bool {
        self.left.is_fully_inside(node) || self.right.is_fully_inside(node)
    }

    fn is_fully_outside(&self, node: &dyn OctreeNode) -> bool {
        self.left.is_fully_outside(node) && self.right.is_fully_outside(node)
    }

    async fn filter_points(
        &self,
        node: &dyn OctreeNode,
        selected: Option<&IndexSet>,
    ) -> Result<IndexSet> {
        let left = self.left.filter_points(node, selected).await?;
        // Short-circuit: the left side already kept every candidate.
        let candidate_len = match selected {
            Some(candidates) => candidates.len(),
            None => node.positions_global().await?.len(),
        };
        if left.len() == candidate_len {
            return Ok(left);
        }
        let right = self.right.filter_points(node, selected).await?;
        Ok(left.union(&right))
    }

    fn to_json(&self) -> serde_json::Value {
        tag_json(
            Self::TYPE,
            json!({ "left": self.left.to_json(), "right": self.right.to_json() }),
        )
    }
}

fn operands(value: &serde_json::Value) -> Result<(FilterRef, FilterRef)> {
    let left = value
        .get("left")
        .ok_or_else(|| crate::error::FilterError::invalid("combinator without left operand"))?;
    let right = value
        .get("right")
        .ok_or_else(|| crate::error::FilterError::invalid("combinator without right operand"))?;
    Ok((filter_from_json(left)?, filter_from_json(right)?))
}
