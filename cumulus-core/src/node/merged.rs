//! Read-only view joining disjoint subtrees under one root.
//!
//! `MergedNodes` does not move or rewrite any point data: it computes the
//! smallest common cell of its inputs, assigns each input to the child slot
//! whose cell contains it, and persists only the joining envelope. Joining
//! inputs whose cells are not pairwise disjoint is a caller error.

use crate::attribute::{AttributeData, AttributeKind, AttributeKeys};
use crate::cell::{common_cell, Cell};
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::lazy::LazyRef;
use crate::node::{get_node, ContextRef, NodeEnvelope, NodeRef, OctreeNode};
use crate::storage::ObjectWrite;
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only composition of disjoint subtrees.
///
/// Slot cells may sit deeper than one level below the joint cell; traversal
/// follows each subnode's own cell, not an assumed exponent.
#[derive(Debug)]
pub struct MergedNodes {
    ctx: ContextRef,
    id: ContentId,
    cell: Cell,
    bounding_box: Aabb,
    point_count_tree: u64,
    attribute_keys: AttributeKeys,
    subnodes: [Option<LazyRef<dyn OctreeNode>>; 8],
}

impl MergedNodes {
    /// Join `inputs` under their smallest common cell, persist the joining
    /// envelope, and return the view.
    ///
    /// Fails with `InvariantViolation` when two inputs land in the same
    /// octant (their cells are not disjoint) or an input straddles the
    /// joint cell's center.
    pub async fn join(ctx: &ContextRef, inputs: Vec<NodeRef>) -> Result<Arc<MergedNodes>> {
        if inputs.len() < 2 {
            return Err(Error::invariant(
                "MergedNodes requires at least two input subtrees",
            ));
        }

        let cell = inputs
            .iter()
            .skip(1)
            .fold(inputs[0].cell(), |acc, n| common_cell(&acc, &n.cell()));
        let octants = cell.children();

        let mut slots: [Option<NodeRef>; 8] = Default::default();
        let mut bounding_box: Option<Aabb> = None;
        let mut point_count_tree = 0u64;
        for input in inputs {
            let input_cell = input.cell();
            let octant = octants
                .iter()
                .position(|c| c.contains(&input_cell))
                .ok_or_else(|| {
                    Error::invariant(format!(
                        "input cell {input_cell:?} straddles the joint cell {cell:?}"
                    ))
                })?;
            if let Some(occupant) = &slots[octant] {
                return Err(Error::invariant(format!(
                    "inputs {:?} and {:?} are not disjoint: both land in octant {octant} of {cell:?}",
                    occupant.cell(),
                    input_cell
                )));
            }
            let b = input.bounding_box_exact_global();
            bounding_box = Some(match bounding_box {
                Some(acc) => acc.union(&b),
                None => b,
            });
            point_count_tree += input.point_count_tree();
            slots[octant] = Some(input);
        }
        let bounding_box = bounding_box.expect("at least two inputs");

        let sub_node_ids: [Option<ContentId>; 8] =
            std::array::from_fn(|i| slots[i].as_ref().map(|n| *n.id()));
        let mut envelope = NodeEnvelope::Merged {
            id: None,
            cell,
            bounding_box_exact_global: bounding_box,
            point_count_tree,
            attribute_keys: AttributeKeys::new(),
            sub_node_ids,
        };
        let id = envelope.seal()?;
        ctx.store().write_bytes(&id, &envelope.encode()?).await?;

        let subnodes = std::array::from_fn(|i| {
            slots[i]
                .as_ref()
                .map(|n| LazyRef::loaded(*n.id(), n.clone()))
        });
        Ok(Arc::new(Self {
            ctx: ctx.clone(),
            id,
            cell,
            bounding_box,
            point_count_tree,
            attribute_keys: AttributeKeys::new(),
            subnodes,
        }))
    }

    /// Rehydrate from a decoded envelope (verifies the content id).
    pub fn from_envelope(ctx: ContextRef, envelope: NodeEnvelope) -> Result<Arc<MergedNodes>> {
        let id = envelope.verify_content_id()?;
        let NodeEnvelope::Merged {
            cell,
            bounding_box_exact_global,
            point_count_tree,
            attribute_keys,
            sub_node_ids,
            ..
        } = envelope
        else {
            return Err(Error::unsupported_format("expected a merged envelope"));
        };
        let subnodes = std::array::from_fn(|i| sub_node_ids[i].map(LazyRef::new));
        Ok(Arc::new(Self {
            ctx,
            id,
            cell,
            bounding_box: bounding_box_exact_global,
            point_count_tree,
            attribute_keys,
            subnodes,
        }))
    }
}

#[async_trait]
impl OctreeNode for MergedNodes {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn cell(&self) -> Cell {
        self.cell
    }

    fn bounding_box_exact_global(&self) -> Aabb {
        self.bounding_box
    }

    fn point_count_tree(&self) -> u64 {
        self.point_count_tree
    }

    fn attribute_keys(&self) -> &AttributeKeys {
        &self.attribute_keys
    }

    fn subnode_ids(&self) -> [Option<ContentId>; 8] {
        std::array::from_fn(|i| self.subnodes[i].as_ref().map(|r| *r.id()))
    }

    async fn subnode(&self, octant: u8) -> Result<Option<NodeRef>> {
        let Some(lazy) = &self.subnodes[octant as usize] else {
            return Ok(None);
        };
        let ctx = self.ctx.clone();
        let id = *lazy.id();
        lazy.get_or_load(|| async move { get_node(&ctx, &id).await })
            .await
            .map(Some)
    }

    async fn attribute(&self, _kind: AttributeKind) -> Result<Option<Arc<AttributeData>>> {
        // The view stores no payload of its own; points live in the joined
        // subtrees.
        Ok(None)
    }

    fn to_envelope(&self) -> NodeEnvelope {
        NodeEnvelope::Merged {
            id: Some(self.id),
            cell: self.cell,
            bounding_box_exact_global: self.bounding_box,
            point_count_tree: self.point_count_tree,
            attribute_keys: self.attribute_keys.clone(),
            sub_node_ids: self.subnode_ids(),
        }
    }

    fn dispose(&self) {
        for lazy in self.subnodes.iter().flatten() {
            lazy.dispose();
        }
    }
}
