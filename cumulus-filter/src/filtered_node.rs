//! The filter-view overlay.
//!
//! A `FilteredNode` wraps a base node and a filter without copying or
//! mutating the base tree. Construction classifies the node with the cheap
//! tests; a `Partial` node eagerly computes its active point mask with one
//! `filter_points` call, and every payload accessor applies that cached
//! mask lazily on read. Subnodes wrap recursively on access.
//!
//! Ids are pure functions of `(parent id, filter JSON, octant)` — wrapping
//! the same base with the same filter always yields the same ids, so
//! derived views deduplicate naturally in caches and stores.

use crate::error::{FilterError, Result};
use crate::filter::{filter_from_json, Filter, FilterRef};
use crate::index_set::IndexSet;
use async_trait::async_trait;
use cumulus_core::{
    get_node, Aabb, AttributeData, AttributeKeys, AttributeKind, Cell, ContentId, ContentKind,
    ContextRef, EnvelopeDecoder, FilterState, NodeEnvelope, NodeRef, ObjectWrite, OctreeNode,
    PointDistance,
};
use glam::DVec3;
use std::sync::Arc;

/// Lazy filtered view over a base node.
#[derive(Debug)]
pub struct FilteredNode {
    ctx: ContextRef,
    id: ContentId,
    base: NodeRef,
    filter: FilterRef,
    state: FilterState,
    /// Active point indices; present exactly when `state` is `Partial`.
    mask: Option<IndexSet>,
    bounding_box: Aabb,
    point_count: u64,
}

impl FilteredNode {
    /// Wrap `base` with `filter`, classifying it and (when partial)
    /// computing the point mask eagerly.
    pub async fn new(
        ctx: &ContextRef,
        base: NodeRef,
        filter: FilterRef,
    ) -> Result<Arc<FilteredNode>> {
        let id = derive_root_id(base.id(), &*filter)?;
        Self::wrap(ctx.clone(), base, filter, id).await
    }

    pub(crate) async fn wrap(
        ctx: ContextRef,
        base: NodeRef,
        filter: FilterRef,
        id: ContentId,
    ) -> Result<Arc<FilteredNode>> {
        let state = if filter.is_fully_inside(&*base) {
            FilterState::FullyInside
        } else if filter.is_fully_outside(&*base) {
            FilterState::FullyOutside
        } else {
            FilterState::Partial
        };

        let mask = match state {
            FilterState::Partial => Some(filter.filter_points(&*base, None).await?),
            _ => None,
        };

        let point_count = match (&state, &mask) {
            (FilterState::FullyInside, _) => base.point_count_tree(),
            (FilterState::FullyOutside, _) => 0,
            // Leaves count exactly; a partial interior's subtree count is
            // unknown without traversal, so the base count stands as an
            // upper bound.
            (FilterState::Partial, Some(mask)) if base.is_leaf() => mask.len() as u64,
            (FilterState::Partial, _) => base.point_count_tree(),
        };

        let bounding_box = match (&state, &mask) {
            (FilterState::Partial, Some(mask)) if base.is_leaf() && !mask.is_empty() => {
                let positions = base.positions_global().await?;
                let active: Vec<DVec3> =
                    mask.iter().map(|i| positions[i as usize]).collect();
                Aabb::from_points(&active).expect("mask is non-empty")
            }
            _ => base.bounding_box_exact_global(),
        };

        Ok(Arc::new(Self {
            ctx,
            id,
            base,
            filter,
            state,
            mask,
            bounding_box,
            point_count,
        }))
    }

    /// The wrapped base node.
    pub fn base(&self) -> &NodeRef {
        &self.base
    }

    /// The filter this view applies.
    pub fn filter(&self) -> &FilterRef {
        &self.filter
    }

    /// The cached active point mask (present exactly when partial).
    pub fn mask(&self) -> Option<&IndexSet> {
        self.mask.as_ref()
    }

    /// Persist this view's envelope under its derived id.
    pub async fn persist(&self) -> Result<()> {
        let envelope = self.to_envelope();
        self.ctx
            .store()
            .write_bytes(&self.id, &envelope.encode()?)
            .await?;
        Ok(())
    }
}

fn filter_json_bytes(filter: &dyn Filter) -> Result<Vec<u8>> {
    // serde_json maps are sorted, so this form is deterministic.
    Ok(serde_json::to_vec(&filter.to_json())?)
}

fn derive_root_id(base: &ContentId, filter: &dyn Filter) -> Result<ContentId> {
    let filter_json = filter_json_bytes(filter)?;
    Ok(ContentId::derive(
        ContentKind::Node,
        [
            b"filtered".as_slice(),
            base.to_string().as_bytes(),
            filter_json.as_slice(),
        ],
    ))
}

fn derive_child_id(parent: &ContentId, filter_json: &[u8], octant: u8) -> ContentId {
    ContentId::derive(
        ContentKind::Node,
        [
            b"filtered-child".as_slice(),
            parent.to_string().as_bytes(),
            filter_json,
            std::slice::from_ref(&octant),
        ],
    )
}

#[async_trait]
impl OctreeNode for FilteredNode {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn cell(&self) -> Cell {
        self.base.cell()
    }

    fn bounding_box_exact_global(&self) -> Aabb {
        self.bounding_box
    }

    /// For partial interior nodes this is the base subtree count, an upper
    /// bound; leaves and fully classified nodes count exactly.
    fn point_count_tree(&self) -> u64 {
        self.point_count
    }

    fn point_distance(&self) -> Option<PointDistance> {
        // Distance statistics describe the unmasked payload.
        match self.state {
            FilterState::FullyInside => self.base.point_distance(),
            _ => None,
        }
    }

    fn attribute_keys(&self) -> &AttributeKeys {
        self.base.attribute_keys()
    }

    fn subnode_ids(&self) -> [Option<ContentId>; 8] {
        let filter_json = filter_json_bytes(&*self.filter).unwrap_or_default();
        let base_ids = self.base.subnode_ids();
        std::array::from_fn(|i| {
            base_ids[i].map(|_| derive_child_id(&self.id, &filter_json, i as u8))
        })
    }

    fn filter_state(&self) -> FilterState {
        self.state
    }

    async fn subnode(&self, octant: u8) -> cumulus_core::Result<Option<NodeRef>> {
        let Some(sub) = self.base.subnode(octant).await? else {
            return Ok(None);
        };
        let filter_json = filter_json_bytes(&*self.filter).map_err(FilterError::into_core)?;
        let id = derive_child_id(&self.id, &filter_json, octant);
        let wrapped = Self::wrap(self.ctx.clone(), sub, self.filter.clone(), id)
            .await
            .map_err(FilterError::into_core)?;
        Ok(Some(wrapped as NodeRef))
    }

    async fn attribute(
        &self,
        kind: AttributeKind,
    ) -> cumulus_core::Result<Option<Arc<AttributeData>>> {
        // LOD payloads have their own indexing; a mask over the node's own
        // points does not apply to them.
        if kind.is_lod() && self.state != FilterState::FullyInside {
            return Ok(None);
        }
        let Some(data) = self.base.attribute(kind).await? else {
            return Ok(None);
        };
        Ok(Some(match (&self.state, &self.mask) {
            (FilterState::FullyInside, _) => data,
            (FilterState::FullyOutside, _) => Arc::new(data.select(&[])),
            (FilterState::Partial, Some(mask)) => Arc::new(data.select(mask.as_slice())),
            (FilterState::Partial, None) => data,
        }))
    }

    fn to_envelope(&self) -> NodeEnvelope {
        NodeEnvelope::Filtered {
            id: Some(self.id),
            cell: self.base.cell(),
            bounding_box_exact_global: self.bounding_box,
            point_count_tree: self.point_count,
            attribute_keys: self.base.attribute_keys().clone(),
            base_node_id: *self.base.id(),
            filter: self.filter.to_json(),
        }
    }

    fn dispose(&self) {
        self.base.dispose();
    }
}

// ============================================================================
// Envelope decoding
// ============================================================================

/// Decoder hook for `"filtered"` envelopes.
///
/// Re-resolves the base node from the same store, reconstructs the filter
/// from its JSON form, and recomputes the view's classification and mask
/// (both are pure functions of base and filter).
#[derive(Debug)]
pub struct FilteredNodeDecoder;

#[async_trait]
impl EnvelopeDecoder for FilteredNodeDecoder {
    async fn decode(
        &self,
        ctx: &ContextRef,
        envelope: serde_json::Value,
    ) -> cumulus_core::Result<NodeRef> {
        let envelope: NodeEnvelope = serde_json::from_value(envelope)?;
        let NodeEnvelope::Filtered {
            id,
            base_node_id,
            filter,
            ..
        } = envelope
        else {
            return Err(cumulus_core::Error::unsupported_format(
                "expected a filtered envelope",
            ));
        };
        let id = id.ok_or_else(|| {
            cumulus_core::Error::unsupported_format("filtered envelope without id")
        })?;
        let base = get_node(ctx, &base_node_id).await?;
        let filter = filter_from_json(&filter).map_err(FilterError::into_core)?;
        let node = FilteredNode::wrap(ctx.clone(), base, filter, id)
            .await
            .map_err(FilterError::into_core)?;
        Ok(node as NodeRef)
    }
}

/// Register the filtered-node decoder on a context, enabling
/// `get_node` to resolve `"filtered"` envelopes.
pub fn register_filtered_decoder(ctx: &ContextRef) {
    ctx.register_decoder("filtered", Arc::new(FilteredNodeDecoder));
}
