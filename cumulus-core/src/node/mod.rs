//! The octree node contract and its built-in kinds.
//!
//! A node is an immutable, content-addressed record: cell, exact bounding
//! box, subtree point count, an attribute-key table, and up to 8 lazy
//! subnode references. Every mutation — merging, filtering, adding LOD —
//! produces a *new* node under a new id; the old node and its blobs remain
//! valid and addressable. The store owns payload bytes; a node owns keys.
//!
//! ## Kinds
//!
//! The set of node kinds is closed at build time, dispatched behind the
//! [`OctreeNode`] trait:
//!
//! - [`PointsNode`] — a plain octree node produced by build/merge
//! - `FilteredNode` — lazy filter overlay (lives in `cumulus-filter`,
//!   plugged in through an [`EnvelopeDecoder`])
//! - [`MergedNodes`] — read-only view joining disjoint subtrees
//! - [`LinkedNode`] — reference into another store
//!
//! Decoding an envelope with an unknown kind is a fatal
//! `Error::UnsupportedFormat`, never a silent skip.

mod envelope;
mod linked;
mod merged;
mod points;

pub use envelope::NodeEnvelope;
pub use linked::LinkedNode;
pub use merged::MergedNodes;
pub use points::PointsNode;

use crate::attribute::{AttributeData, AttributeKind, AttributeKeys};
use crate::cell::Cell;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::resolver::{MapResolver, ResolverRef};
use crate::storage::StoreRef;
use async_trait::async_trait;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Tri-state classification of a node against a filter.
///
/// Plain nodes are always `FullyInside` (no filter applied); the `Partial`
/// state additionally carries a per-point active index set on the filtered
/// node that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterState {
    /// Every point of the node passes.
    #[default]
    FullyInside,
    /// No point of the node passes.
    FullyOutside,
    /// Some points pass; a point mask identifies which.
    Partial,
}

/// Per-cell point distance statistics (nearest-neighbor sampling).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDistance {
    /// Mean nearest-neighbor distance over the sampled points.
    pub average: f32,
    /// Standard deviation of the sampled distances.
    pub std_dev: f32,
}

/// Shared handle to any node kind.
pub type NodeRef = Arc<dyn OctreeNode>;

/// The octree node contract.
///
/// Metadata accessors are cheap and synchronous; payload and subnode
/// accessors fault data in from the store on first use and cache it until
/// [`dispose`](OctreeNode::dispose).
#[async_trait]
pub trait OctreeNode: Debug + Send + Sync {
    /// Opaque content key of this node.
    fn id(&self) -> &ContentId;

    /// The spatial cell this node indexes.
    fn cell(&self) -> Cell;

    /// Tight box of the actual points in this subtree (⊆ the cell's cube).
    fn bounding_box_exact_global(&self) -> Aabb;

    /// Total number of points in this subtree.
    fn point_count_tree(&self) -> u64;

    /// Optional per-cell point distance statistics.
    fn point_distance(&self) -> Option<PointDistance> {
        None
    }

    /// The attribute-key table of this node.
    fn attribute_keys(&self) -> &AttributeKeys;

    /// Whether the node carries an attribute of `kind`.
    fn has(&self, kind: AttributeKind) -> bool {
        self.attribute_keys().contains_key(&kind)
    }

    /// The store key of the attribute of `kind`, if present.
    fn attribute_key(&self, kind: AttributeKind) -> Option<&ContentId> {
        self.attribute_keys().get(&kind)
    }

    /// Ids of the up-to-8 subnodes; all `None` for a leaf.
    fn subnode_ids(&self) -> [Option<ContentId>; 8];

    /// Whether this node has no subnodes.
    fn is_leaf(&self) -> bool {
        self.subnode_ids().iter().all(Option::is_none)
    }

    /// Classification of this node against its filter; plain nodes default
    /// to `FullyInside`.
    fn filter_state(&self) -> FilterState {
        FilterState::FullyInside
    }

    /// Load the subnode in `octant`, or `None` when the slot is empty.
    async fn subnode(&self, octant: u8) -> Result<Option<NodeRef>>;

    /// Load the attribute payload of `kind`, or `None` when absent.
    ///
    /// Kinds with a view semantics (filtered nodes) return the payload with
    /// their point mask already applied.
    async fn attribute(&self, kind: AttributeKind) -> Result<Option<Arc<AttributeData>>>;

    /// Positions of this node's own points in global coordinates
    /// (`cell.center() + local`), or empty when the node stores none.
    async fn positions_global(&self) -> Result<Vec<DVec3>> {
        let Some(data) = self.attribute(AttributeKind::Positions).await? else {
            return Ok(Vec::new());
        };
        let center = self.cell().center();
        let local = crate::attribute::expect_positions(&data)?;
        Ok(local
            .iter()
            .map(|p| center + DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect())
    }

    /// The wire envelope of this node.
    fn to_envelope(&self) -> NodeEnvelope;

    /// Drop any cached in-memory payloads. Metadata stays valid; store data
    /// is untouched and later accesses re-load.
    fn dispose(&self);
}

// ============================================================================
// Node context
// ============================================================================

/// Decoder hook for node kinds defined outside this crate.
///
/// `cumulus-filter` registers one for `"filtered"` envelopes; the kind set
/// stays closed at build time — unknown kinds still fail decoding.
#[async_trait]
pub trait EnvelopeDecoder: Debug + Send + Sync {
    /// Decode `envelope` into a live node.
    async fn decode(&self, ctx: &ContextRef, envelope: serde_json::Value) -> Result<NodeRef>;
}

/// Everything a node needs to fault in its lazy parts: the owning store,
/// the resolver for cross-store links, and decoders for downstream kinds.
#[derive(Debug)]
pub struct NodeContext {
    store: StoreRef,
    resolver: ResolverRef,
    decoders: parking_lot::RwLock<HashMap<String, Arc<dyn EnvelopeDecoder>>>,
}

/// Shared handle to a [`NodeContext`].
pub type ContextRef = Arc<NodeContext>;

impl NodeContext {
    /// Context over `store` with an empty resolver.
    pub fn new(store: StoreRef) -> ContextRef {
        Self::with_resolver(store, Arc::new(MapResolver::new()))
    }

    /// Context over `store` resolving cross-store links via `resolver`.
    pub fn with_resolver(store: StoreRef, resolver: ResolverRef) -> ContextRef {
        Arc::new(Self {
            store,
            resolver,
            decoders: parking_lot::RwLock::new(HashMap::new()),
        })
    }

    /// The store this context reads and writes.
    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// The resolver for cross-store links.
    pub fn resolver(&self) -> &ResolverRef {
        &self.resolver
    }

    /// Register a decoder for an externally defined node kind.
    pub fn register_decoder(&self, kind: impl Into<String>, decoder: Arc<dyn EnvelopeDecoder>) {
        self.decoders.write().insert(kind.into(), decoder);
    }

    fn decoder(&self, kind: &str) -> Option<Arc<dyn EnvelopeDecoder>> {
        self.decoders.read().get(kind).cloned()
    }

    /// A context over a different store sharing this context's resolver and
    /// decoders. Used when following a link into another store.
    pub fn for_store(&self, store: StoreRef) -> ContextRef {
        Arc::new(Self {
            store,
            resolver: self.resolver.clone(),
            decoders: parking_lot::RwLock::new(self.decoders.read().clone()),
        })
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load and decode the node stored under `id`.
pub async fn get_node(ctx: &ContextRef, id: &ContentId) -> Result<NodeRef> {
    let bytes = ctx.store.read_bytes(id).await?;
    decode_node(ctx, &bytes).await
}

/// Decode a node envelope from raw bytes.
///
/// Built-in kinds decode directly; registered [`EnvelopeDecoder`]s handle
/// downstream kinds; anything else is `Error::UnsupportedFormat`.
pub async fn decode_node(ctx: &ContextRef, bytes: &[u8]) -> Result<NodeRef> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::unsupported_format("node envelope without kind tag"))?;
    match kind {
        "points" | "merged" | "linked" => {
            let envelope: NodeEnvelope = serde_json::from_value(value)?;
            node_from_envelope(ctx, envelope)
        }
        known => match ctx.decoder(known) {
            Some(decoder) => decoder.decode(ctx, value).await,
            None if known == "filtered" => Err(Error::unsupported_format(
                "filtered node envelope without a registered filter decoder",
            )),
            None => Err(Error::unsupported_format(format!(
                "unknown node kind: {known}"
            ))),
        },
    }
}

/// Construct a live node from a decoded built-in envelope.
pub fn node_from_envelope(ctx: &ContextRef, envelope: NodeEnvelope) -> Result<NodeRef> {
    match envelope {
        NodeEnvelope::Points { .. } => Ok(PointsNode::from_envelope(ctx.clone(), envelope)?),
        NodeEnvelope::Merged { .. } => Ok(MergedNodes::from_envelope(ctx.clone(), envelope)?),
        NodeEnvelope::Linked { .. } => Ok(LinkedNode::from_envelope(ctx.clone(), envelope)?),
        NodeEnvelope::Filtered { .. } => Err(Error::unsupported_format(
            "filtered node envelope without a registered filter decoder",
        )),
    }
}
