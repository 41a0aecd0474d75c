//! The node wire envelope.
//!
//! Envelopes are JSON values with a closed `kind` tag. Common fields:
//! `id`, `cell`, `boundingBoxExactGlobal`, `pointCountTree`,
//! `attributeKeys`; each kind adds its own references. `parse(serialize(n))`
//! reconstructs a node with identical id, cell, count, and child references
//! given the same backing store and resolver.
//!
//! For content-hashed kinds (`points`, `merged`, `linked`) the id is the
//! SHA-256 of the envelope *without* its `id` field — the stored blob embeds
//! the id it is stored under, so the hash must exclude it. Filtered nodes
//! carry derived ids instead (a pure function of base id, filter, and
//! octant) and skip this rule.

use crate::attribute::AttributeKeys;
use crate::cell::Cell;
use crate::content_id::{ContentId, ContentKind};
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::node::PointDistance;
use serde::{Deserialize, Serialize};

fn attrs_empty(a: &AttributeKeys) -> bool {
    a.is_empty()
}

/// Wire form of a node. Closed kind set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeEnvelope {
    /// Plain octree node produced by build or merge.
    #[serde(rename_all = "camelCase")]
    Points {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<ContentId>,
        cell: Cell,
        bounding_box_exact_global: Aabb,
        point_count_tree: u64,
        #[serde(default, skip_serializing_if = "attrs_empty")]
        attribute_keys: AttributeKeys,
        sub_node_ids: [Option<ContentId>; 8],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        point_distance: Option<PointDistance>,
    },

    /// Read-only view joining disjoint subtrees under a common cell.
    #[serde(rename_all = "camelCase")]
    Merged {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<ContentId>,
        cell: Cell,
        bounding_box_exact_global: Aabb,
        point_count_tree: u64,
        #[serde(default, skip_serializing_if = "attrs_empty")]
        attribute_keys: AttributeKeys,
        sub_node_ids: [Option<ContentId>; 8],
    },

    /// Reference to a point cloud in another store.
    #[serde(rename_all = "camelCase")]
    Linked {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<ContentId>,
        cell: Cell,
        bounding_box_exact_global: Aabb,
        point_count_tree: u64,
        #[serde(default, skip_serializing_if = "attrs_empty")]
        attribute_keys: AttributeKeys,
        linked_store_name: String,
        linked_point_cloud_key: String,
    },

    /// Filter overlay over a base node. Constructed and decoded by
    /// `cumulus-filter`; the shape lives here so every kind has one wire
    /// form.
    #[serde(rename_all = "camelCase")]
    Filtered {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<ContentId>,
        cell: Cell,
        bounding_box_exact_global: Aabb,
        point_count_tree: u64,
        #[serde(default, skip_serializing_if = "attrs_empty")]
        attribute_keys: AttributeKeys,
        base_node_id: ContentId,
        filter: serde_json::Value,
    },
}

impl NodeEnvelope {
    /// The embedded id, if sealed.
    pub fn id(&self) -> Option<&ContentId> {
        match self {
            NodeEnvelope::Points { id, .. }
            | NodeEnvelope::Merged { id, .. }
            | NodeEnvelope::Linked { id, .. }
            | NodeEnvelope::Filtered { id, .. } => id.as_ref(),
        }
    }

    fn id_mut(&mut self) -> &mut Option<ContentId> {
        match self {
            NodeEnvelope::Points { id, .. }
            | NodeEnvelope::Merged { id, .. }
            | NodeEnvelope::Linked { id, .. }
            | NodeEnvelope::Filtered { id, .. } => id,
        }
    }

    /// The content id of this envelope: SHA-256 of the id-less JSON form.
    pub fn content_id(&self) -> Result<ContentId> {
        let mut identity = self.clone();
        *identity.id_mut() = None;
        Ok(ContentId::new(
            ContentKind::Node,
            &serde_json::to_vec(&identity)?,
        ))
    }

    /// Compute and embed the content id, returning it.
    pub fn seal(&mut self) -> Result<ContentId> {
        let id = self.content_id()?;
        *self.id_mut() = Some(id);
        Ok(id)
    }

    /// Embed an externally derived id (filtered nodes).
    pub fn seal_with(&mut self, id: ContentId) {
        *self.id_mut() = Some(id);
    }

    /// Check that the embedded id matches the id-less content hash.
    ///
    /// A mismatch means the blob was stored under a key it does not hash to
    /// — a fatal content-addressing violation. Only meaningful for the
    /// content-hashed kinds; filtered envelopes carry derived ids.
    pub fn verify_content_id(&self) -> Result<ContentId> {
        let claimed = *self
            .id()
            .ok_or_else(|| Error::unsupported_format("node envelope without id"))?;
        let actual = self.content_id()?;
        if claimed != actual {
            return Err(Error::invariant(format!(
                "envelope id {claimed} does not match content hash {actual}"
            )));
        }
        Ok(claimed)
    }

    /// Serialize to the wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse wire bytes, failing with `UnsupportedFormat` on unknown kinds.
    pub fn decode(bytes: &[u8]) -> Result<NodeEnvelope> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::unsupported_format("node envelope without kind tag"))?;
        match kind {
            "points" | "merged" | "linked" | "filtered" => Ok(serde_json::from_value(value)?),
            other => Err(Error::unsupported_format(format!(
                "unknown node kind: {other}"
            ))),
        }
    }
}
