//! Cross-store references.
//!
//! A `LinkedNode` lives in one store but denotes the root of a point cloud
//! in *another* store, found by resolving a logical store name and reading
//! that store's root manifest. Metadata (cell, bounds, count, attribute
//! table) is copied at link time so consumers can plan traversals without
//! touching the remote store; payload and subnode access resolve the target
//! lazily and delegate.

use crate::attribute::{AttributeData, AttributeKind, AttributeKeys};
use crate::cell::Cell;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::manifest::RootManifest;
use crate::node::{get_node, ContextRef, NodeEnvelope, NodeRef, OctreeNode};
use crate::resolver::StoreResolver;
use crate::storage::ObjectWrite;
use async_trait::async_trait;
use std::sync::Arc;

/// Node kind referencing a point cloud in another store.
#[derive(Debug)]
pub struct LinkedNode {
    ctx: ContextRef,
    id: ContentId,
    cell: Cell,
    bounding_box: Aabb,
    point_count_tree: u64,
    attribute_keys: AttributeKeys,
    linked_store_name: String,
    linked_point_cloud_key: String,
    target: tokio::sync::Mutex<Option<NodeRef>>,
}

impl LinkedNode {
    /// Create a link to the point cloud stored under `point_cloud_key` in
    /// the store named `store_name`, persist its envelope locally, and
    /// return it.
    ///
    /// Fails when the name does not resolve, the manifest is missing, or
    /// the target cloud is empty (there is no root to link).
    pub async fn link(
        ctx: &ContextRef,
        store_name: impl Into<String>,
        point_cloud_key: impl Into<String>,
    ) -> Result<Arc<LinkedNode>> {
        let linked_store_name = store_name.into();
        let linked_point_cloud_key = point_cloud_key.into();

        let target = Self::resolve_target(ctx, &linked_store_name, &linked_point_cloud_key).await?;

        let mut envelope = NodeEnvelope::Linked {
            id: None,
            cell: target.cell(),
            bounding_box_exact_global: target.bounding_box_exact_global(),
            point_count_tree: target.point_count_tree(),
            attribute_keys: target.attribute_keys().clone(),
            linked_store_name: linked_store_name.clone(),
            linked_point_cloud_key: linked_point_cloud_key.clone(),
        };
        let id = envelope.seal()?;
        ctx.store().write_bytes(&id, &envelope.encode()?).await?;

        Ok(Arc::new(Self {
            ctx: ctx.clone(),
            id,
            cell: target.cell(),
            bounding_box: target.bounding_box_exact_global(),
            point_count_tree: target.point_count_tree(),
            attribute_keys: target.attribute_keys().clone(),
            linked_store_name,
            linked_point_cloud_key,
            target: tokio::sync::Mutex::new(Some(target)),
        }))
    }

    /// Rehydrate from a decoded envelope (verifies the content id). The
    /// target is not resolved until first payload or subnode access.
    pub fn from_envelope(ctx: ContextRef, envelope: NodeEnvelope) -> Result<Arc<LinkedNode>> {
        let id = envelope.verify_content_id()?;
        let NodeEnvelope::Linked {
            cell,
            bounding_box_exact_global,
            point_count_tree,
            attribute_keys,
            linked_store_name,
            linked_point_cloud_key,
            ..
        } = envelope
        else {
            return Err(Error::unsupported_format("expected a linked envelope"));
        };
        Ok(Arc::new(Self {
            ctx,
            id,
            cell,
            bounding_box: bounding_box_exact_global,
            point_count_tree,
            attribute_keys,
            linked_store_name,
            linked_point_cloud_key,
            target: tokio::sync::Mutex::new(None),
        }))
    }

    /// The logical name of the store this link points into.
    pub fn linked_store_name(&self) -> &str {
        &self.linked_store_name
    }

    /// The manifest key of the linked point cloud.
    pub fn linked_point_cloud_key(&self) -> &str {
        &self.linked_point_cloud_key
    }

    async fn resolve_target(ctx: &ContextRef, store_name: &str, key: &str) -> Result<NodeRef> {
        tracing::debug!(store_name, key, "resolving linked point cloud");
        let remote_store = ctx.resolver().resolve(store_name)?;
        let manifest = RootManifest::read(&*remote_store, key).await?;
        let root_id = *manifest.root_id().ok_or_else(|| {
            Error::not_found(format!(
                "linked point cloud '{key}' in store '{store_name}' is empty"
            ))
        })?;
        let remote_ctx = ctx.for_store(remote_store);
        get_node(&remote_ctx, &root_id).await
    }

    /// The linked root, resolved on first use (compute-once).
    async fn target(&self) -> Result<NodeRef> {
        let mut slot = self.target.lock().await;
        if let Some(node) = slot.as_ref() {
            return Ok(node.clone());
        }
        let node = Self::resolve_target(
            &self.ctx,
            &self.linked_store_name,
            &self.linked_point_cloud_key,
        )
        .await?;
        *slot = Some(node.clone());
        Ok(node)
    }
}

#[async_trait]
impl OctreeNode for LinkedNode {
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
        // Subnode ids live in the remote store; without resolving the
        // target the slots are unknown. Resolved targets answer through
        // `subnode`.
        match self.target.try_lock().ok().and_then(|t| t.clone()) {
            Some(target) => target.subnode_ids(),
            None => Default::default(),
        }
    }

    fn is_leaf(&self) -> bool {
        false
    }

    async fn subnode(&self, octant: u8) -> Result<Option<NodeRef>> {
        self.target().await?.subnode(octant).await
    }

    async fn attribute(&self, kind: AttributeKind) -> Result<Option<Arc<AttributeData>>> {
        self.target().await?.attribute(kind).await
    }

    fn to_envelope(&self) -> NodeEnvelope {
        NodeEnvelope::Linked {
            id: Some(self.id),
            cell: self.cell,
            bounding_box_exact_global: self.bounding_box,
            point_count_tree: self.point_count_tree,
            attribute_keys: self.attribute_keys.clone(),
            linked_store_name: self.linked_store_name.clone(),
            linked_point_cloud_key: self.linked_point_cloud_key.clone(),
        }
    }

    fn dispose(&self) {
        if let Ok(mut slot) = self.target.try_lock() {
            if let Some(target) = slot.as_ref() {
                target.dispose();
            }
            *slot = None;
        }
    }
}
