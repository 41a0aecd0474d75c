//! The plain octree node: payload arrays at leaves, subnode references at
//! interior nodes, both content-addressed.

use crate::attribute::{get_attribute, AttributeData, AttributeKind, AttributeKeys};
use crate::cell::Cell;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::lazy::LazyRef;
use crate::node::{
    get_node, ContextRef, NodeEnvelope, NodeRef, OctreeNode, PointDistance,
};
use crate::storage::ObjectWrite;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Plain octree node produced by build and merge.
///
/// Immutable. Subnodes and attribute payloads are faulted in lazily and can
/// be released with [`dispose`](OctreeNode::dispose) without invalidating
/// the node.
#[derive(Debug)]
pub struct PointsNode {
    ctx: ContextRef,
    id: ContentId,
    cell: Cell,
    bounding_box: Aabb,
    point_count_tree: u64,
    point_distance: Option<PointDistance>,
    attribute_keys: AttributeKeys,
    attributes: BTreeMap<AttributeKind, LazyRef<AttributeData>>,
    subnodes: [Option<LazyRef<dyn OctreeNode>>; 8],
}

impl PointsNode {
    /// Build, persist, and return a new node.
    ///
    /// `children` slots prefill the lazy subnode cache — freshly built
    /// children are already in memory and re-reading them would be wasted
    /// I/O. Checks the containment invariants before writing anything.
    pub async fn create(
        ctx: &ContextRef,
        cell: Cell,
        bounding_box: Aabb,
        point_count_tree: u64,
        point_distance: Option<PointDistance>,
        attribute_keys: AttributeKeys,
        children: [Option<NodeRef>; 8],
    ) -> Result<Arc<PointsNode>> {
        if !cell.aabb().contains(&bounding_box) {
            return Err(Error::invariant(format!(
                "bounding box {bounding_box:?} escapes cell {cell:?}"
            )));
        }
        for child in children.iter().flatten() {
            if !cell.contains(&child.cell()) {
                return Err(Error::invariant(format!(
                    "subnode cell {:?} not contained in {cell:?}",
                    child.cell()
                )));
            }
        }

        let sub_node_ids: [Option<ContentId>; 8] =
            std::array::from_fn(|i| children[i].as_ref().map(|c| *c.id()));
        let mut envelope = NodeEnvelope::Points {
            id: None,
            cell,
            bounding_box_exact_global: bounding_box,
            point_count_tree,
            attribute_keys: attribute_keys.clone(),
            sub_node_ids,
            point_distance,
        };
        let id = envelope.seal()?;
        ctx.store().write_bytes(&id, &envelope.encode()?).await?;

        let subnodes = std::array::from_fn(|i| {
            children[i]
                .as_ref()
                .map(|c| LazyRef::loaded(*c.id(), c.clone()))
        });
        Ok(Arc::new(Self {
            ctx: ctx.clone(),
            id,
            cell,
            bounding_box,
            point_count_tree,
            point_distance,
            attributes: Self::attribute_refs(&attribute_keys),
            attribute_keys,
            subnodes,
        }))
    }

    /// Rehydrate from a decoded envelope (verifies the content id).
    pub fn from_envelope(ctx: ContextRef, envelope: NodeEnvelope) -> Result<Arc<PointsNode>> {
        let id = envelope.verify_content_id()?;
        let NodeEnvelope::Points {
            cell,
            bounding_box_exact_global,
            point_count_tree,
            attribute_keys,
            sub_node_ids,
            point_distance,
            ..
        } = envelope
        else {
            return Err(Error::unsupported_format("expected a points envelope"));
        };
        let subnodes = std::array::from_fn(|i| sub_node_ids[i].map(LazyRef::new));
        Ok(Arc::new(Self {
            ctx,
            id,
            cell,
            bounding_box: bounding_box_exact_global,
            point_count_tree,
            point_distance,
            attributes: Self::attribute_refs(&attribute_keys),
            attribute_keys,
            subnodes,
        }))
    }

    fn attribute_refs(keys: &AttributeKeys) -> BTreeMap<AttributeKind, LazyRef<AttributeData>> {
        keys.iter().map(|(k, id)| (*k, LazyRef::new(*id))).collect()
    }
}

#[async_trait]
impl OctreeNode for PointsNode {
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

    fn point_distance(&self) -> Option<PointDistance> {
        self.point_distance
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

    async fn attribute(&self, kind: AttributeKind) -> Result<Option<Arc<AttributeData>>> {
        let Some(lazy) = self.attributes.get(&kind) else {
            return Ok(None);
        };
        let store = self.ctx.store().clone();
        let id = *lazy.id();
        lazy.get_or_load(|| async move { get_attribute(&*store, &id).await })
            .await
            .map(Some)
    }

    fn to_envelope(&self) -> NodeEnvelope {
        NodeEnvelope::Points {
            id: Some(self.id),
            cell: self.cell,
            bounding_box_exact_global: self.bounding_box,
            point_count_tree: self.point_count_tree,
            attribute_keys: self.attribute_keys.clone(),
            sub_node_ids: self.subnode_ids(),
            point_distance: self.point_distance,
        }
    }

    fn dispose(&self) {
        for lazy in self.attributes.values() {
            lazy.dispose();
        }
        for lazy in self.subnodes.iter().flatten() {
            lazy.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::ContentKind;
    use crate::node::NodeContext;
    use crate::storage::{ContentAddressedWrite, MemoryStore, StoreRef};
    use glam::DVec3;

    async fn leaf_with_positions(
        ctx: &ContextRef,
        cell: Cell,
        local: Vec<[f32; 3]>,
    ) -> Arc<PointsNode> {
        let center = cell.center();
        let global: Vec<DVec3> = local
            .iter()
            .map(|p| center + DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect();
        let bbox = Aabb::from_points(&global).unwrap();
        let count = local.len() as u64;
        let data = AttributeData::PositionsLocal(local);
        let attr_id = ctx
            .store()
            .put(ContentKind::Attribute, &data.encode().unwrap())
            .await
            .unwrap();
        let mut keys = AttributeKeys::new();
        keys.insert(AttributeKind::Positions, attr_id);
        PointsNode::create(ctx, cell, bbox, count, None, keys, Default::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_leaf_roundtrip_through_store() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctx = NodeContext::new(store);
        let cell = Cell::new(0, 0, 0, 3);
        let leaf = leaf_with_positions(
            &ctx,
            cell,
            vec![[-1.0, 0.0, 0.5], [1.0, 1.0, 1.0]],
        )
        .await;

        assert!(leaf.is_leaf());
        assert_eq!(leaf.point_count_tree(), 2);

        // Reload through the store by id and compare metadata.
        let loaded = get_node(&ctx, leaf.id()).await.unwrap();
        assert_eq!(loaded.id(), leaf.id());
        assert_eq!(loaded.cell(), cell);
        assert_eq!(loaded.point_count_tree(), 2);
        assert_eq!(
            loaded.bounding_box_exact_global(),
            leaf.bounding_box_exact_global()
        );
        assert!(loaded.has(AttributeKind::Positions));

        let positions = loaded.positions_global().await.unwrap();
        assert_eq!(positions.len(), 2);
        assert!((positions[0] - (cell.center() + DVec3::new(-1.0, 0.0, 0.5))).length() < 1e-6);
    }

    #[tokio::test]
    async fn test_interior_node_lazy_subnodes() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctx = NodeContext::new(store);
        let parent_cell = Cell::new(0, 0, 0, 3);
        let child = leaf_with_positions(&ctx, parent_cell.child(0), vec![[0.1, 0.1, 0.1]]).await;

        let mut children: [Option<NodeRef>; 8] = Default::default();
        children[0] = Some(child.clone() as NodeRef);
        let parent = PointsNode::create(
            &ctx,
            parent_cell,
            child.bounding_box_exact_global(),
            1,
            None,
            AttributeKeys::new(),
            children,
        )
        .await
        .unwrap();

        assert!(!parent.is_leaf());
        assert_eq!(parent.subnode_ids()[0], Some(*child.id()));

        // Reload and traverse: subnode faults in from the store.
        let reloaded = get_node(&ctx, parent.id()).await.unwrap();
        let sub = reloaded.subnode(0).await.unwrap().unwrap();
        assert_eq!(sub.id(), child.id());
        assert!(reloaded.subnode(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_escaping_bbox() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctx = NodeContext::new(store);
        let cell = Cell::new(0, 0, 0, 0); // [0,1)^3
        let result = PointsNode::create(
            &ctx,
            cell,
            Aabb::new(DVec3::ZERO, DVec3::splat(2.0)),
            1,
            None,
            AttributeKeys::new(),
            Default::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_dispose_releases_payload_cache() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctx = NodeContext::new(store);
        let leaf =
            leaf_with_positions(&ctx, Cell::new(0, 0, 0, 2), vec![[0.5, 0.5, 0.5]]).await;

        let loaded = get_node(&ctx, leaf.id()).await.unwrap();
        let _ = loaded.attribute(AttributeKind::Positions).await.unwrap();
        loaded.dispose();

        // Metadata survives and payload re-loads.
        assert_eq!(loaded.point_count_tree(), 1);
        let again = loaded.attribute(AttributeKind::Positions).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_tampered_envelope_rejected() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let ctx = NodeContext::new(store.clone());
        let leaf = leaf_with_positions(&ctx, Cell::new(0, 0, 0, 2), vec![[0.5, 0.5, 0.5]]).await;

        // Corrupt the stored envelope: bump the count but keep the id.
        let mut envelope = leaf.to_envelope();
        if let NodeEnvelope::Points {
            point_count_tree, ..
        } = &mut envelope
        {
            *point_count_tree += 1;
        }
        store
            .write_bytes(leaf.id(), &envelope.encode().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            get_node(&ctx, leaf.id()).await,
            Err(Error::InvariantViolation(_))
        ));
    }
}
