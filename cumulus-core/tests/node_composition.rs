//! Composition wrappers: joining disjoint subtrees and linking across
//! stores.

use cumulus_core::{
    get_node, Aabb, AttributeData, AttributeKeys, AttributeKind, Cell, ContentAddressedWrite,
    ContentKind, ContextRef, Error, LinkedNode, MapResolver, MemoryStore, MergedNodes,
    NodeContext, NodeRef, OctreeNode, PointsNode, RootManifest, StoreRef,
};
use glam::DVec3;
use std::sync::Arc;

async fn leaf_at(ctx: &ContextRef, cell: Cell, local: Vec<[f32; 3]>) -> NodeRef {
    let center = cell.center();
    let global: Vec<DVec3> = local
        .iter()
        .map(|p| center + DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
        .collect();
    let bounds = Aabb::from_points(&global).unwrap();
    let count = local.len() as u64;
    let data = AttributeData::PositionsLocal(local);
    let attr_id = ctx
        .store()
        .put(ContentKind::Attribute, &data.encode().unwrap())
        .await
        .unwrap();
    let mut keys = AttributeKeys::new();
    keys.insert(AttributeKind::Positions, attr_id);
    PointsNode::create(ctx, cell, bounds, count, None, keys, Default::default())
        .await
        .unwrap() as NodeRef
}

#[tokio::test]
async fn merged_nodes_joins_disjoint_subtrees() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let ctx = NodeContext::new(store);

    let a = leaf_at(&ctx, Cell::new(0, 0, 0, 1), vec![[0.1, 0.1, 0.1], [0.5, 0.2, 0.3]]).await;
    let b = leaf_at(&ctx, Cell::new(3, 0, 0, 1), vec![[0.4, 0.4, 0.4]]).await;

    let joined = MergedNodes::join(&ctx, vec![a.clone(), b.clone()]).await.unwrap();
    assert_eq!(joined.point_count_tree(), 3);
    assert!(joined.cell().contains(&a.cell()));
    assert!(joined.cell().contains(&b.cell()));
    assert!(joined
        .bounding_box_exact_global()
        .contains(&a.bounding_box_exact_global()));

    // Both inputs are reachable, unchanged, through the subnode slots.
    let mut found = Vec::new();
    for octant in 0..8 {
        if let Some(sub) = joined.subnode(octant).await.unwrap() {
            found.push(*sub.id());
        }
    }
    assert!(found.contains(a.id()));
    assert!(found.contains(b.id()));

    // The view reloads from the store by id.
    let reloaded = get_node(&ctx, joined.id()).await.unwrap();
    assert_eq!(reloaded.point_count_tree(), 3);
    assert_eq!(reloaded.subnode_ids(), joined.subnode_ids());
}

#[tokio::test]
async fn merged_nodes_rejects_colliding_inputs() {
    let store: StoreRef = Arc::new(MemoryStore::new());
    let ctx = NodeContext::new(store);

    // Same cell: not disjoint, and a caller error by contract.
    let a = leaf_at(&ctx, Cell::new(0, 0, 0, 1), vec![[0.1, 0.1, 0.1]]).await;
    let b = leaf_at(&ctx, Cell::new(0, 0, 0, 1), vec![[0.2, 0.2, 0.2]]).await;
    let result = MergedNodes::join(&ctx, vec![a, b]).await;
    assert!(matches!(result, Err(Error::InvariantViolation(_))));
}

#[tokio::test]
async fn linked_node_delegates_to_remote_store() {
    // Remote store holds the actual point cloud plus its manifest.
    let remote: StoreRef = Arc::new(MemoryStore::new());
    let remote_ctx = NodeContext::new(remote.clone());
    let root = leaf_at(
        &remote_ctx,
        Cell::new(2, 2, 2, 2),
        vec![[0.5, 0.5, 0.5], [-0.5, -0.5, -0.5]],
    )
    .await;
    RootManifest::Root {
        root_id: *root.id(),
        point_count: root.point_count_tree(),
    }
    .write(&*remote, "scan-42")
    .await
    .unwrap();

    // Local store resolves "archive" to the remote.
    let local: StoreRef = Arc::new(MemoryStore::new());
    let resolver = Arc::new(MapResolver::new().with("archive", remote));
    let ctx = NodeContext::with_resolver(local, resolver);

    let linked = LinkedNode::link(&ctx, "archive", "scan-42").await.unwrap();
    assert_eq!(linked.cell(), root.cell());
    assert_eq!(linked.point_count_tree(), 2);
    assert_eq!(
        linked.bounding_box_exact_global(),
        root.bounding_box_exact_global()
    );
    assert!(linked.has(AttributeKind::Positions));

    // Payload access goes through to the remote store.
    let positions = linked.positions_global().await.unwrap();
    assert_eq!(positions.len(), 2);

    // The link envelope reloads from the local store and still resolves.
    let reloaded = get_node(&ctx, linked.id()).await.unwrap();
    assert_eq!(reloaded.point_count_tree(), 2);
    let positions = reloaded.positions_global().await.unwrap();
    assert_eq!(positions.len(), 2);

    // Disposing drops the cached target; metadata stays valid.
    reloaded.dispose();
    assert_eq!(reloaded.cell(), root.cell());
}

#[tokio::test]
async fn linking_an_empty_cloud_fails() {
    let remote: StoreRef = Arc::new(MemoryStore::new());
    RootManifest::Empty.write(&*remote, "empty").await.unwrap();

    let local: StoreRef = Arc::new(MemoryStore::new());
    let resolver = Arc::new(MapResolver::new().with("archive", remote));
    let ctx = NodeContext::with_resolver(local, resolver);

    assert!(matches!(
        LinkedNode::link(&ctx, "archive", "empty").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        LinkedNode::link(&ctx, "unknown", "empty").await,
        Err(Error::NotFound(_))
    ));
}
