//! End-to-end import pipeline tests against an in-memory store.

use cumulus_core::{
    get_node, ContextRef, MemoryStore, NodeContext, NodeRef, OctreeNode, RootManifest, StoreRef,
};
use cumulus_import::{import, CancelToken, Chunk, ImportConfig, ImportError};
use futures::future::BoxFuture;
use glam::DVec3;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn test_ctx() -> ContextRef {
    let store: StoreRef = Arc::new(MemoryStore::new());
    NodeContext::new(store)
}

/// Deterministic pseudo-uniform points in `[0,1)^3`, offset by `origin`.
fn uniform_points(seed: u64, n: usize, origin: DVec3) -> Vec<DVec3> {
    let mut state = seed.wrapping_mul(0x2545f4914f6cdd1d) | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n)
        .map(|_| origin + DVec3::new(next(), next(), next()))
        .collect()
}

fn collect_positions(node: NodeRef) -> BoxFuture<'static, Vec<DVec3>> {
    Box::pin(async move {
        let mut out = node.positions_global().await.unwrap();
        for octant in 0..8 {
            if let Some(sub) = node.subnode(octant).await.unwrap() {
                out.extend(collect_positions(sub).await);
            }
        }
        out
    })
}

/// Multiset equality up to the f32 round-trip of cell-local storage.
fn assert_same_multiset(actual: Vec<DVec3>, expected: &[DVec3]) {
    assert_eq!(actual.len(), expected.len());
    let mut actual = actual;
    for e in expected {
        let i = actual
            .iter()
            .position(|a| (*a - *e).length() < 1e-5)
            .unwrap_or_else(|| panic!("point {e:?} missing from result"));
        actual.swap_remove(i);
    }
}

fn assert_leaf_limits(node: NodeRef, limit: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if node.is_leaf() {
            assert!(
                node.point_count_tree() <= limit,
                "leaf holds {} points, limit {limit}",
                node.point_count_tree()
            );
            return;
        }
        let mut sum = 0;
        for octant in 0..8 {
            if let Some(sub) = node.subnode(octant).await.unwrap() {
                sum += sub.point_count_tree();
                assert_leaf_limits(sub, limit).await;
            }
        }
        assert_eq!(sum, node.point_count_tree());
    })
}

#[tokio::test]
async fn import_stream_builds_one_tree_with_manifest() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ctx = test_ctx();
    let clouds: Vec<Vec<DVec3>> = vec![
        uniform_points(1, 400, DVec3::ZERO),
        uniform_points(2, 300, DVec3::new(4.0, 0.0, 0.0)),
        uniform_points(3, 350, DVec3::new(0.0, 4.0, 0.0)),
        uniform_points(4, 250, DVec3::new(4.0, 4.0, 4.0)),
        Vec::new(), // empty chunk: dropped, not an error
    ];
    let mut expected: Vec<DVec3> = Vec::new();
    for cloud in &clouds {
        expected.extend(cloud.iter().copied());
    }
    let stream = futures::stream::iter(clouds.into_iter().map(Chunk::from_positions));

    let last_progress = Arc::new(AtomicU64::new(0));
    let progress_watch = last_progress.clone();
    let config = ImportConfig::default()
        .with_split_limit(128)
        .with_max_parallelism(4)
        .with_point_distance(false)
        .with_progress(Arc::new(move |fraction| {
            let bits = progress_watch.load(Ordering::Relaxed);
            assert!(
                fraction >= f64::from_bits(bits),
                "progress must be monotone"
            );
            progress_watch.store(fraction.to_bits(), Ordering::Relaxed);
        }));

    let result = import(stream, &ctx, &config, "survey").await.unwrap();
    assert_eq!(result.chunk_count, 5);
    assert_eq!(result.point_count, 1300);
    let root = result.root.expect("non-empty import has a root");

    // The manifest points at the same root.
    let manifest = RootManifest::read(&**ctx.store(), "survey").await.unwrap();
    assert_eq!(manifest.root_id(), Some(root.id()));

    // The tree reloads from the store and preserves the point multiset.
    let reloaded = get_node(&ctx, root.id()).await.unwrap();
    assert_eq!(reloaded.point_count_tree(), 1300);
    assert_same_multiset(collect_positions(reloaded.clone()).await, &expected);
    assert_leaf_limits(reloaded, 128).await;

    // Progress ended at 1.0.
    assert_eq!(f64::from_bits(last_progress.load(Ordering::Relaxed)), 1.0);
}

#[tokio::test]
async fn import_empty_stream_yields_empty_manifest() {
    let ctx = test_ctx();
    let stream = futures::stream::iter(Vec::<Chunk>::new());
    let result = import(stream, &ctx, &ImportConfig::default(), "nothing")
        .await
        .unwrap();

    assert!(result.root.is_none());
    assert_eq!(result.point_count, 0);
    let manifest = RootManifest::read(&**ctx.store(), "nothing").await.unwrap();
    assert_eq!(manifest, RootManifest::Empty);
}

#[tokio::test]
async fn import_stream_of_only_empty_chunks_is_empty() {
    let ctx = test_ctx();
    let stream = futures::stream::iter(vec![
        Chunk::from_positions(vec![]),
        Chunk::from_positions(vec![]),
    ]);
    let result = import(stream, &ctx, &ImportConfig::default(), "void")
        .await
        .unwrap();
    assert!(result.root.is_none());
    assert_eq!(result.chunk_count, 2);
}

#[tokio::test]
async fn cancelled_import_returns_cancelled() {
    let ctx = test_ctx();
    let cancel = CancelToken::new();
    cancel.cancel();
    let config = ImportConfig::default().with_cancel(cancel);
    let stream = futures::stream::iter(vec![Chunk::from_positions(uniform_points(
        7,
        100,
        DVec3::ZERO,
    ))]);

    let result = import(stream, &ctx, &config, "aborted").await;
    assert!(matches!(result, Err(ImportError::Cancelled)));

    // Nothing was promised: no manifest exists for the aborted run.
    assert!(RootManifest::read(&**ctx.store(), "aborted").await.is_err());
}

#[tokio::test]
async fn hundred_random_points_make_one_tight_leaf() {
    // 100 uniform points in the unit cube under the default split limit:
    // a single leaf whose exact bounds are the tight box of the points.
    let ctx = test_ctx();
    let points = uniform_points(42, 100, DVec3::ZERO);
    let bounds = cumulus_core::Aabb::from_points(&points).unwrap();
    let stream = futures::stream::iter(vec![Chunk::from_positions(points.clone())]);

    let result = import(stream, &ctx, &ImportConfig::default(), "tiny")
        .await
        .unwrap();
    let root = result.root.unwrap();
    assert!(root.is_leaf());
    assert_eq!(root.point_count_tree(), 100);
    assert_eq!(root.bounding_box_exact_global(), bounds);

    assert_same_multiset(collect_positions(root).await, &points);
}
