//! The map phase: one chunk in, one small octree out.
//!
//! The builder computes the minimal cell enclosing the chunk, then
//! recursively buckets points into octants (three independent axis
//! comparisons against the cell center) until a bucket fits the split limit
//! or the cell hits the exponent floor. Leaves persist their attribute
//! arrays under fresh keys with positions converted to cell-local `f32`
//! offsets; interior nodes carry only counts, bounds, and child references.
//! Every node is persisted before its parent.

use crate::cancel::CancelToken;
use crate::chunk::Chunk;
use crate::config::{EstimateNormalsFn, ImportConfig};
use crate::error::Result;
use cumulus_core::{
    Aabb, AttributeData, AttributeKeys, AttributeKind, Cell, ContentAddressedWrite, ContentKind,
    ContextRef, NodeRef, PointDistance, PointsNode,
};
use futures::future::BoxFuture;
use glam::DVec3;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback receiving the cumulative number of points placed so far.
pub type PlacedFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Shared state for one build/merge run: configuration snapshot, the node
/// context, cancellation, and the points-placed counter driving progress.
pub struct BuildContext {
    pub(crate) ctx: ContextRef,
    pub(crate) split_limit: usize,
    pub(crate) min_cell_exponent: i32,
    pub(crate) parallel_merge_threshold: u64,
    pub(crate) compute_point_distance: bool,
    pub(crate) cancel: CancelToken,
    pub(crate) estimate_normals: Option<EstimateNormalsFn>,
    pub(crate) reproject: Option<crate::config::ReprojectFn>,
    placed: AtomicU64,
    skipped: AtomicU64,
    on_placed: Option<PlacedFn>,
}

impl BuildContext {
    /// Engine state for `ctx` under `config`.
    pub fn new(ctx: ContextRef, config: &ImportConfig) -> Arc<Self> {
        Self::with_placed_callback(ctx, config, None)
    }

    /// Engine state with a points-placed callback (merge progress).
    pub fn with_placed_callback(
        ctx: ContextRef,
        config: &ImportConfig,
        on_placed: Option<PlacedFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            split_limit: config.split_limit,
            min_cell_exponent: config.min_cell_exponent,
            parallel_merge_threshold: config.parallel_merge_threshold,
            compute_point_distance: config.compute_point_distance,
            cancel: config.cancel.clone(),
            estimate_normals: config.estimate_normals.clone(),
            reproject: config.reproject.clone(),
            placed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            on_placed,
        })
    }

    /// The node context this engine builds into.
    pub fn node_context(&self) -> &ContextRef {
        &self.ctx
    }

    /// Cumulative points placed into results by this engine.
    pub fn points_placed(&self) -> u64 {
        self.placed.load(Ordering::Relaxed)
    }

    /// Points dropped by the merge's warn-and-skip degenerate handling.
    pub fn points_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_placed(&self, n: u64) {
        let total = self.placed.fetch_add(n, Ordering::Relaxed) + n;
        if let Some(cb) = &self.on_placed {
            cb(total);
        }
    }

    pub(crate) fn record_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("split_limit", &self.split_limit)
            .field("min_cell_exponent", &self.min_cell_exponent)
            .field("placed", &self.points_placed())
            .finish()
    }
}

// ============================================================================
// In-memory point arrays
// ============================================================================

/// Working form of a point batch during build and merge: global positions
/// plus whichever parallel attribute arrays are present.
#[derive(Debug, Default)]
pub(crate) struct PointArrays {
    pub positions: Vec<DVec3>,
    pub colors: Option<Vec<[u8; 4]>>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub intensities: Option<Vec<i32>>,
    pub classifications: Option<Vec<u8>>,
}

impl PointArrays {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn from_chunk(chunk: Chunk) -> Self {
        let (positions, colors, normals, intensities, classifications) = chunk.into_arrays();
        Self {
            positions,
            colors,
            normals,
            intensities,
            classifications,
        }
    }

    /// Concatenate two batches. Attributes present on only one side are
    /// dropped (arrays must stay parallel); dropping is logged.
    pub fn concat(mut self, mut other: PointArrays) -> PointArrays {
        fn join<T>(
            name: &str,
            a: Option<Vec<T>>,
            b: Option<Vec<T>>,
        ) -> Option<Vec<T>> {
            match (a, b) {
                (Some(mut a), Some(mut b)) => {
                    a.append(&mut b);
                    Some(a)
                }
                (None, None) => None,
                _ => {
                    tracing::warn!(attribute = name, "attribute present on only one merge side, dropping");
                    None
                }
            }
        }
        self.positions.append(&mut other.positions);
        PointArrays {
            positions: self.positions,
            colors: join("colors", self.colors, other.colors),
            normals: join("normals", self.normals, other.normals),
            intensities: join("intensities", self.intensities, other.intensities),
            classifications: join("classifications", self.classifications, other.classifications),
        }
    }

    /// Partition into up to 8 octant batches against `cell`'s center.
    pub fn bucket(self, cell: &Cell) -> [Option<PointArrays>; 8] {
        let octant: Vec<u8> = self
            .positions
            .iter()
            .map(|p| cell.octant_of_point(*p))
            .collect();

        fn split<T: Copy>(values: &[T], octant: &[u8]) -> [Vec<T>; 8] {
            let mut out: [Vec<T>; 8] = Default::default();
            for (v, &o) in values.iter().zip(octant) {
                out[o as usize].push(*v);
            }
            out
        }

        fn take<T>(slot: &mut Option<[Option<Vec<T>>; 8]>, i: usize) -> Option<Vec<T>> {
            slot.as_mut().and_then(|arr| arr[i].take())
        }

        let positions = split(&self.positions, &octant);
        let mut colors = self.colors.map(|v| split(&v, &octant).map(Some));
        let mut normals = self.normals.map(|v| split(&v, &octant).map(Some));
        let mut intensities = self.intensities.map(|v| split(&v, &octant).map(Some));
        let mut classifications = self.classifications.map(|v| split(&v, &octant).map(Some));

        let mut out: [Option<PointArrays>; 8] = Default::default();
        for (i, positions) in positions.into_iter().enumerate() {
            if positions.is_empty() {
                continue;
            }
            out[i] = Some(PointArrays {
                positions,
                colors: take(&mut colors, i),
                normals: take(&mut normals, i),
                intensities: take(&mut intensities, i),
                classifications: take(&mut classifications, i),
            });
        }
        out
    }
}

// ============================================================================
// Build
// ============================================================================

/// Build one chunk into a small octree.
///
/// Applies the configured reprojection and normal-estimation hooks first.
/// An empty chunk yields `Ok(None)` — the explicit empty outcome, not an
/// error.
pub async fn build_chunk(engine: &Arc<BuildContext>, chunk: Chunk) -> Result<Option<NodeRef>> {
    if chunk.is_empty() {
        return Ok(None);
    }
    let mut arrays = PointArrays::from_chunk(chunk);
    if let Some(reproject) = &engine.reproject {
        reproject(&mut arrays.positions);
    }
    if arrays.normals.is_none() {
        if let Some(estimate) = &engine.estimate_normals {
            arrays.normals = Some(estimate(&arrays.positions));
        }
    }

    let bounds = Aabb::from_points(&arrays.positions).expect("chunk is non-empty");
    let cell = Cell::from_aabb(&bounds);
    tracing::debug!(points = arrays.len(), cell = ?cell, "building chunk");
    let node = build_arrays(engine.clone(), cell, arrays).await?;
    Ok(Some(node))
}

/// Recursive build of in-memory arrays under a fixed cell.
pub(crate) fn build_arrays(
    engine: Arc<BuildContext>,
    cell: Cell,
    arrays: PointArrays,
) -> BoxFuture<'static, Result<NodeRef>> {
    Box::pin(async move {
        engine.cancel.check()?;
        if arrays.len() <= engine.split_limit || cell.exponent <= engine.min_cell_exponent {
            return make_leaf(&engine, cell, arrays).await;
        }

        let buckets = arrays.bucket(&cell);
        let mut children: [Option<NodeRef>; 8] = Default::default();
        let mut bounds: Option<Aabb> = None;
        let mut count = 0u64;
        for (octant, bucket) in buckets.into_iter().enumerate() {
            let Some(bucket) = bucket else { continue };
            let child = build_arrays(engine.clone(), cell.child(octant as u8), bucket).await?;
            count += child.point_count_tree();
            let b = child.bounding_box_exact_global();
            bounds = Some(match bounds {
                Some(acc) => acc.union(&b),
                None => b,
            });
            children[octant] = Some(child);
        }

        let bounds = bounds.expect("non-empty arrays produce at least one bucket");
        let node = PointsNode::create(
            &engine.ctx,
            cell,
            bounds,
            count,
            None,
            AttributeKeys::new(),
            children,
        )
        .await?;
        Ok(node as NodeRef)
    })
}

/// Persist one leaf: attribute blobs under fresh keys, then the node.
pub(crate) async fn make_leaf(
    engine: &Arc<BuildContext>,
    cell: Cell,
    arrays: PointArrays,
) -> Result<NodeRef> {
    let count = arrays.len() as u64;
    debug_assert!(count > 0, "leaves are never built from empty arrays");
    let bounds = Aabb::from_points(&arrays.positions).expect("non-empty");
    let center = cell.center();

    let point_distance = engine
        .compute_point_distance
        .then(|| point_distance_stats(&arrays.positions))
        .flatten();

    let local: Vec<[f32; 3]> = arrays
        .positions
        .iter()
        .map(|p| {
            let d = *p - center;
            [d.x as f32, d.y as f32, d.z as f32]
        })
        .collect();

    let mut keys = AttributeKeys::new();
    let mut payloads = vec![(
        AttributeKind::Positions,
        AttributeData::PositionsLocal(local),
    )];
    if let Some(colors) = arrays.colors {
        payloads.push((AttributeKind::Colors, AttributeData::Colors(colors)));
    }
    if let Some(normals) = arrays.normals {
        payloads.push((AttributeKind::Normals, AttributeData::Normals(normals)));
    }
    if let Some(intensities) = arrays.intensities {
        payloads.push((
            AttributeKind::Intensities,
            AttributeData::Intensities(intensities),
        ));
    }
    if let Some(classifications) = arrays.classifications {
        payloads.push((
            AttributeKind::Classifications,
            AttributeData::Classifications(classifications),
        ));
    }
    for (kind, data) in payloads {
        let id = engine
            .ctx
            .store()
            .put(ContentKind::Attribute, &data.encode()?)
            .await?;
        keys.insert(kind, id);
    }

    let node = PointsNode::create(
        &engine.ctx,
        cell,
        bounds,
        count,
        point_distance,
        keys,
        Default::default(),
    )
    .await?;
    engine.record_placed(count);
    Ok(node as NodeRef)
}

/// Nearest-neighbor distance statistics over a bounded sample.
///
/// Probes at most 256 evenly strided points, each against the full array,
/// keeping the builder at O(sample × leaf).
fn point_distance_stats(positions: &[DVec3]) -> Option<PointDistance> {
    const MAX_PROBES: usize = 256;
    let n = positions.len();
    if n < 2 {
        return None;
    }
    let stride = n.div_ceil(MAX_PROBES);
    let mut distances = Vec::with_capacity(n.min(MAX_PROBES));
    for i in (0..n).step_by(stride) {
        let p = positions[i];
        let mut best = f64::INFINITY;
        for (j, q) in positions.iter().enumerate() {
            if i == j {
                continue;
            }
            let d = (p - *q).length_squared();
            if d < best {
                best = d;
            }
        }
        distances.push(best.sqrt());
    }
    let count = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / count;
    let var = distances.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / count;
    Some(PointDistance {
        average: mean as f32,
        std_dev: var.sqrt() as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::{MemoryStore, NodeContext, OctreeNode, StoreRef};

    fn engine_with(config: ImportConfig) -> Arc<BuildContext> {
        let store: StoreRef = Arc::new(MemoryStore::new());
        BuildContext::new(NodeContext::new(store), &config)
    }

    fn grid_positions(n_per_axis: usize, spacing: f64) -> Vec<DVec3> {
        let mut out = Vec::new();
        for x in 0..n_per_axis {
            for y in 0..n_per_axis {
                for z in 0..n_per_axis {
                    out.push(DVec3::new(
                        x as f64 * spacing + 0.5,
                        y as f64 * spacing + 0.5,
                        z as f64 * spacing + 0.5,
                    ));
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_empty_chunk_yields_no_node() {
        let engine = engine_with(ImportConfig::default());
        let result = build_chunk(&engine, Chunk::from_positions(vec![]))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_small_chunk_is_single_leaf() {
        let engine = engine_with(ImportConfig::default());
        let positions = grid_positions(4, 0.1); // 64 points
        let bounds = Aabb::from_points(&positions).unwrap();
        let node = build_chunk(&engine, Chunk::from_positions(positions))
            .await
            .unwrap()
            .unwrap();

        assert!(node.is_leaf());
        assert_eq!(node.point_count_tree(), 64);
        assert_eq!(node.bounding_box_exact_global(), bounds);
        assert!(node.point_distance().is_some());
        assert_eq!(engine.points_placed(), 64);
    }

    #[tokio::test]
    async fn test_split_respects_limit() {
        let config = ImportConfig::default().with_split_limit(10);
        let engine = engine_with(config);
        let positions = grid_positions(4, 0.3); // 64 points, spread
        let node = build_chunk(&engine, Chunk::from_positions(positions))
            .await
            .unwrap()
            .unwrap();

        assert!(!node.is_leaf());
        assert_eq!(node.point_count_tree(), 64);

        // Every leaf holds at most the split limit.
        fn check(node: NodeRef) -> BoxFuture<'static, u64> {
            Box::pin(async move {
                if node.is_leaf() {
                    assert!(node.point_count_tree() <= 10);
                    return node.point_count_tree();
                }
                let mut total = 0;
                for octant in 0..8 {
                    if let Some(sub) = node.subnode(octant).await.unwrap() {
                        total += check(sub).await;
                    }
                }
                assert_eq!(total, node.point_count_tree());
                total
            })
        }
        assert_eq!(check(node).await, 64);
    }

    #[tokio::test]
    async fn test_identical_points_stop_at_exponent_floor() {
        let config = ImportConfig::default()
            .with_split_limit(2)
            .with_min_cell_exponent(-8)
            .with_point_distance(false);
        let engine = engine_with(config);
        let positions = vec![DVec3::new(0.25, 0.25, 0.25); 5];
        let node = build_chunk(&engine, Chunk::from_positions(positions))
            .await
            .unwrap()
            .unwrap();

        // All duplicates: the floor leaf may exceed the split limit.
        let mut node = node;
        while !node.is_leaf() {
            let mut next = None;
            for octant in 0..8 {
                if let Some(sub) = node.subnode(octant).await.unwrap() {
                    assert!(next.is_none(), "duplicates land in a single octant");
                    next = Some(sub);
                }
            }
            node = next.unwrap();
        }
        assert_eq!(node.point_count_tree(), 5);
        assert!(node.cell().exponent <= -8);
    }

    #[tokio::test]
    async fn test_attributes_follow_points_through_split() {
        let config = ImportConfig::default().with_split_limit(4).with_point_distance(false);
        let engine = engine_with(config);
        let positions = grid_positions(2, 0.4); // 8 points
        let intensities: Vec<i32> = (0..8).map(|i| i * 100).collect();
        let chunk = Chunk::from_positions(positions.clone())
            .with_intensities(intensities)
            .unwrap();
        let node = build_chunk(&engine, chunk).await.unwrap().unwrap();
        assert!(!node.is_leaf());

        // Each point keeps the intensity it was ingested with.
        let mut seen = Vec::new();
        for octant in 0..8 {
            let Some(sub) = node.subnode(octant).await.unwrap() else {
                continue;
            };
            let ints = sub.attribute(AttributeKind::Intensities).await.unwrap().unwrap();
            let AttributeData::Intensities(values) = (*ints).clone() else {
                panic!("expected intensities");
            };
            let global = sub.positions_global().await.unwrap();
            for (p, v) in global.iter().zip(values) {
                let original = positions
                    .iter()
                    .position(|q| (*q - *p).length() < 1e-6)
                    .expect("position survives round-trip");
                assert_eq!(v, original as i32 * 100);
                seen.push(v);
            }
        }
        assert_eq!(seen.len(), 8);
    }

    #[tokio::test]
    async fn test_hooks_applied_before_build() {
        let config = ImportConfig::default()
            .with_point_distance(false)
            .with_reproject(Arc::new(|positions: &mut Vec<DVec3>| {
                for p in positions.iter_mut() {
                    *p += DVec3::splat(100.0);
                }
            }))
            .with_estimate_normals(Arc::new(|positions: &[DVec3]| {
                vec![[0.0, 0.0, 1.0]; positions.len()]
            }));
        let engine = engine_with(config);
        let node = build_chunk(
            &engine,
            Chunk::from_positions(vec![DVec3::ZERO, DVec3::splat(0.5)]),
        )
        .await
        .unwrap()
        .unwrap();

        let global = node.positions_global().await.unwrap();
        assert!((global[0] - DVec3::splat(100.0)).length() < 1e-6);
        assert!(node.has(AttributeKind::Normals));
    }

    #[test]
    fn test_point_distance_stats() {
        // Regular grid with spacing 0.5: every nearest neighbor is 0.5 away.
        let positions = grid_positions(3, 0.5);
        let stats = point_distance_stats(&positions).unwrap();
        assert!((stats.average - 0.5).abs() < 1e-6);
        assert!(stats.std_dev < 1e-6);

        assert!(point_distance_stats(&[DVec3::ZERO]).is_none());
    }
}
