//! Level-of-detail generation.
//!
//! Interior nodes get subsampled copies of their subtree's points under the
//! `*Lod` attribute kinds, so coarse traversals can stop at any depth with
//! a representative payload. Generation is bottom-up: each interior node
//! gathers its children's LOD arrays (a leaf's full payload is its own
//! LOD), subsamples down to roughly the split limit, and is rewritten as a
//! new node carrying the extra keys — leaves are reused unchanged, and
//! because ids are content hashes, regenerating an unchanged tree
//! reproduces the same ids.
//!
//! Merging LOD-bearing trees produces a tree without interior LOD (the
//! merge rewrites interiors); run generation again on the merged root.

use crate::builder::{BuildContext, PointArrays};
use crate::error::Result;
use cumulus_core::{
    AttributeData, AttributeKeys, AttributeKind, ContentAddressedWrite, ContentKind, NodeRef,
    PointsNode,
};
use futures::future::BoxFuture;
use glam::DVec3;
use std::sync::Arc;

/// Rewrite `root` bottom-up with LOD attributes at interior nodes.
pub async fn generate_lod(engine: &Arc<BuildContext>, root: NodeRef) -> Result<NodeRef> {
    generate(engine.clone(), root).await
}

fn generate(engine: Arc<BuildContext>, node: NodeRef) -> BoxFuture<'static, Result<NodeRef>> {
    Box::pin(async move {
        engine.cancel.check()?;
        if node.is_leaf() {
            // A leaf's full payload is its own LOD.
            return Ok(node);
        }

        let mut children: [Option<NodeRef>; 8] = Default::default();
        let mut gathered: Option<PointArrays> = None;
        for octant in 0..8u8 {
            let Some(sub) = node.subnode(octant).await? else {
                continue;
            };
            let sub = generate(engine.clone(), sub).await?;
            let arrays = lod_source(&sub).await?;
            gathered = Some(match gathered {
                Some(acc) => acc.concat(arrays),
                None => arrays,
            });
            children[octant as usize] = Some(sub);
        }

        let gathered = gathered.expect("interior nodes have at least one subnode");
        let sample = subsample(gathered, engine.split_limit);

        let center = node.cell().center();
        let local: Vec<[f32; 3]> = sample
            .positions
            .iter()
            .map(|p| {
                let d = *p - center;
                [d.x as f32, d.y as f32, d.z as f32]
            })
            .collect();

        let mut keys: AttributeKeys = node.attribute_keys().clone();
        let mut payloads = vec![(
            AttributeKind::PositionsLod,
            AttributeData::PositionsLocal(local),
        )];
        if let Some(colors) = sample.colors {
            payloads.push((AttributeKind::ColorsLod, AttributeData::Colors(colors)));
        }
        if let Some(normals) = sample.normals {
            payloads.push((AttributeKind::NormalsLod, AttributeData::Normals(normals)));
        }
        if let Some(intensities) = sample.intensities {
            payloads.push((
                AttributeKind::IntensitiesLod,
                AttributeData::Intensities(intensities),
            ));
        }
        if let Some(classifications) = sample.classifications {
            payloads.push((
                AttributeKind::ClassificationsLod,
                AttributeData::Classifications(classifications),
            ));
        }
        for (kind, data) in payloads {
            let id = engine
                .node_context()
                .store()
                .put(ContentKind::Attribute, &data.encode()?)
                .await?;
            keys.insert(kind, id);
        }

        let rewritten = PointsNode::create(
            engine.node_context(),
            node.cell(),
            node.bounding_box_exact_global(),
            node.point_count_tree(),
            node.point_distance(),
            keys,
            children,
        )
        .await?;
        Ok(rewritten as NodeRef)
    })
}

/// A node's LOD source arrays: its `*Lod` payloads when present, its full
/// payloads otherwise (leaves), positions in global coordinates.
async fn lod_source(node: &NodeRef) -> Result<PointArrays> {
    let center = node.cell().center();

    let pos_kind = if node.has(AttributeKind::PositionsLod) {
        AttributeKind::PositionsLod
    } else {
        AttributeKind::Positions
    };
    let positions = match node.attribute(pos_kind).await? {
        Some(data) => match &*data {
            AttributeData::PositionsLocal(local) => local
                .iter()
                .map(|p| center + DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
                .collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };

    async fn pick<T: Clone>(
        node: &NodeRef,
        lod: AttributeKind,
        base: AttributeKind,
        extract: fn(&AttributeData) -> Option<&Vec<T>>,
    ) -> Result<Option<Vec<T>>> {
        let kind = if node.has(lod) { lod } else { base };
        Ok(node
            .attribute(kind)
            .await?
            .and_then(|data| extract(&data).cloned()))
    }

    let colors = pick(node, AttributeKind::ColorsLod, AttributeKind::Colors, |d| {
        match d {
            AttributeData::Colors(v) => Some(v),
            _ => None,
        }
    })
    .await?;
    let normals = pick(
        node,
        AttributeKind::NormalsLod,
        AttributeKind::Normals,
        |d| match d {
            AttributeData::Normals(v) => Some(v),
            _ => None,
        },
    )
    .await?;
    let intensities = pick(
        node,
        AttributeKind::IntensitiesLod,
        AttributeKind::Intensities,
        |d| match d {
            AttributeData::Intensities(v) => Some(v),
            _ => None,
        },
    )
    .await?;
    let classifications = pick(
        node,
        AttributeKind::ClassificationsLod,
        AttributeKind::Classifications,
        |d| match d {
            AttributeData::Classifications(v) => Some(v),
            _ => None,
        },
    )
    .await?;

    Ok(PointArrays {
        positions,
        colors,
        normals,
        intensities,
        classifications,
    })
}

/// Every-k-th subsampling down to at most `target` points.
fn subsample(arrays: PointArrays, target: usize) -> PointArrays {
    let n = arrays.positions.len();
    if n <= target {
        return arrays;
    }
    let stride = n.div_ceil(target);
    let indices: Vec<usize> = (0..n).step_by(stride).collect();

    fn select<T: Copy>(values: Option<Vec<T>>, indices: &[usize]) -> Option<Vec<T>> {
        values.map(|v| indices.iter().map(|&i| v[i]).collect())
    }

    PointArrays {
        positions: indices.iter().map(|&i| arrays.positions[i]).collect(),
        colors: select(arrays.colors, &indices),
        normals: select(arrays.normals, &indices),
        intensities: select(arrays.intensities, &indices),
        classifications: select(arrays.classifications, &indices),
    }
}
