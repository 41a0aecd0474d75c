//! The reduce phase: combining two octrees into one.
//!
//! The merge is eager and streaming: every new node is persisted before its
//! parent returns, so memory stays bounded by tree depth regardless of
//! dataset size. Subtrees that land alone in an octant are reused unchanged
//! (same id, same payload); only genuinely colliding regions are rewritten.
//! At leaves, the two sides' arrays are concatenated and re-bucketed under
//! the builder's rule, re-splitting when the combined count exceeds the
//! split limit.
//!
//! Scheduling: sibling sub-merges whose combined size is at or below the
//! configured threshold are spawned as parallel tasks and joined before the
//! parent is finalized; larger pairs recurse sequentially within the
//! calling task. Cancellation is checked at every node boundary; in-flight
//! tasks finish their current node and are never aborted mid-write.
//!
//! A subtree whose cell fits no octant of the merge cell (overlapping,
//! non-nested inputs — possible only with malformed cells) is logged and
//! skipped rather than failing the run; the skipped point count is
//! reported on the engine.

use crate::builder::{build_arrays, make_leaf, BuildContext, PointArrays};
use crate::error::{ImportError, Result};
use cumulus_core::{
    common_cell, Aabb, AttributeData, AttributeKeys, AttributeKind, Cell, NodeRef, PointsNode,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinSet;

/// One input to a node-level merge: an existing subtree or loose points.
pub(crate) enum Source {
    Tree(NodeRef),
    Points(PointArrays),
}

fn source_count(source: &Source) -> u64 {
    match source {
        Source::Tree(node) => node.point_count_tree(),
        Source::Points(arrays) => arrays.len() as u64,
    }
}

/// Merge two octrees into one, preserving every point and the split-limit
/// invariant.
///
/// Count-preserving: the result holds exactly `|a| + |b|` points (minus any
/// skipped degenerate subtrees, which are reported on the engine); a
/// mismatch is a fatal invariant violation. The result's point multiset is
/// independent of pairing order across a multi-way reduce, though node ids
/// differ.
pub async fn merge(engine: &Arc<BuildContext>, a: NodeRef, b: NodeRef) -> Result<NodeRef> {
    let expected = a.point_count_tree() + b.point_count_tree();
    let skipped_before = engine.points_skipped();
    let cell = common_cell(&a.cell(), &b.cell());
    tracing::debug!(
        left = %a.id(),
        right = %b.id(),
        cell = ?cell,
        points = expected,
        "merging octrees"
    );

    let result = merge_sources(
        engine.clone(),
        cell,
        vec![Source::Tree(a), Source::Tree(b)],
        true,
    )
    .await?;

    let skipped = engine.points_skipped() - skipped_before;
    if result.point_count_tree() + skipped != expected {
        return Err(ImportError::invariant(format!(
            "merge count mismatch: {} + {skipped} skipped != {expected} expected",
            result.point_count_tree()
        )));
    }
    Ok(result)
}

/// Recursive N-way merge of sources under a fixed cell.
///
/// Invariant: every source is spatially contained in `cell` (aligned to it,
/// or strictly inside).
pub(crate) fn merge_sources(
    engine: Arc<BuildContext>,
    cell: Cell,
    sources: Vec<Source>,
    allow_spawn: bool,
) -> BoxFuture<'static, Result<NodeRef>> {
    Box::pin(async move {
        engine.cancel.check()?;

        // A lone subtree is reused unchanged — same id, same payload.
        if sources.len() == 1 {
            if let Source::Tree(node) = &sources[0] {
                engine.record_placed(node.point_count_tree());
                return Ok(node.clone());
            }
        }

        // Flatten the sources against this cell: aligned leaves contribute
        // their arrays, aligned interiors their children; everything else
        // slots into the octant that contains it.
        let octants = cell.children();
        let mut arrays: Option<PointArrays> = None;
        let mut slots: [Vec<Source>; 8] = Default::default();

        fn add_arrays(acc: &mut Option<PointArrays>, p: PointArrays) {
            *acc = Some(match acc.take() {
                Some(a) => a.concat(p),
                None => p,
            });
        }

        for source in sources {
            match source {
                Source::Points(p) => add_arrays(&mut arrays, p),
                Source::Tree(node) => {
                    let node_cell = node.cell();
                    // A centered cell nests only inside centered cells, and
                    // its octants line up with the outer cell's octants, so
                    // centered-in-centered is handled as aligned.
                    let aligned =
                        node_cell == cell || (node_cell.centered && cell.centered);
                    if aligned {
                        if node.is_leaf() {
                            add_arrays(&mut arrays, load_leaf_arrays(&node).await?);
                        } else {
                            for octant in 0..8u8 {
                                let Some(sub) = node.subnode(octant).await? else {
                                    continue;
                                };
                                match octants.iter().position(|c| c.contains(&sub.cell())) {
                                    Some(o) => slots[o].push(Source::Tree(sub)),
                                    None => skip_subtree(&engine, &sub, &cell),
                                }
                            }
                        }
                    } else {
                        match octants.iter().position(|c| c.contains(&node_cell)) {
                            Some(o) => slots[o].push(Source::Tree(node)),
                            None => skip_subtree(&engine, &node, &cell),
                        }
                    }
                }
            }
        }

        // Pure points, nothing structural left: same rules as a fresh build.
        if slots.iter().all(|s| s.is_empty()) {
            let Some(arrays) = arrays else {
                return Err(ImportError::invariant(
                    "merge flattened to no point sources",
                ));
            };
            if arrays.len() <= engine.split_limit || cell.exponent <= engine.min_cell_exponent {
                return make_leaf(&engine, cell, arrays).await;
            }
            return build_arrays(engine, cell, arrays).await;
        }

        // Interior: distribute loose points into octant buckets and merge
        // each occupied octant.
        let mut buckets: [Option<PointArrays>; 8] = match arrays {
            Some(a) => a.bucket(&cell),
            None => Default::default(),
        };
        let mut pending: Vec<(usize, Vec<Source>)> = Vec::new();
        for (octant, slot) in slots.into_iter().enumerate() {
            let mut sources = slot;
            if let Some(p) = buckets[octant].take() {
                sources.push(Source::Points(p));
            }
            if !sources.is_empty() {
                pending.push((octant, sources));
            }
        }

        let mut children: [Option<NodeRef>; 8] = Default::default();
        let mut tasks: JoinSet<(usize, Result<NodeRef>)> = JoinSet::new();
        let mut first_err: Option<ImportError> = None;
        for (octant, sources) in pending {
            if first_err.is_some() {
                break;
            }
            let child_cell = cell.child(octant as u8);
            let total: u64 = sources.iter().map(source_count).sum();
            if allow_spawn && sources.len() > 1 && total <= engine.parallel_merge_threshold {
                let engine = engine.clone();
                tasks.spawn(async move {
                    (octant, merge_sources(engine, child_cell, sources, false).await)
                });
            } else {
                match merge_sources(engine.clone(), child_cell, sources, allow_spawn).await {
                    Ok(node) => children[octant] = Some(node),
                    Err(e) => first_err = Some(e),
                }
            }
        }

        // Join the sibling barrier. On error, tasks still run to completion
        // — cancellation is cooperative and store writes are never aborted.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((octant, Ok(node))) => children[octant] = Some(node),
                Ok((_, Err(e))) => first_err = first_err.or(Some(e)),
                Err(e) => first_err = first_err.or(Some(e.into())),
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let mut bounds: Option<Aabb> = None;
        let mut count = 0u64;
        for child in children.iter().flatten() {
            count += child.point_count_tree();
            let b = child.bounding_box_exact_global();
            bounds = Some(match bounds {
                Some(acc) => acc.union(&b),
                None => b,
            });
        }
        let bounds =
            bounds.ok_or_else(|| ImportError::invariant("merge interior without children"))?;
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

/// Chosen degenerate policy: a subtree that fits no octant of the merge
/// cell is dropped with a warning instead of failing the whole run.
fn skip_subtree(engine: &Arc<BuildContext>, node: &NodeRef, cell: &Cell) {
    tracing::warn!(
        subtree = %node.id(),
        subtree_cell = ?node.cell(),
        merge_cell = ?cell,
        points = node.point_count_tree(),
        "subtree fits no octant of the merge cell, skipping"
    );
    engine.record_skipped(node.point_count_tree());
}

/// Load a leaf's payload back into working arrays (positions global).
///
/// Goes through the node's accessors, so filtered views contribute exactly
/// their masked points.
async fn load_leaf_arrays(node: &NodeRef) -> Result<PointArrays> {
    let positions = node.positions_global().await?;

    async fn typed<T, F>(node: &NodeRef, kind: AttributeKind, extract: F) -> Result<Option<Vec<T>>>
    where
        F: FnOnce(&AttributeData) -> Option<Vec<T>>,
    {
        match node.attribute(kind).await? {
            None => Ok(None),
            Some(data) => extract(&data).map(Some).ok_or_else(|| {
                cumulus_core::Error::unsupported_format(format!(
                    "attribute {kind:?} holds a mismatched payload"
                ))
                .into()
            }),
        }
    }

    let colors = typed(node, AttributeKind::Colors, |d| match d {
        AttributeData::Colors(v) => Some(v.clone()),
        _ => None,
    })
    .await?;
    let normals = typed(node, AttributeKind::Normals, |d| match d {
        AttributeData::Normals(v) => Some(v.clone()),
        _ => None,
    })
    .await?;
    let intensities = typed(node, AttributeKind::Intensities, |d| match d {
        AttributeData::Intensities(v) => Some(v.clone()),
        _ => None,
    })
    .await?;
    let classifications = typed(node, AttributeKind::Classifications, |d| match d {
        AttributeData::Classifications(v) => Some(v.clone()),
        _ => None,
    })
    .await?;

    Ok(PointArrays {
        positions,
        colors,
        normals,
        intensities,
        classifications,
    })
}
