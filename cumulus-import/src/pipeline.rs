//! The map-reduce import pipeline.
//!
//! Map: chunks stream in and are built into small octrees, up to the
//! configured parallelism in flight. Reduce: the resulting roots are merged
//! pairwise — any two, as soon as a worker slot is free — until one tree
//! remains, which is persisted under the caller's manifest name. An entirely
//! empty stream yields the explicit empty manifest, not an error.
//!
//! Progress is one monotone fraction in `[0, 1]`: the map phase owns the
//! first half (by chunks completed), the reduce phase the second (by points
//! placed relative to the expected total reduce volume).

use crate::builder::{build_chunk, BuildContext};
use crate::chunk::Chunk;
use crate::config::{ImportConfig, ProgressFn};
use crate::error::{ImportError, Result};
use crate::merge::merge;
use cumulus_core::{ContextRef, NodeRef, RootManifest};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of an import run.
#[derive(Debug)]
pub struct ImportResult {
    /// The root of the imported octree, or `None` for an empty input stream.
    pub root: Option<NodeRef>,
    /// Total points in the result.
    pub point_count: u64,
    /// Chunks consumed from the input stream (including empty ones).
    pub chunk_count: u64,
}

/// Monotone progress reporter: out-of-order updates from parallel workers
/// never move the reported fraction backwards. The callback runs under the
/// lock so invocations are serialized in increasing order.
struct Progress {
    callback: Option<ProgressFn>,
    reported: std::sync::Mutex<f64>,
}

impl Progress {
    fn new(callback: Option<ProgressFn>) -> Arc<Self> {
        Arc::new(Self {
            callback,
            reported: std::sync::Mutex::new(0.0),
        })
    }

    fn report(&self, value: f64) {
        let Some(callback) = &self.callback else {
            return;
        };
        let value = value.clamp(0.0, 1.0);
        let mut reported = self.reported.lock().expect("progress lock poisoned");
        if value <= *reported {
            return;
        }
        *reported = value;
        callback(value);
    }
}

/// Import a stream of chunks into one octree persisted under
/// `manifest_name`.
///
/// The result's point multiset equals the union of all input chunks'
/// points; no ordering is guaranteed. Cancellation surfaces as
/// [`ImportError::Cancelled`]; chunks and nodes persisted before the
/// cancellation remain valid in the store.
pub async fn import<S>(
    mut chunks: S,
    ctx: &ContextRef,
    config: &ImportConfig,
    manifest_name: &str,
) -> Result<ImportResult>
where
    S: Stream<Item = Chunk> + Unpin,
{
    config.validate()?;
    let parallelism = config.effective_parallelism();
    let progress = Progress::new(config.progress.clone());
    tracing::info!(manifest_name, parallelism, "starting import");

    // ---- Map: parallel chunk builds ----

    let map_engine = BuildContext::new(ctx.clone(), config);
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let mut tasks: JoinSet<Result<Option<NodeRef>>> = JoinSet::new();
    let mut roots: Vec<NodeRef> = Vec::new();
    let mut first_err: Option<ImportError> = None;
    let mut chunk_count = 0u64;
    let mut chunks_done = 0u64;
    let mut points_seen = 0u64;

    let absorb = |joined: std::result::Result<Result<Option<NodeRef>>, tokio::task::JoinError>,
                  roots: &mut Vec<NodeRef>,
                  first_err: &mut Option<ImportError>,
                  chunks_done: &mut u64| {
        *chunks_done += 1;
        match joined {
            Ok(Ok(Some(root))) => roots.push(root),
            Ok(Ok(None)) => {} // empty chunk, dropped
            Ok(Err(e)) => *first_err = first_err.take().or(Some(e)),
            Err(e) => *first_err = first_err.take().or(Some(e.into())),
        }
    };

    while let Some(chunk) = chunks.next().await {
        if first_err.is_some() || config.cancel.is_cancelled() {
            break;
        }
        chunk_count += 1;
        points_seen += chunk.len() as u64;

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let engine = map_engine.clone();
        tasks.spawn(async move {
            let _permit = permit;
            build_chunk(&engine, chunk).await
        });

        while let Some(joined) = tasks.try_join_next() {
            absorb(joined, &mut roots, &mut first_err, &mut chunks_done);
            progress.report(0.5 * chunks_done as f64 / chunk_count as f64);
        }
    }

    // Drain in-flight builds; never abort them mid-write.
    while let Some(joined) = tasks.join_next().await {
        absorb(joined, &mut roots, &mut first_err, &mut chunks_done);
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    config.cancel.check()?;
    progress.report(0.5);
    tracing::info!(
        chunks = chunk_count,
        points = points_seen,
        trees = roots.len(),
        "map phase complete"
    );

    // ---- Reduce: pairwise merges until one tree remains ----

    if roots.is_empty() {
        RootManifest::Empty
            .write(&**ctx.store(), manifest_name)
            .await?;
        progress.report(1.0);
        tracing::info!(manifest_name, "import produced an empty point set");
        return Ok(ImportResult {
            root: None,
            point_count: 0,
            chunk_count,
        });
    }

    let total_points: u64 = roots.iter().map(|r| r.point_count_tree()).sum();
    // Every balanced reduce round re-places about every point once.
    let rounds = (roots.len() as u64).next_power_of_two().trailing_zeros().max(1) as u64;
    let expected = (total_points * rounds).max(1);
    let reduce_progress = progress.clone();
    let reduce_engine = BuildContext::with_placed_callback(
        ctx.clone(),
        config,
        Some(Arc::new(move |placed| {
            let frac = placed as f64 / expected as f64;
            reduce_progress.report(0.5 + 0.5 * frac);
        })),
    );

    let mut pending = roots;
    let mut merges: JoinSet<Result<NodeRef>> = JoinSet::new();
    let mut in_flight = 0usize;
    let mut first_err: Option<ImportError> = None;
    loop {
        if first_err.is_none() && !config.cancel.is_cancelled() {
            while pending.len() >= 2 && in_flight < parallelism {
                let a = pending.pop().expect("len >= 2");
                let b = pending.pop().expect("len >= 2");
                let engine = reduce_engine.clone();
                merges.spawn(async move { merge(&engine, a, b).await });
                in_flight += 1;
            }
        }
        if in_flight == 0 {
            break;
        }
        match merges.join_next().await.expect("in_flight > 0") {
            Ok(Ok(node)) => pending.push(node),
            Ok(Err(e)) => first_err = first_err.or(Some(e)),
            Err(e) => first_err = first_err.or(Some(e.into())),
        }
        in_flight -= 1;
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    config.cancel.check()?;

    let root = pending.pop().expect("non-empty reduce ends with one root");
    debug_assert!(pending.is_empty(), "reduce must consume all trees");

    let manifest = RootManifest::Root {
        root_id: *root.id(),
        point_count: root.point_count_tree(),
    };
    manifest.write(&**ctx.store(), manifest_name).await?;
    progress.report(1.0);
    tracing::info!(
        manifest_name,
        root = %root.id(),
        points = root.point_count_tree(),
        "import complete"
    );

    Ok(ImportResult {
        root: Some(root.clone()),
        point_count: root.point_count_tree(),
        chunk_count,
    })
}
