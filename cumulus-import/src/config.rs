//! Import configuration

use crate::cancel::CancelToken;
use glam::DVec3;
use std::sync::Arc;

/// Progress callback, invoked with a monotone fraction in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Reprojection hook applied to a chunk's global positions before building.
pub type ReprojectFn = Arc<dyn Fn(&mut Vec<DVec3>) + Send + Sync>;

/// Normal-estimation hook; returns one unit normal per input position.
pub type EstimateNormalsFn = Arc<dyn Fn(&[DVec3]) -> Vec<[f32; 3]> + Send + Sync>;

/// Default maximum number of points per leaf before forced subdivision.
pub const DEFAULT_SPLIT_LIMIT: usize = 8192;

/// Default minimum cell exponent.
///
/// Cells at the floor keep their points as one leaf even above the split
/// limit; without a floor, duplicate points would subdivide forever.
pub const DEFAULT_MIN_CELL_EXPONENT: i32 = -32;

/// Default subtree size (points) below which sibling sub-merges are
/// scheduled as parallel tasks.
pub const DEFAULT_PARALLEL_MERGE_THRESHOLD: u64 = 262_144;

/// Configuration for building and merging octrees.
#[derive(Clone)]
pub struct ImportConfig {
    /// Maximum points per leaf before forced subdivision.
    ///
    /// Must be ≥ 1. Default: 8192.
    pub split_limit: usize,

    /// Maximum degree of parallelism for map builds and reduce merges.
    ///
    /// `0` uses all available hardware threads. Default: 0.
    pub max_parallelism: usize,

    /// Minimum cell exponent; subdivision stops at this floor.
    ///
    /// Default: −32 (cube edge ≈ 2.3e-10 at unit scale).
    pub min_cell_exponent: i32,

    /// Subtree point count below which sibling sub-merges run as parallel
    /// tasks, joined before their parent is finalized. Larger subtrees
    /// recurse sequentially within the calling task.
    ///
    /// Default: 262,144.
    pub parallel_merge_threshold: u64,

    /// Whether leaves compute nearest-neighbor distance statistics.
    ///
    /// Default: true.
    pub compute_point_distance: bool,

    /// Progress callback for the pipeline (fraction in `[0, 1]`).
    pub progress: Option<ProgressFn>,

    /// Cooperative cancellation token.
    pub cancel: CancelToken,

    /// Optional reprojection applied to every chunk before building.
    pub reproject: Option<ReprojectFn>,

    /// Optional normal estimation for chunks without normals.
    pub estimate_normals: Option<EstimateNormalsFn>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            split_limit: DEFAULT_SPLIT_LIMIT,
            max_parallelism: 0,
            min_cell_exponent: DEFAULT_MIN_CELL_EXPONENT,
            parallel_merge_threshold: DEFAULT_PARALLEL_MERGE_THRESHOLD,
            compute_point_distance: true,
            progress: None,
            cancel: CancelToken::new(),
            reproject: None,
            estimate_normals: None,
        }
    }
}

impl ImportConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the split limit.
    pub fn with_split_limit(mut self, split_limit: usize) -> Self {
        self.split_limit = split_limit;
        self
    }

    /// Builder method to set the maximum parallelism (0 ⇒ hardware).
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    /// Builder method to set the minimum cell exponent.
    pub fn with_min_cell_exponent(mut self, min_cell_exponent: i32) -> Self {
        self.min_cell_exponent = min_cell_exponent;
        self
    }

    /// Builder method to set the parallel merge threshold.
    pub fn with_parallel_merge_threshold(mut self, threshold: u64) -> Self {
        self.parallel_merge_threshold = threshold;
        self
    }

    /// Builder method to toggle point-distance statistics.
    pub fn with_point_distance(mut self, enabled: bool) -> Self {
        self.compute_point_distance = enabled;
        self
    }

    /// Builder method to set the progress callback.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builder method to set the cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builder method to set the reprojection hook.
    pub fn with_reproject(mut self, reproject: ReprojectFn) -> Self {
        self.reproject = Some(reproject);
        self
    }

    /// Builder method to set the normal-estimation hook.
    pub fn with_estimate_normals(mut self, estimate: EstimateNormalsFn) -> Self {
        self.estimate_normals = Some(estimate);
        self
    }

    /// The effective worker count: `max_parallelism`, or all available
    /// hardware threads when 0.
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallelism > 0 {
            self.max_parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.split_limit == 0 {
            return Err(crate::error::ImportError::invalid_config(
                "split_limit must be at least 1",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ImportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportConfig")
            .field("split_limit", &self.split_limit)
            .field("max_parallelism", &self.max_parallelism)
            .field("min_cell_exponent", &self.min_cell_exponent)
            .field("parallel_merge_threshold", &self.parallel_merge_threshold)
            .field("compute_point_distance", &self.compute_point_distance)
            .field("progress", &self.progress.is_some())
            .field("reproject", &self.reproject.is_some())
            .field("estimate_normals", &self.estimate_normals.is_some())
            .finish()
    }
}
