//! Map-reduce import pipeline for the cumulus point cloud store.
//!
//! Ingestion is a two-phase pipeline over a stream of [`Chunk`]s:
//!
//! 1. **Map** ([`builder`]): each chunk becomes its own small octree,
//!    built in parallel up to the configured degree of parallelism.
//! 2. **Reduce** ([`merge`]): the resulting trees are merged pairwise —
//!    count-preserving, split-limit-respecting, eagerly persisted — until
//!    one tree remains, whose id lands in a durable [root
//!    manifest](cumulus_core::RootManifest).
//!
//! [`pipeline::import`] wires both phases together with weighted progress
//! reporting and cooperative cancellation. [`lod`] adds subsampled
//! level-of-detail payloads to a finished tree.

pub mod builder;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod lod;
pub mod merge;
pub mod pipeline;

pub use builder::{build_chunk, BuildContext, PlacedFn};
pub use cancel::CancelToken;
pub use chunk::Chunk;
pub use config::{
    EstimateNormalsFn, ImportConfig, ProgressFn, ReprojectFn, DEFAULT_MIN_CELL_EXPONENT,
    DEFAULT_PARALLEL_MERGE_THRESHOLD, DEFAULT_SPLIT_LIMIT,
};
pub use error::{ImportError, Result};
pub use lod::generate_lod;
pub use merge::merge;
pub use pipeline::{import, ImportResult};
