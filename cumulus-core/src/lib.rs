//! Core data model for the cumulus point cloud store.
//!
//! Cumulus indexes massive point clouds — billions of points, far larger
//! than memory — into an octree whose nodes are immutable, content-addressed
//! records in a key-value store, lazily faulted into memory on demand.
//!
//! This crate holds the storage-facing data model:
//!
//! - [`cell`]: power-of-two grid cells, the spatial key of octree nodes
//! - [`geometry`]: double-precision bounding boxes
//! - [`content_id`]: SHA-256 content addressing
//! - [`storage`]: the object store abstraction plus memory/file stores
//! - [`resolver`]: logical store names → concrete stores
//! - [`lazy`]: memoizing lazy references with compute-once loading
//! - [`attribute`]: semantic attribute kinds and payload blobs
//! - [`node`]: the octree node contract and its kinds
//! - [`manifest`]: durable root manifests
//!
//! Building and merging trees lives in `cumulus-import`; filtering views in
//! `cumulus-filter`.

pub mod attribute;
pub mod cell;
pub mod content_id;
pub mod error;
pub mod geometry;
pub mod lazy;
pub mod manifest;
pub mod node;
pub mod resolver;
pub mod storage;

pub use attribute::{get_attribute, AttributeData, AttributeKeys, AttributeKind};
pub use cell::{common_cell, Cell};
pub use content_id::{sha256_hex, ContentId, ContentKind};
pub use error::{Error, Result};
pub use geometry::Aabb;
pub use lazy::LazyRef;
pub use manifest::RootManifest;
pub use node::{
    decode_node, get_node, ContextRef, EnvelopeDecoder, FilterState, LinkedNode, MergedNodes,
    NodeContext, NodeEnvelope, NodeRef, OctreeNode, PointDistance, PointsNode,
};
pub use resolver::{IdentityResolver, MapResolver, PatternResolver, ResolverRef, StoreResolver};
pub use storage::{
    ContentAddressedWrite, FileStore, MemoryStore, ObjectRead, ObjectStore, ObjectWrite, StoreRef,
};
