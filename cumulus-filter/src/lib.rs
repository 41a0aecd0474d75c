//! Filters and filtered views for the cumulus point cloud store.
//!
//! Filters classify nodes cheaply ([`FilterState`]: fully inside, fully
//! outside, or partial) and points exactly, combine under [`FilterAnd`] /
//! [`FilterOr`], and serialize to `type`-tagged JSON. [`FilteredNode`]
//! overlays a filter onto an existing octree without copying it: partial
//! nodes carry a cached [`IndexSet`] point mask that payload reads apply
//! lazily, and subnodes wrap recursively with deterministic derived ids.
//!
//! [`FilterState`]: cumulus_core::FilterState

pub mod attribute;
pub mod combinators;
pub mod error;
pub mod filter;
pub mod filtered_node;
pub mod index_set;
pub mod spatial;

pub use attribute::{FilterClassification, FilterIntensity, FilterNormalDirection};
pub use combinators::{FilterAnd, FilterOr};
pub use error::{FilterError, Result};
pub use filter::{filter_from_json, filters_equal, Filter, FilterRef};
pub use filtered_node::{register_filtered_decoder, FilteredNode, FilteredNodeDecoder};
pub use index_set::IndexSet;
pub use spatial::{
    FilterInsideBox, FilterInsideConvexHulls, FilterInsidePrismXY, FilterInsideSphere,
    FilterOutsideBox, Hull, Plane,
};
