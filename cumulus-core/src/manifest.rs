//! Durable root manifests.
//!
//! An import run persists its result under a caller-supplied name: either
//! the root node id, or an explicit *empty* sentinel when the input stream
//! held no points. The manifest is the only mutable slot in a store — a new
//! import under the same name repoints it, while all previously referenced
//! nodes stay addressable.

use crate::content_id::ContentId;
use crate::error::Result;
use crate::storage::{ObjectRead, ObjectWrite};
use serde::{Deserialize, Serialize};

/// The durable result of an import: a root pointer or an empty marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RootManifest {
    /// The imported stream contained no points.
    Empty,
    /// The root of the imported octree.
    #[serde(rename_all = "camelCase")]
    Root {
        /// Id of the root node.
        root_id: ContentId,
        /// Total points in the tree, denormalized for cheap inspection.
        point_count: u64,
    },
}

impl RootManifest {
    /// The root node id, or `None` for the empty sentinel.
    pub fn root_id(&self) -> Option<&ContentId> {
        match self {
            RootManifest::Empty => None,
            RootManifest::Root { root_id, .. } => Some(root_id),
        }
    }

    /// Persist under `name`, replacing any previous manifest.
    pub async fn write(&self, store: &dyn ObjectWrite, name: &str) -> Result<()> {
        store.write_named(name, &serde_json::to_vec(self)?).await
    }

    /// Read the manifest stored under `name`.
    pub async fn read(store: &dyn ObjectRead, name: &str) -> Result<RootManifest> {
        let bytes = store.read_named(name).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::ContentKind;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_roundtrip() {
        let store = MemoryStore::new();
        let manifest = RootManifest::Root {
            root_id: ContentId::new(ContentKind::Node, b"root"),
            point_count: 12345,
        };
        manifest.write(&store, "survey-2031").await.unwrap();
        let back = RootManifest::read(&store, "survey-2031").await.unwrap();
        assert_eq!(back, manifest);
        assert!(back.root_id().is_some());
    }

    #[tokio::test]
    async fn test_empty_sentinel() {
        let store = MemoryStore::new();
        RootManifest::Empty.write(&store, "nothing").await.unwrap();
        let back = RootManifest::read(&store, "nothing").await.unwrap();
        assert_eq!(back, RootManifest::Empty);
        assert!(back.root_id().is_none());
    }

    #[tokio::test]
    async fn test_repointing_replaces() {
        let store = MemoryStore::new();
        RootManifest::Empty.write(&store, "cloud").await.unwrap();
        let manifest = RootManifest::Root {
            root_id: ContentId::new(ContentKind::Node, b"v2"),
            point_count: 7,
        };
        manifest.write(&store, "cloud").await.unwrap();
        assert_eq!(RootManifest::read(&store, "cloud").await.unwrap(), manifest);
    }
}
