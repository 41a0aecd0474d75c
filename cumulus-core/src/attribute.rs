//! Semantic attribute kinds and their persisted payloads.
//!
//! A node's attribute table maps [`AttributeKind`]s to store keys. The
//! payloads themselves are [`AttributeData`] blobs, encoded with postcard
//! under an `attr:` content id. Positions are stored cell-local
//! (`local = global − cell.center()`) in `f32`; everything else is stored
//! as-is.
//!
//! `KdTree` payloads are produced and consumed by an external codec; this
//! crate only carries their keys.

use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::storage::ObjectRead;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Semantic attribute kinds a node can carry. Closed set with stable wire
/// names; the `*Lod` variants hold subsampled payloads at interior nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    Positions,
    Colors,
    Normals,
    Intensities,
    Classifications,
    KdTree,
    PositionsLod,
    ColorsLod,
    NormalsLod,
    IntensitiesLod,
    ClassificationsLod,
    KdTreeLod,
}

impl AttributeKind {
    /// Whether this is one of the LOD variants.
    pub fn is_lod(&self) -> bool {
        matches!(
            self,
            AttributeKind::PositionsLod
                | AttributeKind::ColorsLod
                | AttributeKind::NormalsLod
                | AttributeKind::IntensitiesLod
                | AttributeKind::ClassificationsLod
                | AttributeKind::KdTreeLod
        )
    }

    /// The LOD variant of this kind (identity for LOD kinds).
    pub fn lod(&self) -> AttributeKind {
        match self {
            AttributeKind::Positions => AttributeKind::PositionsLod,
            AttributeKind::Colors => AttributeKind::ColorsLod,
            AttributeKind::Normals => AttributeKind::NormalsLod,
            AttributeKind::Intensities => AttributeKind::IntensitiesLod,
            AttributeKind::Classifications => AttributeKind::ClassificationsLod,
            AttributeKind::KdTree => AttributeKind::KdTreeLod,
            lod => *lod,
        }
    }

    /// The non-LOD variant of this kind (identity for base kinds).
    pub fn base(&self) -> AttributeKind {
        match self {
            AttributeKind::PositionsLod => AttributeKind::Positions,
            AttributeKind::ColorsLod => AttributeKind::Colors,
            AttributeKind::NormalsLod => AttributeKind::Normals,
            AttributeKind::IntensitiesLod => AttributeKind::Intensities,
            AttributeKind::ClassificationsLod => AttributeKind::Classifications,
            AttributeKind::KdTreeLod => AttributeKind::KdTree,
            base => *base,
        }
    }
}

/// Attribute table: kinds to store keys. Ordered for deterministic envelopes.
pub type AttributeKeys = std::collections::BTreeMap<AttributeKind, ContentId>;

/// A persisted attribute array.
///
/// Element counts of parallel arrays on one node are always equal; the
/// builder enforces this at ingestion and the merge preserves it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeData {
    /// Cell-local position offsets against the node cell's center.
    PositionsLocal(Vec<[f32; 3]>),
    /// RGBA colors.
    Colors(Vec<[u8; 4]>),
    /// Unit normals.
    Normals(Vec<[f32; 3]>),
    /// Raw sensor intensities.
    Intensities(Vec<i32>),
    /// Classification codes (LAS-style).
    Classifications(Vec<u8>),
}

impl AttributeData {
    /// Number of elements in the array.
    pub fn len(&self) -> usize {
        match self {
            AttributeData::PositionsLocal(v) => v.len(),
            AttributeData::Colors(v) => v.len(),
            AttributeData::Normals(v) => v.len(),
            AttributeData::Intensities(v) => v.len(),
            AttributeData::Classifications(v) => v.len(),
        }
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode to the binary blob form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from the binary blob form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Take the subset of elements at `indices` (in index order).
    ///
    /// Indices must be in range; the caller guarantees this since masks are
    /// computed against the same arrays they select from.
    pub fn select(&self, indices: &[u32]) -> AttributeData {
        fn pick<T: Copy>(v: &[T], idx: &[u32]) -> Vec<T> {
            idx.iter().map(|&i| v[i as usize]).collect()
        }
        match self {
            AttributeData::PositionsLocal(v) => AttributeData::PositionsLocal(pick(v, indices)),
            AttributeData::Colors(v) => AttributeData::Colors(pick(v, indices)),
            AttributeData::Normals(v) => AttributeData::Normals(pick(v, indices)),
            AttributeData::Intensities(v) => AttributeData::Intensities(pick(v, indices)),
            AttributeData::Classifications(v) => AttributeData::Classifications(pick(v, indices)),
        }
    }
}

/// Load and decode an attribute blob.
pub async fn get_attribute(store: &dyn ObjectRead, id: &ContentId) -> Result<Arc<AttributeData>> {
    let bytes = store.read_bytes(id).await?;
    Ok(Arc::new(AttributeData::decode(&bytes)?))
}

/// Expect a positions payload, failing on category confusion.
pub fn expect_positions(data: &AttributeData) -> Result<&[[f32; 3]]> {
    match data {
        AttributeData::PositionsLocal(v) => Ok(v),
        other => Err(Error::unsupported_format(format!(
            "expected positions payload, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::ContentKind;
    use crate::storage::{ContentAddressedWrite, MemoryStore};

    #[test]
    fn test_encode_decode_roundtrip() {
        let data = AttributeData::PositionsLocal(vec![[0.5, -0.25, 0.0], [1.0, 2.0, 3.0]]);
        let bytes = data.encode().unwrap();
        assert_eq!(AttributeData::decode(&bytes).unwrap(), data);

        let data = AttributeData::Intensities(vec![-999, 0, 20000]);
        let bytes = data.encode().unwrap();
        assert_eq!(AttributeData::decode(&bytes).unwrap(), data);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(AttributeData::decode(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_select() {
        let data = AttributeData::Intensities(vec![10, 20, 30, 40]);
        let sel = data.select(&[1, 3]);
        assert_eq!(sel, AttributeData::Intensities(vec![20, 40]));
    }

    #[test]
    fn test_lod_kind_mapping() {
        assert_eq!(AttributeKind::Positions.lod(), AttributeKind::PositionsLod);
        assert_eq!(AttributeKind::PositionsLod.lod(), AttributeKind::PositionsLod);
        assert_eq!(AttributeKind::ColorsLod.base(), AttributeKind::Colors);
        assert!(AttributeKind::NormalsLod.is_lod());
        assert!(!AttributeKind::Normals.is_lod());
    }

    #[test]
    fn test_attribute_keys_json_shape() {
        let mut keys = AttributeKeys::new();
        let id = ContentId::new(ContentKind::Attribute, b"blob");
        keys.insert(AttributeKind::Positions, id);
        keys.insert(AttributeKind::PositionsLod, id);
        let json = serde_json::to_value(&keys).unwrap();
        assert!(json.get("positions").is_some());
        assert!(json.get("positionsLod").is_some());
    }

    #[tokio::test]
    async fn test_get_attribute() {
        let store = MemoryStore::new();
        let data = AttributeData::Classifications(vec![2, 2, 6]);
        let id = store
            .put(ContentKind::Attribute, &data.encode().unwrap())
            .await
            .unwrap();
        let loaded = get_attribute(&store, &id).await.unwrap();
        assert_eq!(*loaded, data);
    }
}
