//! Storage traits for reading and writing point cloud data.
//!
//! A cumulus store is a content-addressed key-value store: immutable blobs
//! (node envelopes, attribute arrays) are written under their [`ContentId`]
//! and never modified, plus a small number of *named* slots (root manifests)
//! that are overwritten in place.
//!
//! ## Traits
//!
//! - `ObjectRead`: read-only access (read, exists, named reads)
//! - `ObjectWrite`: mutating operations (write by id, write named)
//! - `ContentAddressedWrite`: hash-then-write (extends `ObjectWrite`)
//! - `ObjectStore`: marker trait combining all capabilities
//!
//! Writes by id are idempotent: the id is the hash of the bytes, so two
//! racing writers of the same id write the same bytes. Reading an absent id
//! is `Error::NotFound` — never a silent empty substitute.

use crate::content_id::{ContentId, ContentKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

// ============================================================================
// Layout
// ============================================================================

/// Store-relative path for a content-addressed blob.
///
/// Filesystem-like stores map kinds to directory prefixes; key-value stores
/// may treat the whole path as an opaque key.
pub fn content_path(id: &ContentId) -> String {
    match id.kind() {
        ContentKind::Node => format!("nodes/{}.json", id.digest_hex()),
        ContentKind::Attribute => format!("attrs/{}.bin", id.digest_hex()),
        ContentKind::Manifest => format!("manifests/{}.json", id.digest_hex()),
    }
}

/// Store-relative path for a named (mutable) manifest slot.
///
/// Rejects names that would escape the store root.
pub fn manifest_path(name: &str) -> Result<String> {
    if name.is_empty()
        || name.starts_with('/')
        || name.contains("..")
        || name.contains('\\')
    {
        return Err(Error::invalid_address(format!(
            "invalid manifest name '{name}': must be a relative name without '..'"
        )));
    }
    Ok(format!("manifests/{name}.json"))
}

// ============================================================================
// Core traits
// ============================================================================

/// Read-only storage operations.
#[async_trait]
pub trait ObjectRead: Debug + Send + Sync {
    /// Read the blob stored under `id`.
    ///
    /// Returns `Error::NotFound` if the id is absent.
    async fn read_bytes(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Whether a blob exists under `id`.
    async fn exists(&self, id: &ContentId) -> Result<bool>;

    /// Read a named manifest slot.
    ///
    /// Returns `Error::NotFound` if the slot was never written.
    async fn read_named(&self, name: &str) -> Result<Vec<u8>>;
}

/// Mutating storage operations.
#[async_trait]
pub trait ObjectWrite: Debug + Send + Sync {
    /// Write `bytes` under `id`.
    ///
    /// Idempotent by key: the id is derived from the bytes, so overwriting
    /// is a no-op and concurrent writers are harmless.
    async fn write_bytes(&self, id: &ContentId, bytes: &[u8]) -> Result<()>;

    /// Write a named manifest slot, replacing any previous value.
    async fn write_named(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Hash-then-write: storage computes the id from the content.
#[async_trait]
pub trait ContentAddressedWrite: ObjectWrite {
    /// Write `bytes` under its content hash, returning the id.
    async fn put(&self, kind: ContentKind, bytes: &[u8]) -> Result<ContentId> {
        let id = ContentId::new(kind, bytes);
        self.write_bytes(&id, bytes).await?;
        Ok(id)
    }
}

/// Full storage capability marker.
///
/// Used for type erasure as `Arc<dyn ObjectStore>`.
pub trait ObjectStore: ObjectRead + ContentAddressedWrite {}
impl<T: ObjectRead + ContentAddressedWrite> ObjectStore for T {}

/// Shared handle to a store.
pub type StoreRef = Arc<dyn ObjectStore>;

// ============================================================================
// MemoryStore
// ============================================================================

/// A simple in-memory store for tests and transient pipelines.
///
/// Stores blobs in a `HashMap` behind a `parking_lot::RwLock`; cloning
/// shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<parking_lot::RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs (including named slots).
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl ObjectRead for MemoryStore {
    async fn read_bytes(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.data
            .read()
            .get(&content_path(id))
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.data.read().contains_key(&content_path(id)))
    }

    async fn read_named(&self, name: &str) -> Result<Vec<u8>> {
        let path = manifest_path(name)?;
        self.data
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::not_found(name.to_string()))
    }
}

#[async_trait]
impl ObjectWrite for MemoryStore {
    async fn write_bytes(&self, id: &ContentId, bytes: &[u8]) -> Result<()> {
        self.data.write().insert(content_path(id), bytes.to_vec());
        Ok(())
    }

    async fn write_named(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = manifest_path(name)?;
        self.data.write().insert(path, bytes.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ContentAddressedWrite for MemoryStore {}

// ============================================================================
// FileStore
// ============================================================================

/// File-backed store rooted at a base directory.
///
/// Layout: `nodes/{hex}.json`, `attrs/{hex}.bin`, `manifests/{name}.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: std::path::PathBuf,
}

impl FileStore {
    /// Create a file store rooted at `base_path`.
    ///
    /// The directory does not have to exist yet; writes create it.
    pub fn new(base_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// The base directory of this store.
    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn resolve(&self, rel: &str) -> std::path::PathBuf {
        self.base_path.join(rel)
    }

    async fn read_file(&self, rel: &str, what: &str) -> Result<Vec<u8>> {
        let path = self.resolve(rel);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(what.to_string())
            } else {
                Error::io(format!("failed to read {}: {}", path.display(), e))
            }
        })
    }

    async fn write_file(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io(format!("failed to write {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl ObjectRead for FileStore {
    async fn read_bytes(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.read_file(&content_path(id), &id.to_string()).await
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        match tokio::fs::metadata(self.resolve(&content_path(id))).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed to stat {id}: {e}"))),
        }
    }

    async fn read_named(&self, name: &str) -> Result<Vec<u8>> {
        self.read_file(&manifest_path(name)?, name).await
    }
}

#[async_trait]
impl ObjectWrite for FileStore {
    async fn write_bytes(&self, id: &ContentId, bytes: &[u8]) -> Result<()> {
        self.write_file(&content_path(id), bytes).await
    }

    async fn write_named(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.write_file(&manifest_path(name)?, bytes).await
    }
}

#[async_trait]
impl ContentAddressedWrite for FileStore {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let id = store.put(ContentKind::Attribute, b"hello points").await.unwrap();

        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.read_bytes(&id).await.unwrap(), b"hello points");

        let other = ContentId::new(ContentKind::Attribute, b"absent");
        assert!(!store.exists(&other).await.unwrap());
        assert!(matches!(
            store.read_bytes(&other).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_put_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.put(ContentKind::Node, b"{}").await.unwrap();
        let b = store.put(ContentKind::Node, b"{}").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_named_slots() {
        let store = MemoryStore::new();
        assert!(store.read_named("cloud").await.is_err());
        store.write_named("cloud", b"v1").await.unwrap();
        assert_eq!(store.read_named("cloud").await.unwrap(), b"v1");
        store.write_named("cloud", b"v2").await.unwrap();
        assert_eq!(store.read_named("cloud").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_manifest_name_traversal_rejected() {
        let store = MemoryStore::new();
        assert!(store.write_named("../escape", b"x").await.is_err());
        assert!(store.write_named("/abs", b"x").await.is_err());
        assert!(store.write_named("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let id = store.put(ContentKind::Node, br#"{"kind":"points"}"#).await.unwrap();
        assert!(store.exists(&id).await.unwrap());
        assert_eq!(
            store.read_bytes(&id).await.unwrap(),
            br#"{"kind":"points"}"#
        );

        store.write_named("cloud", b"manifest").await.unwrap();
        assert_eq!(store.read_named("cloud").await.unwrap(), b"manifest");

        // Layout: node blobs land under nodes/.
        assert!(dir.path().join("nodes").is_dir());
    }

    #[tokio::test]
    async fn test_file_store_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let id = ContentId::new(ContentKind::Node, b"never written");
        assert!(matches!(
            store.read_bytes(&id).await,
            Err(Error::NotFound(_))
        ));
        assert!(!store.exists(&id).await.unwrap());
    }
}
