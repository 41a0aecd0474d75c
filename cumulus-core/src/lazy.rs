//! Lazy, memoized references to store-resident values.
//!
//! A [`LazyRef`] is the in-memory face of a content-addressed blob: it knows
//! the id, and faults the decoded value in on first access. The slot is
//! guarded by an async mutex held across the load, so concurrent first
//! accesses observe exactly one load (compute-once), and `dispose()` can
//! drop the cached value without invalidating the reference — the id stays
//! valid and a later access simply re-loads.

use crate::content_id::ContentId;
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;

/// Lazy, cached, content-addressed handle to a decoded value.
pub struct LazyRef<T: ?Sized> {
    id: ContentId,
    slot: tokio::sync::Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> LazyRef<T> {
    /// Create an unloaded reference to `id`.
    pub fn new(id: ContentId) -> Self {
        Self {
            id,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a reference that is already loaded.
    ///
    /// Used when the value was just built and persisted; faulting it back in
    /// from the store would be wasted I/O.
    pub fn loaded(id: ContentId, value: Arc<T>) -> Self {
        Self {
            id,
            slot: tokio::sync::Mutex::new(Some(value)),
        }
    }

    /// The id this reference points at.
    pub fn id(&self) -> &ContentId {
        &self.id
    }

    /// Return the cached value, or run `fetch` to load it.
    ///
    /// The slot lock is held across the fetch, so concurrent callers of an
    /// unloaded ref wait for one load rather than racing their own.
    pub async fn get_or_load<F, Fut>(&self, fetch: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = fetch().await?;
        *slot = Some(value.clone());
        Ok(value)
    }

    /// Peek at the cached value without loading.
    pub fn cached(&self) -> Option<Arc<T>> {
        self.slot.try_lock().ok().and_then(|slot| slot.clone())
    }

    /// Drop the cached value. The reference stays valid; the next access
    /// re-loads from the store.
    pub fn dispose(&self) {
        if let Ok(mut slot) = self.slot.try_lock() {
            *slot = None;
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRef")
            .field("id", &self.id)
            .field("loaded", &self.cached().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::ContentKind;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_id(data: &[u8]) -> ContentId {
        ContentId::new(ContentKind::Attribute, data)
    }

    #[tokio::test]
    async fn test_loads_once() {
        let lazy = LazyRef::<String>::new(test_id(b"x"));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = lazy
                .get_or_load(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Arc::new("value".to_string())) }
                })
                .await
                .unwrap();
            assert_eq!(*v, "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_is_compute_once() {
        let lazy = Arc::new(LazyRef::<u32>::new(test_id(b"y")));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let lazy = lazy.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                lazy.get_or_load(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::task::yield_now().await;
                        Ok(Arc::new(7u32))
                    }
                })
                .await
                .unwrap()
            });
        }
        while let Some(v) = tasks.join_next().await {
            assert_eq!(*v.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_clears_cache_only() {
        let lazy = LazyRef::<u32>::new(test_id(b"z"));
        let _ = lazy.get_or_load(|| async { Ok(Arc::new(1u32)) }).await.unwrap();
        assert!(lazy.cached().is_some());

        lazy.dispose();
        assert!(lazy.cached().is_none());

        // Id survives; next access re-loads.
        let v = lazy.get_or_load(|| async { Ok(Arc::new(2u32)) }).await.unwrap();
        assert_eq!(*v, 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let lazy = LazyRef::<u32>::new(test_id(b"w"));
        let r = lazy
            .get_or_load(|| async { Err::<Arc<u32>, _>(Error::not_found("missing")) })
            .await;
        assert!(r.is_err());

        let v = lazy.get_or_load(|| async { Ok(Arc::new(3u32)) }).await.unwrap();
        assert_eq!(*v, 3);
    }
}
