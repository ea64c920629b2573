//! In-memory preview handles.
//!
//! Every displayed image (the original and each converted artifact) is
//! registered here and addressed by a `preview://{n}` URL. A
//! [`PreviewHandle`] owns its registration: dropping it releases the entry,
//! exactly once. Callers never release by hand, so replacing or removing an
//! item cannot leak a preview.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
    released: AtomicU64,
}

impl Registry {
    fn live(&self) -> MutexGuard<'_, HashSet<u64>> {
        // A poisoned set is still a valid set.
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared registry of live previews. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Registry>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` and return the owning handle.
    pub fn register(&self, bytes: impl Into<Arc<[u8]>>) -> PreviewHandle {
        let bytes = bytes.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.live().insert(id);
        PreviewHandle {
            id,
            bytes,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of handles not yet released.
    pub fn live_count(&self) -> usize {
        self.inner.live().len()
    }

    /// Total releases since the registry was created.
    pub fn released_count(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

/// Owned registration of one preview.
#[derive(Debug)]
pub struct PreviewHandle {
    id: u64,
    bytes: Arc<[u8]>,
    registry: Arc<Registry>,
}

impl PreviewHandle {
    const SCHEME: &'static str = "preview://";

    pub fn url(&self) -> String {
        format!("{}{}", Self::SCHEME, self.id)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        if self.registry.live().remove(&self.id) {
            self.registry.released.fetch_add(1, Ordering::Relaxed);
        }
    }
}
