//! Availability cache: which images this process has seen present locally.
//!
//! Entries are inserted only if absent and are never updated or removed. The
//! local store can lose images behind our back, so a "present" entry is an
//! optimization, not a guarantee.
//!
//! The lock only guards the in-memory map. It is never held across an
//! inspection or pull, so resolutions of unrelated images never wait on each
//! other's I/O.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use imgres_ref::ImageReference;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::metadata::ImageMetadata;

/// Cache statistics.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    discarded_inserts: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Inserts that lost to an existing entry.
    pub discarded_inserts: u64,
}

/// Process-scoped map from image reference to last known metadata.
///
/// Construct one per transport client and share it via `Arc`.
#[derive(Debug, Default)]
pub struct ImageAvailabilityCache {
    entries: RwLock<HashMap<ImageReference, ImageMetadata>>,
    stats: CacheStats,
}

impl ImageAvailabilityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an image. Does not modify any entry.
    pub async fn lookup(&self, reference: &ImageReference) -> Option<ImageMetadata> {
        let entries = self.entries.read().await;
        let found = entries.get(reference).cloned();

        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert `metadata` unless an entry already exists.
    ///
    /// The check and the insert happen under one write lock, so under
    /// concurrent inserts for the same reference the first writer wins and
    /// later (possibly newer) metadata is discarded. Returns true if this
    /// call inserted.
    pub async fn insert_if_absent(
        &self,
        reference: &ImageReference,
        metadata: ImageMetadata,
    ) -> bool {
        let mut entries = self.entries.write().await;

        match entries.entry(reference.clone()) {
            Entry::Occupied(existing) => {
                self.stats.discarded_inserts.fetch_add(1, Ordering::Relaxed);
                trace!(
                    image = %reference,
                    kept_id = %existing.get().id,
                    discarded_id = %metadata.id,
                    "Availability cache already has image, keeping first entry"
                );
                false
            }
            Entry::Vacant(slot) => {
                debug!(image = %reference, id = %metadata.id, "Recorded image as available");
                slot.insert(metadata);
                self.stats.inserts.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Check if an image is cached, without touching the hit/miss counters.
    pub async fn contains(&self, reference: &ImageReference) -> bool {
        self.entries.read().await.contains_key(reference)
    }

    /// Number of cached images.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            discarded_inserts: self.stats.discarded_inserts.load(Ordering::Relaxed),
        }
    }
}
