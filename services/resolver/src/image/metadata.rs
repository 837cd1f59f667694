//! Snapshot of what the local image store reported for an image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for an image the local store confirmed as present.
///
/// A value only exists after a successful inspection; "not present" is
/// modelled as `Option::None` by callers, never as a zeroed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Content id reported by the store (e.g. `sha256:...`).
    pub id: String,

    /// When the image was built, as recorded in its config.
    pub created_at: DateTime<Utc>,
}

impl ImageMetadata {
    /// Create a metadata snapshot.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    /// Age of the image relative to `now`. Negative if created in the future.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
