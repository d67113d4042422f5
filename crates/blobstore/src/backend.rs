use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::{DataStream, DataWithMetadata, Location, Metadata, Result};

/// An immutable, backend-managed version of an object at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LocationWithMetadata {
    pub location: Location,
    pub metadata: Metadata,
}

pub type SnapshotStream = BoxStream<'static, Result<Snapshot>>;
pub type FileStream = BoxStream<'static, Result<LocationWithMetadata>>;

/// An exclusive, time-bounded advisory lease on a location.
///
/// Owns nothing but the lease token and a release closure back into the
/// backend; releasing fires on drop, or explicitly via [`Lease::release`].
pub struct Lease {
    location: Location,
    token: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Lease {
    pub fn new(
        location: Location,
        token: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Lease {
            location,
            token: token.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Relinquish the lease now rather than at drop.
    pub fn release(self) {}
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("location", &self.location)
            .field("token", &self.token)
            .finish()
    }
}

/// The storage primitive the secure store orchestrates.
///
/// Implementations include cloud object stores with snapshot and etag
/// support; [`crate::MemoryBackend`] is the in-process test double.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Idempotent overwrite. Creates a snapshot of the written version and
    /// returns the stored metadata, with `etag` and `snapshot` populated.
    async fn save(&self, loc: &Location, data: DataStream, meta: &Metadata) -> Result<Metadata>;

    /// Conditional write. With an etag in `meta`, succeeds only if the stored
    /// etag still matches; without one, succeeds only if no object exists.
    /// A lost race is `Ok(None)`, never an error.
    async fn try_optimistic_write(
        &self,
        loc: &Location,
        data: DataStream,
        meta: &Metadata,
    ) -> Result<Option<Metadata>>;

    /// Load current content, or a specific snapshot's. Absent locations are
    /// `None`. Tombstoned objects are returned with their tombstone metadata;
    /// filtering them is the caller's concern.
    async fn load(&self, loc: &Location, snapshot: Option<&str>) -> Result<Option<DataWithMetadata>>;

    async fn get_metadata(&self, loc: &Location, snapshot: Option<&str>)
        -> Result<Option<Metadata>>;

    /// All snapshots of a location, in unspecified order.
    fn find_snapshots(&self, loc: &Location) -> SnapshotStream;

    /// Objects in a container, optionally filtered to base paths starting
    /// with `prefix`. Whether tombstoned entries appear is backend policy.
    fn find_files(&self, container: &str, prefix: Option<&str>) -> FileStream;

    /// Stamp the tombstone on current metadata, preserving snapshots.
    async fn soft_delete(&self, loc: &Location) -> Result<()>;

    /// Remove the object and all of its snapshots.
    async fn permanent_delete(&self, loc: &Location) -> Result<()>;

    /// Acquire an exclusive lease. Fails fast: `Ok(None)` when already held.
    async fn lock(&self, loc: &Location) -> Result<Option<Lease>>;

    async fn create_container(&self, name: &str) -> Result<()>;

    async fn delete_container(&self, name: &str) -> Result<()>;
}
