//! Secure object store facade.
//!
//! [`SecureStore`] orchestrates a [`blobstore::BlobBackend`] with the
//! streaming codec pipeline: writes are optionally compressed and encrypted
//! chunk-by-chunk and tagged with the algorithms used; reads invert the
//! layering, gated on the stored metadata. Around that core it provides
//! etag-negotiated optimistic writes, crash-safe unique ID allocation backed
//! by the same store, leased locks on object keys, and post-write fan-out to
//! backup and index queues.

mod ids;
mod options;
mod queue;
mod store;

pub use ids::UniqueIdGenerator;
pub use options::SaveOptions;
pub use queue::{MemoryQueue, Queue, QueueMessage};
pub use store::{ObjectWithMetadata, SecureStore, SecureStoreBuilder, TypedObject};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An option was requested but the collaborator backing it was never
    /// configured on this store.
    #[error("no {0} is configured for this store")]
    NotConfigured(&'static str),
    /// Stored metadata declares an algorithm this store cannot satisfy.
    #[error("stored {kind} algorithm '{stored}' has no matching codec (available: {available:?})")]
    AlgorithmMismatch {
        kind: &'static str,
        stored: String,
        available: Option<String>,
    },
    /// A typed-object payload declares a different type than the caller asked
    /// to load.
    #[error("stored object type '{found}' does not match expected '{expected}'")]
    WrongType { expected: String, found: String },
    #[error("location '{0}' is held by an active lease")]
    Locked(blobstore::Location),
    /// The ID generator exceeded its retry budget against counter contention.
    #[error("failed to claim an id range after {attempts} attempts")]
    RangeAllocation { attempts: usize },
    #[error("counter blob at '{location}' is not a decimal integer")]
    CorruptCounter { location: blobstore::Location },
    /// A notification send failed after the payload was already durable; the
    /// caller may retry the notification.
    #[error("queue dispatch failed")]
    Queue(#[source] anyhow::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(blobstore::Error),
}

impl From<blobstore::Error> for Error {
    fn from(err: blobstore::Error) -> Self {
        match err {
            blobstore::Error::Locked(loc) => Error::Locked(loc),
            other => Error::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
