//! Blob backend contract and data model.
//!
//! A blob backend is the storage primitive under the secure store: it holds
//! opaque byte payloads addressed by [`Location`], tagged with [`Metadata`],
//! versioned by backend-managed snapshots, and guarded by etag-conditional
//! writes and advisory leases. [`MemoryBackend`] is the in-process
//! implementation used by tests and as a reference for cloud bindings.

mod backend;
mod data;
mod location;
mod metadata;
pub mod memory;

pub use backend::{BlobBackend, FileStream, Lease, LocationWithMetadata, Snapshot, SnapshotStream};
pub use data::{ByteStream, DataStream, DataWithMetadata};
pub use location::Location;
pub use memory::MemoryBackend;
pub use metadata::{keys, Metadata};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The location is held by an active lease the caller does not hold.
    #[error("location '{0}' is held by an active lease")]
    Locked(Location),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Transport, authorization, or storage failure from the backend.
    #[error("backend failure")]
    Backend(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
