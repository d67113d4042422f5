//! In-process blob backend.
//!
//! Faithful to the contract a cloud backend provides: every save appends an
//! immutable snapshot version, etags gate conditional writes, tombstones are
//! metadata-only, and leases are exclusive with a fixed TTL. Containers are
//! created implicitly on save and explicitly via `create_container`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    keys, BlobBackend, DataStream, DataWithMetadata, Error, FileStream, Lease, Location,
    LocationWithMetadata, Metadata, Result, Snapshot, SnapshotStream,
};

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

type ObjKey = (String, Option<i64>);
type LeaseKey = (String, String, Option<i64>);

#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    lease_ttl: Duration,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, HashMap<ObjKey, StoredObject>>,
    leases: HashMap<LeaseKey, LeaseState>,
}

struct StoredObject {
    current: Metadata,
    versions: Vec<Version>,
}

struct Version {
    id: String,
    modified: DateTime<Utc>,
    data: Bytes,
    meta: Metadata,
}

struct LeaseState {
    token: String,
    expires: Instant,
}

fn obj_key(loc: &Location) -> ObjKey {
    (loc.base_path().to_string(), loc.id())
}

fn lease_key(loc: &Location) -> LeaseKey {
    (
        loc.container().to_string(),
        loc.base_path().to_string(),
        loc.id(),
    )
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: Arc::new(Mutex::new(State::default())),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        MemoryBackend {
            state: Arc::new(Mutex::new(State::default())),
            lease_ttl,
        }
    }

    fn write_version(
        state: &mut State,
        loc: &Location,
        data: Bytes,
        meta: &Metadata,
    ) -> Metadata {
        let now = Utc::now();
        let etag = Uuid::new_v4().to_string();
        let snapshot_id = Uuid::new_v4().to_string();

        let mut stored = meta.clone();
        stored.set(keys::CONTENT_LENGTH, data.len().to_string());
        stored.set(keys::SIZE, data.len().to_string());
        stored.set(keys::MODIFIED, now.to_rfc3339());
        stored.set_etag(etag);
        stored.set_snapshot(snapshot_id.clone());

        let object = state
            .containers
            .entry(loc.container().to_string())
            .or_default()
            .entry(obj_key(loc))
            .or_insert_with(|| StoredObject {
                current: Metadata::new(),
                versions: Vec::new(),
            });
        object.versions.push(Version {
            id: snapshot_id,
            modified: now,
            data,
            meta: stored.clone(),
        });
        object.current = stored.clone();

        tracing::debug!(location = %loc, bytes = stored.content_length(), "saved object version");
        stored
    }
}

impl State {
    /// An active lease refuses all writers; expired leases are ignored.
    fn check_lease(&self, loc: &Location) -> Result<()> {
        match self.leases.get(&lease_key(loc)) {
            Some(lease) if lease.expires > Instant::now() => Err(Error::Locked(loc.clone())),
            _ => Ok(()),
        }
    }

    fn object(&self, loc: &Location) -> Option<&StoredObject> {
        self.containers.get(loc.container())?.get(&obj_key(loc))
    }

    fn version_view(
        &self,
        loc: &Location,
        snapshot: Option<&str>,
    ) -> Option<(Bytes, Metadata)> {
        let object = self.object(loc)?;
        match snapshot {
            None => {
                let last = object.versions.last()?;
                Some((last.data.clone(), object.current.clone()))
            }
            Some(id) => {
                let version = object.versions.iter().find(|v| v.id == id)?;
                Some((version.data.clone(), version.meta.clone()))
            }
        }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn save(&self, loc: &Location, data: DataStream, meta: &Metadata) -> Result<Metadata> {
        let bytes = data.read_to_bytes().await?;
        let mut state = self.state.lock().expect("backend state poisoned");
        state.check_lease(loc)?;
        Ok(Self::write_version(&mut state, loc, bytes, meta))
    }

    async fn try_optimistic_write(
        &self,
        loc: &Location,
        data: DataStream,
        meta: &Metadata,
    ) -> Result<Option<Metadata>> {
        let bytes = data.read_to_bytes().await?;
        let mut state = self.state.lock().expect("backend state poisoned");
        state.check_lease(loc)?;

        let stored_etag = state
            .object(loc)
            .map(|object| object.current.etag().unwrap_or_default().to_string());
        let matches = match (stored_etag, meta.etag()) {
            // No object yet: only a create (no supplied etag) may proceed.
            (None, supplied) => supplied.is_none(),
            // Object exists: only an update with the current etag may proceed.
            (Some(stored), supplied) => supplied == Some(stored.as_str()),
        };
        if !matches {
            return Ok(None);
        }
        Ok(Some(Self::write_version(&mut state, loc, bytes, meta)))
    }

    async fn load(
        &self,
        loc: &Location,
        snapshot: Option<&str>,
    ) -> Result<Option<DataWithMetadata>> {
        let state = self.state.lock().expect("backend state poisoned");
        Ok(state.version_view(loc, snapshot).map(|(data, metadata)| {
            DataWithMetadata {
                data: DataStream::from_bytes(data),
                metadata,
            }
        }))
    }

    async fn get_metadata(
        &self,
        loc: &Location,
        snapshot: Option<&str>,
    ) -> Result<Option<Metadata>> {
        let state = self.state.lock().expect("backend state poisoned");
        Ok(state.version_view(loc, snapshot).map(|(_, metadata)| metadata))
    }

    fn find_snapshots(&self, loc: &Location) -> SnapshotStream {
        let state = self.state.lock().expect("backend state poisoned");
        let snapshots: Vec<Result<Snapshot>> = state
            .object(loc)
            .map(|object| {
                object
                    .versions
                    .iter()
                    .map(|v| {
                        Ok(Snapshot {
                            id: v.id.clone(),
                            modified_at: v.modified,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Box::pin(futures::stream::iter(snapshots))
    }

    fn find_files(&self, container: &str, prefix: Option<&str>) -> FileStream {
        let state = self.state.lock().expect("backend state poisoned");
        let mut files: Vec<Result<LocationWithMetadata>> = Vec::new();
        if let Some(objects) = state.containers.get(container) {
            for ((base_path, id), object) in objects {
                if let Some(prefix) = prefix {
                    if !base_path.starts_with(prefix) {
                        continue;
                    }
                }
                // Tombstoned entries are excluded here as backend policy;
                // callers walking other backends may still see them.
                if object.current.is_deleted() {
                    continue;
                }
                let location = match id {
                    Some(id) => Location::with_id(container, base_path.clone(), *id),
                    None => Location::new(container, base_path.clone()),
                };
                files.push(Ok(LocationWithMetadata {
                    location,
                    metadata: object.current.clone(),
                }));
            }
        }
        Box::pin(futures::stream::iter(files))
    }

    async fn soft_delete(&self, loc: &Location) -> Result<()> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.check_lease(loc)?;
        if let Some(object) = state
            .containers
            .get_mut(loc.container())
            .and_then(|objects| objects.get_mut(&obj_key(loc)))
        {
            object.current.mark_deleted(Utc::now());
            // The tombstone is a metadata write: version it like one.
            object.current.set_etag(Uuid::new_v4().to_string());
            tracing::debug!(location = %loc, "soft-deleted object");
        }
        Ok(())
    }

    async fn permanent_delete(&self, loc: &Location) -> Result<()> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.check_lease(loc)?;
        if let Some(objects) = state.containers.get_mut(loc.container()) {
            if objects.remove(&obj_key(loc)).is_some() {
                tracing::debug!(location = %loc, "permanently deleted object");
            }
        }
        Ok(())
    }

    async fn lock(&self, loc: &Location) -> Result<Option<Lease>> {
        let mut state = self.state.lock().expect("backend state poisoned");
        let key = lease_key(loc);
        if let Some(lease) = state.leases.get(&key) {
            if lease.expires > Instant::now() {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        state.leases.insert(
            key.clone(),
            LeaseState {
                token: token.clone(),
                expires: Instant::now() + self.lease_ttl,
            },
        );

        let release_state = self.state.clone();
        let release_token = token.clone();
        Ok(Some(Lease::new(loc.clone(), token, move || {
            let mut state = release_state.lock().expect("backend state poisoned");
            if state
                .leases
                .get(&key)
                .map(|l| l.token == release_token)
                .unwrap_or(false)
            {
                state.leases.remove(&key);
            }
        })))
    }

    async fn create_container(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.containers.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.containers.remove(name);
        state.leases.retain(|(container, _, _), _| container != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn loc(path: &str) -> Location {
        Location::new("docs", path)
    }

    async fn save_bytes(backend: &MemoryBackend, loc: &Location, bytes: &str) -> Metadata {
        backend
            .save(loc, DataStream::from_bytes(bytes.to_string()), &Metadata::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_populates_reserved_keys() {
        let backend = MemoryBackend::new();
        let mut meta = Metadata::new();
        meta.set("owner", "tests");

        let stored = backend
            .save(&loc("a"), DataStream::from_bytes("hello"), &meta)
            .await
            .unwrap();
        assert_eq!(stored.get("owner"), Some("tests"));
        assert_eq!(stored.content_length(), Some(5));
        assert_eq!(stored.size(), Some(5));
        assert!(stored.modified().is_some());
        assert!(stored.etag().is_some());
        assert!(stored.snapshot().is_some());

        let loaded = backend.load(&loc("a"), None).await.unwrap().unwrap();
        assert_eq!(loaded.metadata, stored);
        assert_eq!(&loaded.data.read_to_bytes().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_load_absent_is_none() {
        let backend = MemoryBackend::new();
        assert!(backend.load(&loc("missing"), None).await.unwrap().is_none());
        assert!(backend
            .get_metadata(&loc("missing"), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_optimistic_write_matrix() {
        let backend = MemoryBackend::new();
        let location = loc("counter");

        // Create-if-absent succeeds only when nothing exists.
        let created = backend
            .try_optimistic_write(&location, DataStream::from_bytes("1"), &Metadata::new())
            .await
            .unwrap()
            .expect("first create");

        // Create again without an etag: the object now exists.
        assert!(backend
            .try_optimistic_write(&location, DataStream::from_bytes("2"), &Metadata::new())
            .await
            .unwrap()
            .is_none());

        // Update with the current etag succeeds and rolls the etag.
        let updated = backend
            .try_optimistic_write(&location, DataStream::from_bytes("2"), &created)
            .await
            .unwrap()
            .expect("conditional update");
        assert_ne!(created.etag(), updated.etag());

        // The superseded etag is now stale.
        assert!(backend
            .try_optimistic_write(&location, DataStream::from_bytes("3"), &created)
            .await
            .unwrap()
            .is_none());

        let loaded = backend.load(&location, None).await.unwrap().unwrap();
        assert_eq!(&loaded.data.read_to_bytes().await.unwrap()[..], b"2");
    }

    #[tokio::test]
    async fn test_snapshots_accumulate_and_resolve() {
        let backend = MemoryBackend::new();
        let location = loc("versioned");

        let first = save_bytes(&backend, &location, "one").await;
        let second = save_bytes(&backend, &location, "two").await;
        assert_ne!(first.snapshot(), second.snapshot());

        let snapshots: Vec<Snapshot> = backend
            .find_snapshots(&location)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);

        let old = backend
            .load(&location, first.snapshot())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&old.data.read_to_bytes().await.unwrap()[..], b"one");

        let current = backend.load(&location, None).await.unwrap().unwrap();
        assert_eq!(&current.data.read_to_bytes().await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_snapshots() {
        let backend = MemoryBackend::new();
        let location = loc("doomed");
        let stored = save_bytes(&backend, &location, "payload").await;

        backend.soft_delete(&location).await.unwrap();

        // The backend surfaces the tombstone; it does not hide the object.
        let current = backend.load(&location, None).await.unwrap().unwrap();
        assert!(current.metadata.is_deleted());

        // Snapshot metadata predates the tombstone.
        let snap = backend
            .load(&location, stored.snapshot())
            .await
            .unwrap()
            .unwrap();
        assert!(!snap.metadata.is_deleted());
        assert_eq!(&snap.data.read_to_bytes().await.unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn test_permanent_delete_removes_snapshots() {
        let backend = MemoryBackend::new();
        let location = loc("gone");
        let stored = save_bytes(&backend, &location, "payload").await;

        backend.permanent_delete(&location).await.unwrap();
        assert!(backend.load(&location, None).await.unwrap().is_none());
        assert!(backend
            .load(&location, stored.snapshot())
            .await
            .unwrap()
            .is_none());
        let snapshots: Vec<Snapshot> = backend
            .find_snapshots(&location)
            .try_collect()
            .await
            .unwrap();
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_find_files_prefix_and_tombstones() {
        let backend = MemoryBackend::new();
        save_bytes(&backend, &Location::new("docs", "reports/a"), "a").await;
        save_bytes(&backend, &Location::with_id("docs", "reports/b", 7), "b").await;
        save_bytes(&backend, &Location::new("docs", "drafts/c"), "c").await;
        save_bytes(&backend, &Location::new("docs", "reports/dead"), "d").await;
        backend
            .soft_delete(&Location::new("docs", "reports/dead"))
            .await
            .unwrap();

        let mut found: Vec<String> = backend
            .find_files("docs", Some("reports/"))
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.location.to_string())
            .collect();
        found.sort();
        assert_eq!(found, ["docs:reports/a", "docs:reports/b/7"]);

        let all: Vec<LocationWithMetadata> = backend
            .find_files("docs", None)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_lock_excludes_and_releases() {
        let backend = MemoryBackend::new();
        let location = loc("guarded");

        let lease = backend.lock(&location).await.unwrap().expect("first lease");
        assert!(backend.lock(&location).await.unwrap().is_none());

        let refused = backend
            .save(&location, DataStream::from_bytes("x"), &Metadata::new())
            .await;
        assert!(matches!(refused, Err(Error::Locked(_))));

        lease.release();
        assert!(backend.lock(&location).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_expires() {
        let backend = MemoryBackend::with_lease_ttl(Duration::ZERO);
        let location = loc("transient");
        let _lease = backend.lock(&location).await.unwrap().expect("lease");
        // TTL zero: the lease is already expired for all observers.
        assert!(backend.lock(&location).await.unwrap().is_some());
        save_bytes(&backend, &location, "fine").await;
    }

    #[tokio::test]
    async fn test_delete_container() {
        let backend = MemoryBackend::new();
        save_bytes(&backend, &loc("a"), "a").await;
        backend.delete_container("docs").await.unwrap();
        assert!(backend.load(&loc("a"), None).await.unwrap().is_none());
        let files: Vec<_> = backend.find_files("docs", None).try_collect().await.unwrap();
        assert!(files.is_empty());
    }
}
