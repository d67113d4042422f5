use std::sync::Arc;

use anyhow::Context;
use futures::TryStreamExt;
use tokio_util::compat::FuturesAsyncReadCompatExt;

use blobstore::{
    keys, BlobBackend, DataStream, DataWithMetadata, FileStream, Lease, Location, Metadata,
    SnapshotStream,
};
use pipeline::{Codec, Transform, TransformReader};

use crate::{Error, Queue, QueueMessage, Result, SaveOptions, UniqueIdGenerator};

/// A typed object payload: stored as UTF-8 JSON under a logical type name.
///
/// The default name is the Rust type path; applications that need a stable
/// cross-version name override `type_name`. The store treats the name as
/// opaque and compares it for equality on load.
pub trait TypedObject: serde::Serialize + serde::de::DeserializeOwned {
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A deserialized typed object together with its stored metadata.
#[derive(Debug)]
pub struct ObjectWithMetadata<T> {
    pub data: T,
    pub metadata: Metadata,
}

/// The secure store facade.
///
/// Composes codec pipelines over a [`BlobBackend`], enforcing the invariants
/// between stored metadata flags and the byte layout: the `compression` and
/// `encryption` keys are present exactly when the payload bytes are, and
/// reads refuse to hand back bytes they cannot decode.
pub struct SecureStore {
    backend: Arc<dyn BlobBackend>,
    compressor: Option<Arc<dyn Codec>>,
    encryptor: Option<Arc<dyn Codec>>,
    backup_queue: Option<Arc<dyn Queue>>,
    index_queue: Option<Arc<dyn Queue>>,
    ids: Option<UniqueIdGenerator>,
}

pub struct SecureStoreBuilder {
    backend: Arc<dyn BlobBackend>,
    compressor: Option<Arc<dyn Codec>>,
    encryptor: Option<Arc<dyn Codec>>,
    backup_queue: Option<Arc<dyn Queue>>,
    index_queue: Option<Arc<dyn Queue>>,
    id_counter: Option<Location>,
    id_range_size: Option<i64>,
}

impl SecureStoreBuilder {
    pub fn compressor(mut self, codec: Arc<dyn Codec>) -> Self {
        self.compressor = Some(codec);
        self
    }

    pub fn encryptor(mut self, codec: Arc<dyn Codec>) -> Self {
        self.encryptor = Some(codec);
        self
    }

    pub fn backup_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.backup_queue = Some(queue);
        self
    }

    pub fn index_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.index_queue = Some(queue);
        self
    }

    /// Location of the counter blob backing ID generation. The counter is
    /// written through the backend directly and is always plaintext.
    pub fn id_counter(mut self, counter: Location) -> Self {
        self.id_counter = Some(counter);
        self
    }

    pub fn id_range_size(mut self, range_size: i64) -> Self {
        self.id_range_size = Some(range_size);
        self
    }

    pub fn build(self) -> SecureStore {
        let ids = self.id_counter.map(|counter| match self.id_range_size {
            Some(range_size) => {
                UniqueIdGenerator::with_range_size(self.backend.clone(), counter, range_size)
            }
            None => UniqueIdGenerator::new(self.backend.clone(), counter),
        });
        SecureStore {
            backend: self.backend,
            compressor: self.compressor,
            encryptor: self.encryptor,
            backup_queue: self.backup_queue,
            index_queue: self.index_queue,
            ids,
        }
    }
}

/// Re-chunk `data` through a transform: stream -> AsyncRead -> transform ->
/// stream, 8 KiB at a time. The input's release hook rides along inside the
/// wrapped reader and still fires when the returned stream drops.
fn wrap(data: DataStream, transform: Box<dyn Transform>) -> DataStream {
    let reader = TransformReader::new(data.into_async_read(), transform);
    DataStream::new(tokio_util::io::ReaderStream::with_capacity(
        reader.compat(),
        pipeline::CHUNK_SIZE,
    ))
}

impl SecureStore {
    pub fn builder(backend: Arc<dyn BlobBackend>) -> SecureStoreBuilder {
        SecureStoreBuilder {
            backend,
            compressor: None,
            encryptor: None,
            backup_queue: None,
            index_queue: None,
            id_counter: None,
            id_range_size: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Save a payload stream, layering codecs per `options`.
    ///
    /// Returns the final location (with any generated ID) and the stored
    /// metadata. Notifications are sent only after the backend acknowledges
    /// the write; a notification failure surfaces as [`Error::Queue`] with
    /// the payload already durable.
    pub async fn save_data(
        &self,
        loc: &Location,
        data: DataStream,
        meta: &Metadata,
        options: SaveOptions,
    ) -> Result<(Location, Metadata)> {
        let (data, meta) = self.encode(data, meta, options)?;
        let loc = self.resolve_id(loc, options).await?;
        let stored = self.backend.save(&loc, data, &meta).await?;
        tracing::debug!(location = %loc, bytes = stored.content_length(), "saved object");
        self.notify(&loc, &stored, options).await?;
        Ok((loc, stored))
    }

    /// Conditional save: update-if-unchanged when `meta` carries an etag,
    /// create-if-absent when it does not. A lost race is `Ok(None)` — no
    /// error, and no notifications.
    pub async fn save_with_etag(
        &self,
        loc: &Location,
        data: DataStream,
        meta: &Metadata,
        options: SaveOptions,
    ) -> Result<Option<(Location, Metadata)>> {
        let (data, meta) = self.encode(data, meta, options)?;
        let loc = self.resolve_id(loc, options).await?;
        let Some(stored) = self.backend.try_optimistic_write(&loc, data, &meta).await? else {
            tracing::debug!(location = %loc, "optimistic write lost the etag race");
            return Ok(None);
        };
        self.notify(&loc, &stored, options).await?;
        Ok(Some((loc, stored)))
    }

    /// Serialize `object` as UTF-8 JSON and save it under its type name.
    pub async fn save_object<T: TypedObject>(
        &self,
        loc: &Location,
        object: &T,
        meta: &Metadata,
        options: SaveOptions,
    ) -> Result<(Location, Metadata)> {
        let mut meta = meta.clone();
        meta.set_type_name(T::type_name());
        let payload = serde_json::to_vec(object)?;
        self.save_data(loc, DataStream::from_bytes(payload), &meta, options)
            .await
    }

    /// Load and decode a payload stream.
    ///
    /// Tombstoned objects read as absent (snapshot loads ignore the
    /// tombstone). Decoding is gated on the stored metadata: declared
    /// algorithms must match this store's codecs exactly.
    pub async fn load_data(
        &self,
        loc: &Location,
        snapshot: Option<&str>,
    ) -> Result<Option<DataWithMetadata>> {
        let Some(DataWithMetadata { data, metadata }) =
            self.backend.load(loc, snapshot).await?
        else {
            return Ok(None);
        };
        if snapshot.is_none() && metadata.is_deleted() {
            tracing::debug!(location = %loc, "load hit a tombstone");
            // Dropping the stream releases the backend handle.
            drop(data);
            return Ok(None);
        }

        let mut data = data;
        if let Some(stored) = metadata.encryption() {
            let codec = Self::matching_codec("encryption", stored, self.encryptor.as_ref())?;
            data = wrap(data, codec.decoder());
        }
        if let Some(stored) = metadata.compression() {
            let codec = Self::matching_codec("compression", stored, self.compressor.as_ref())?;
            data = wrap(data, codec.decoder());
        }
        Ok(Some(DataWithMetadata { data, metadata }))
    }

    /// Metadata-only read with the same tombstone filtering as `load_data`.
    pub async fn load_metadata(
        &self,
        loc: &Location,
        snapshot: Option<&str>,
    ) -> Result<Option<Metadata>> {
        let Some(metadata) = self.backend.get_metadata(loc, snapshot).await? else {
            return Ok(None);
        };
        if snapshot.is_none() && metadata.is_deleted() {
            return Ok(None);
        }
        Ok(Some(metadata))
    }

    /// Load a typed object, verifying its stored type name first.
    pub async fn load_object<T: TypedObject>(
        &self,
        loc: &Location,
    ) -> Result<Option<ObjectWithMetadata<T>>> {
        let Some(DataWithMetadata { data, metadata }) = self.load_data(loc, None).await? else {
            return Ok(None);
        };
        let found = metadata.type_name().unwrap_or_default();
        if found != T::type_name() {
            return Err(Error::WrongType {
                expected: T::type_name().to_string(),
                found: found.to_string(),
            });
        }
        let bytes = data.read_to_bytes().await?;
        let data = serde_json::from_slice(&bytes)?;
        Ok(Some(ObjectWithMetadata { data, metadata }))
    }

    /// Delete an object: soft (tombstone) under `KEEP_DELETES`, permanent
    /// otherwise. Absent objects are a no-op. Notifications mirror save's,
    /// carrying the metadata read just before the delete.
    pub async fn delete(&self, loc: &Location, options: SaveOptions) -> Result<()> {
        let Some(metadata) = self.backend.get_metadata(loc, None).await? else {
            return Ok(());
        };
        if options.contains(SaveOptions::KEEP_DELETES) {
            self.backend.soft_delete(loc).await?;
        } else {
            self.backend.permanent_delete(loc).await?;
        }
        tracing::debug!(
            location = %loc,
            soft = options.contains(SaveOptions::KEEP_DELETES),
            "deleted object"
        );
        self.notify(loc, &metadata, options).await
    }

    /// Enqueue an index notification for every file under `prefix`.
    ///
    /// Entries are whatever the backend's `find_files` yields — backends that
    /// surface tombstoned entries will produce tombstone messages, and the
    /// index consumer must tolerate them. All sends are attempted; the first
    /// failure is surfaced afterwards.
    pub async fn re_index_all(&self, container: &str, prefix: Option<&str>) -> Result<()> {
        let queue = self
            .index_queue
            .clone()
            .ok_or(Error::NotConfigured("index queue"))?;
        self.notify_all(container, prefix, queue).await
    }

    /// Enqueue a backup notification for every file under `prefix`.
    pub async fn backup_all(&self, container: &str, prefix: Option<&str>) -> Result<()> {
        let queue = self
            .backup_queue
            .clone()
            .ok_or(Error::NotConfigured("backup queue"))?;
        self.notify_all(container, prefix, queue).await
    }

    /// Acquire an exclusive lease on a location. `Ok(None)` when already
    /// held; while held, all writers to the location fail with `Locked`.
    pub async fn lock(&self, loc: &Location) -> Result<Option<Lease>> {
        Ok(self.backend.lock(loc).await?)
    }

    pub fn find_snapshots(&self, loc: &Location) -> SnapshotStream {
        self.backend.find_snapshots(loc)
    }

    pub fn find_files(&self, container: &str, prefix: Option<&str>) -> FileStream {
        self.backend.find_files(container, prefix)
    }

    /// Apply codec layers and reconcile the reserved metadata keys: a key is
    /// present iff the corresponding layer was applied to the bytes, never
    /// left stale from caller-supplied metadata.
    fn encode(
        &self,
        data: DataStream,
        meta: &Metadata,
        options: SaveOptions,
    ) -> Result<(DataStream, Metadata)> {
        let mut meta = meta.clone();
        let mut data = data;
        if options.contains(SaveOptions::COMPRESS) {
            let codec = self
                .compressor
                .as_ref()
                .ok_or(Error::NotConfigured("compressor"))?;
            meta.set_compression(codec.algorithm());
            data = wrap(data, codec.encoder());
        } else {
            meta.remove(keys::COMPRESSION);
        }
        if options.contains(SaveOptions::ENCRYPT) {
            let codec = self
                .encryptor
                .as_ref()
                .ok_or(Error::NotConfigured("encryptor"))?;
            meta.set_encryption(codec.algorithm());
            // Encryption wraps last: outermost in the stored bytes.
            data = wrap(data, codec.encoder());
        } else {
            meta.remove(keys::ENCRYPTION);
        }
        Ok((data, meta))
    }

    fn matching_codec<'a>(
        kind: &'static str,
        stored: &str,
        codec: Option<&'a Arc<dyn Codec>>,
    ) -> Result<&'a Arc<dyn Codec>> {
        match codec {
            Some(codec) if codec.algorithm() == stored => Ok(codec),
            other => Err(Error::AlgorithmMismatch {
                kind,
                stored: stored.to_string(),
                available: other.map(|c| c.algorithm().to_string()),
            }),
        }
    }

    async fn resolve_id(&self, loc: &Location, options: SaveOptions) -> Result<Location> {
        if options.contains(SaveOptions::GENERATE_ID) && loc.id().is_none() {
            let ids = self.ids.as_ref().ok_or(Error::NotConfigured("id generator"))?;
            let id = ids.next_id().await?;
            return Ok(loc.at_id(id));
        }
        Ok(loc.clone())
    }

    /// Send the canonical notification to each queue `options` selects, in
    /// parallel. Every ack is awaited before the first failure is surfaced.
    async fn notify(&self, loc: &Location, meta: &Metadata, options: SaveOptions) -> Result<()> {
        let mut queues: Vec<(&'static str, Arc<dyn Queue>)> = Vec::new();
        if options.contains(SaveOptions::BACKUP) {
            let queue = self
                .backup_queue
                .clone()
                .ok_or(Error::NotConfigured("backup queue"))?;
            queues.push(("backup", queue));
        }
        if options.contains(SaveOptions::INDEX) {
            let queue = self
                .index_queue
                .clone()
                .ok_or(Error::NotConfigured("index queue"))?;
            queues.push(("index", queue));
        }
        if queues.is_empty() {
            return Ok(());
        }

        let payload = QueueMessage::new(loc, meta).to_bytes()?;
        let acks = queues.into_iter().map(|(kind, queue)| {
            let payload = payload.clone();
            async move {
                queue
                    .send(payload)
                    .await
                    .with_context(|| format!("sending {kind} notification"))
                    .map_err(Error::Queue)
            }
        });
        futures::future::join_all(acks)
            .await
            .into_iter()
            .collect::<Result<()>>()
    }

    async fn notify_all(
        &self,
        container: &str,
        prefix: Option<&str>,
        queue: Arc<dyn Queue>,
    ) -> Result<()> {
        let entries: Vec<_> = self
            .backend
            .find_files(container, prefix)
            .try_collect()
            .await
            .map_err(Error::from)?;
        tracing::debug!(container, ?prefix, count = entries.len(), "bulk notification sweep");

        let sends = entries.iter().map(|entry| {
            let queue = queue.clone();
            async move {
                let payload = QueueMessage::new(&entry.location, &entry.metadata).to_bytes()?;
                queue
                    .send(payload)
                    .await
                    .with_context(|| format!("notifying for '{}'", entry.location))
                    .map_err(Error::Queue)
            }
        });
        futures::future::join_all(sends)
            .await
            .into_iter()
            .collect::<Result<()>>()
    }
}
