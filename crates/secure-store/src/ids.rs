use std::sync::Arc;

use blobstore::{BlobBackend, DataStream, Location, Metadata};

use crate::{Error, Result};

const DEFAULT_RANGE_SIZE: i64 = 10;
const MAX_ATTEMPTS: usize = 25;

/// Crash-safe unique ID allocator backed by a counter blob.
///
/// The counter blob holds the highest ID allocated so far as a plain UTF-8
/// decimal integer (0 when absent). Each instance claims contiguous ranges of
/// `range_size` IDs via conditional writes, so IDs are unique across every
/// process sharing the backend; a local mutex serializes in-process callers.
///
/// The generator writes through the backend directly — never through the
/// secure store's codec path — so the counter is always stored in plaintext
/// and is readable by every allocator regardless of store configuration.
pub struct UniqueIdGenerator {
    backend: Arc<dyn BlobBackend>,
    counter: Location,
    range_size: i64,
    state: tokio::sync::Mutex<Range>,
}

struct Range {
    next: i64,
    last: i64,
}

impl UniqueIdGenerator {
    pub fn new(backend: Arc<dyn BlobBackend>, counter: Location) -> Self {
        Self::with_range_size(backend, counter, DEFAULT_RANGE_SIZE)
    }

    pub fn with_range_size(
        backend: Arc<dyn BlobBackend>,
        counter: Location,
        range_size: i64,
    ) -> Self {
        assert!(range_size > 0, "range_size must be positive");
        UniqueIdGenerator {
            backend,
            counter,
            range_size,
            // next > last: no range claimed yet.
            state: tokio::sync::Mutex::new(Range { next: 1, last: 0 }),
        }
    }

    pub fn counter_location(&self) -> &Location {
        &self.counter
    }

    /// The next unique ID, claiming a fresh range from the counter blob when
    /// the current one is exhausted.
    pub async fn next_id(&self) -> Result<i64> {
        let mut state = self.state.lock().await;
        if state.next <= state.last {
            let id = state.next;
            state.next += 1;
            return Ok(id);
        }

        for attempt in 0..MAX_ATTEMPTS {
            let (current, meta) = self.read_counter().await?;
            let new_max = current + self.range_size;

            let body = DataStream::from_bytes(new_max.to_string());
            match self
                .backend
                .try_optimistic_write(&self.counter, body, &meta)
                .await?
            {
                Some(_) => {
                    tracing::debug!(
                        counter = %self.counter,
                        claimed_from = current + 1,
                        claimed_to = new_max,
                        "claimed id range"
                    );
                    state.next = current + 2;
                    state.last = new_max;
                    return Ok(current + 1);
                }
                None => {
                    tracing::debug!(counter = %self.counter, attempt, "counter contention, retrying");
                }
            }
        }
        Err(Error::RangeAllocation {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Current counter value and its metadata. An absent counter reads as 0
    /// with empty metadata, so the claiming write is a create-if-absent.
    async fn read_counter(&self) -> Result<(i64, Metadata)> {
        match self.backend.load(&self.counter, None).await? {
            None => Ok((0, Metadata::new())),
            Some(loaded) => {
                let meta = loaded.metadata;
                let bytes = loaded.data.read_to_bytes().await?;
                let value = std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| Error::CorruptCounter {
                        location: self.counter.clone(),
                    })?;
                Ok((value, meta))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobstore::MemoryBackend;

    fn generator(backend: Arc<dyn BlobBackend>, range_size: i64) -> UniqueIdGenerator {
        UniqueIdGenerator::with_range_size(
            backend,
            Location::new("system", "counters/docs"),
            range_size,
        )
    }

    #[tokio::test]
    async fn test_sequential_ids_and_counter_value() {
        let backend: Arc<dyn BlobBackend> = Arc::new(MemoryBackend::new());
        let ids = generator(backend.clone(), 10);

        for expect in 1..=25 {
            assert_eq!(ids.next_id().await.unwrap(), expect);
        }

        // Three range claims of 10: the counter holds 30, in plaintext.
        let counter = backend
            .load(&Location::new("system", "counters/docs"), None)
            .await
            .unwrap()
            .expect("counter exists");
        let bytes = counter.data.read_to_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"30");
    }

    #[tokio::test]
    async fn test_ranges_do_not_overlap_across_instances() {
        let backend: Arc<dyn BlobBackend> = Arc::new(MemoryBackend::new());
        let a = generator(backend.clone(), 5);
        let b = generator(backend.clone(), 5);

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(a.next_id().await.unwrap());
            seen.push(b.next_id().await.unwrap());
        }
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), seen.len(), "duplicate ids: {:?}", seen);
        assert!(seen.iter().all(|id| *id >= 1));
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_an_error() {
        let backend: Arc<dyn BlobBackend> = Arc::new(MemoryBackend::new());
        let counter = Location::new("system", "counters/docs");
        backend
            .save(
                &counter,
                DataStream::from_bytes("not-a-number"),
                &Metadata::new(),
            )
            .await
            .unwrap();

        let ids = generator(backend, 10);
        assert!(matches!(
            ids.next_id().await,
            Err(Error::CorruptCounter { .. })
        ));
    }
}
