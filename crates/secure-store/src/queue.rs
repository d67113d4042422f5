use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;

use blobstore::{Location, Metadata};

/// Transport seam for post-write notifications.
///
/// Delivery is at-least-once: the store retries nothing itself, but a failed
/// send is surfaced to the caller after the payload is already durable, so
/// callers re-drive the notification, not the write.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()>;
}

/// The canonical notification payload. Field names are the wire contract and
/// serialize in PascalCase.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueMessage {
    pub container: String,
    pub base_path: String,
    pub id: Option<i64>,
    pub metadata: IndexMap<String, String>,
}

impl QueueMessage {
    pub fn new(loc: &Location, metadata: &Metadata) -> Self {
        QueueMessage {
            container: loc.container().to_string(),
            base_path: loc.base_path().to_string(),
            id: loc.id(),
            metadata: metadata.entries().clone(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// In-memory queue double: records every payload, optionally refusing sends.
#[derive(Default)]
pub struct MemoryQueue {
    sent: Mutex<Vec<Bytes>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().expect("queue state poisoned").clone()
    }

    /// Sent payloads, decoded from the wire format.
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.sent()
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("payload is wire-format JSON"))
            .collect()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("queue is refusing sends");
        }
        self.sent.lock().expect("queue state poisoned").push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_pascal_case() {
        let mut meta = Metadata::new();
        meta.set("type", "example.Report");
        let msg = QueueMessage::new(&Location::with_id("docs", "reports", 42), &meta);

        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["Container"], "docs");
        assert_eq!(json["BasePath"], "reports");
        assert_eq!(json["Id"], 42);
        assert_eq!(json["Metadata"]["type"], "example.Report");
    }

    #[test]
    fn test_absent_id_is_null() {
        let msg = QueueMessage::new(&Location::new("docs", "reports"), &Metadata::new());
        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert!(json["Id"].is_null());
    }
}
