use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Reserved metadata keys. These are stable on the wire: renaming any of them
/// changes what stored objects mean.
pub mod keys {
    /// Present iff the payload bytes are compressed; value is the algorithm.
    pub const COMPRESSION: &str = "compression";
    /// Present iff the payload bytes are encrypted; value is the algorithm.
    pub const ENCRYPTION: &str = "encryption";
    /// Logical type name of a typed object payload.
    pub const TYPE: &str = "type";
    /// Backend-populated payload byte length.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Backend-populated last-modified timestamp (RFC 3339).
    pub const MODIFIED: &str = "modified";
    /// Backend-populated stored size.
    pub const SIZE: &str = "size";
    /// Tombstone timestamp. An object carrying this key is logically deleted
    /// even though its bytes remain.
    pub const DELETED: &str = "leodeleted";
}

/// String-to-string object metadata.
///
/// Entries preserve insertion order for deterministic emission. The backend
/// version token (`etag`) and point-in-time identifier (`snapshot`) are
/// first-class fields rather than entries, and do not participate in
/// equality: two metadata are equal iff their entry sets are.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: IndexMap<String, String>,
    etag: Option<String>,
    snapshot: Option<String>,
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Metadata {}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn entries(&self) -> &IndexMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opaque version token from the most recent write.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: impl Into<String>) {
        self.etag = Some(etag.into());
    }

    /// Point-in-time identifier of the version this metadata describes.
    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    pub fn set_snapshot(&mut self, snapshot: impl Into<String>) {
        self.snapshot = Some(snapshot.into());
    }

    pub fn compression(&self) -> Option<&str> {
        self.get(keys::COMPRESSION)
    }

    pub fn set_compression(&mut self, algorithm: &str) {
        self.set(keys::COMPRESSION, algorithm);
    }

    pub fn encryption(&self) -> Option<&str> {
        self.get(keys::ENCRYPTION)
    }

    pub fn set_encryption(&mut self, algorithm: &str) {
        self.set(keys::ENCRYPTION, algorithm);
    }

    pub fn type_name(&self) -> Option<&str> {
        self.get(keys::TYPE)
    }

    pub fn set_type_name(&mut self, name: &str) {
        self.set(keys::TYPE, name);
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(keys::CONTENT_LENGTH).and_then(|v| v.parse().ok())
    }

    pub fn size(&self) -> Option<u64> {
        self.get(keys::SIZE).and_then(|v| v.parse().ok())
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.get(keys::MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Tombstone timestamp, if the object is logically deleted.
    pub fn deleted(&self) -> Option<&str> {
        self.get(keys::DELETED)
    }

    pub fn is_deleted(&self) -> bool {
        self.contains(keys::DELETED)
    }

    pub fn mark_deleted(&mut self, when: DateTime<Utc>) {
        self.set(keys::DELETED, when.to_rfc3339());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            etag: None,
            snapshot: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_order_and_versions() {
        let mut a = Metadata::new();
        a.set("one", "1");
        a.set("two", "2");

        let mut b = Metadata::new();
        b.set("two", "2");
        b.set("one", "1");
        b.set_etag("abc");
        b.set_snapshot("snap");

        assert_eq!(a, b);
        b.set("three", "3");
        assert_ne!(a, b);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut m = Metadata::new();
        m.set("z", "1");
        m.set("a", "2");
        m.set("m", "3");
        let order: Vec<_> = m.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(order, ["z", "a", "m"]);
    }

    #[test]
    fn test_typed_accessors() {
        let mut m = Metadata::new();
        m.set_compression("gzip");
        m.set_encryption("xchacha20poly1305");
        m.set(keys::CONTENT_LENGTH, "1024");
        assert_eq!(m.compression(), Some("gzip"));
        assert_eq!(m.encryption(), Some("xchacha20poly1305"));
        assert_eq!(m.content_length(), Some(1024));
        assert!(!m.is_deleted());

        m.mark_deleted(Utc::now());
        assert!(m.is_deleted());
        assert!(m.deleted().is_some());

        m.remove(keys::COMPRESSION);
        assert_eq!(m.compression(), None);
    }
}
