use std::fmt;

/// Address of an object: a container, an opaque base path, and an optional
/// 64-bit id appended to the key. No path-separator convention is assumed;
/// the backend treats keys as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    container: String,
    base_path: String,
    id: Option<i64>,
}

impl Location {
    pub fn new(container: impl Into<String>, base_path: impl Into<String>) -> Self {
        Location {
            container: container.into(),
            base_path: base_path.into(),
            id: None,
        }
    }

    pub fn with_id(container: impl Into<String>, base_path: impl Into<String>, id: i64) -> Self {
        Location {
            container: container.into(),
            base_path: base_path.into(),
            id: Some(id),
        }
    }

    /// The same base path, re-addressed with `id`.
    pub fn at_id(&self, id: i64) -> Self {
        Location {
            container: self.container.clone(),
            base_path: self.base_path.clone(),
            id: Some(id),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.base_path)?;
        if let Some(id) = self.id {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}
