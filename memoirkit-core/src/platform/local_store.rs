//! Host memory library trait.

use crate::error::BackupResult;
use crate::types::MemoryRecord;

/// Selects which records a backup includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    /// Include archived memories.
    pub include_archived: bool,
    /// Keep only records carrying at least one of these tags. `None` keeps all.
    pub tags: Option<Vec<String>>,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            include_archived: true,
            tags: None,
        }
    }
}

impl ItemFilter {
    /// Returns `true` if `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if record.archived && !self.include_archived {
            return false;
        }
        self.tags
            .as_ref()
            .is_none_or(|wanted| record.tags.iter().any(|tag| wanted.contains(tag)))
    }
}

/// The host's on-device memory library.
///
/// Restores write through `put_item`; the pipeline decides conflicts before
/// calling it, so implementations should simply upsert by `id`.
pub trait LocalStore: Send + Sync {
    /// Lists records passing `filter`.
    ///
    /// Implementations may ignore the filter and return everything; the
    /// backup pipeline re-applies it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] if the library cannot be read.
    fn list_items(&self, filter: &ItemFilter) -> BackupResult<Vec<MemoryRecord>>;

    /// Reads one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] if the library cannot be read.
    fn get_item(&self, id: &str) -> BackupResult<Option<MemoryRecord>>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] if the write fails.
    fn put_item(&self, record: &MemoryRecord) -> BackupResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(archived: bool, tags: &[&str]) -> MemoryRecord {
        MemoryRecord {
            id: "r".to_string(),
            title: String::new(),
            payload_ref: String::new(),
            updated_at: 0,
            tags: tags.iter().map(ToString::to_string).collect(),
            archived,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_default_filter_keeps_everything() {
        let filter = ItemFilter::default();
        assert!(filter.matches(&record(true, &[])));
        assert!(filter.matches(&record(false, &["family"])));
    }

    #[test]
    fn test_filter_drops_archived() {
        let filter = ItemFilter {
            include_archived: false,
            tags: None,
        };
        assert!(!filter.matches(&record(true, &[])));
        assert!(filter.matches(&record(false, &[])));
    }

    #[test]
    fn test_filter_requires_any_tag() {
        let filter = ItemFilter {
            include_archived: true,
            tags: Some(vec!["family".to_string(), "travel".to_string()]),
        };
        assert!(filter.matches(&record(false, &["travel", "1970s"])));
        assert!(!filter.matches(&record(false, &["work"])));
        assert!(!filter.matches(&record(false, &[])));
    }
}
