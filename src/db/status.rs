//! Status snapshot persistence.

use super::models::StatusCollection;
use super::registry::STATUS_KEY;
use super::store::{DbError, KeyValueStore};

use std::sync::Arc;

/// Loads and saves the single status record.
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn KeyValueStore>,
}

impl StatusStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The persisted snapshot, or `None` before the first cycle.
    pub fn load(&self) -> Result<Option<StatusCollection>, DbError> {
        match self.store.get(STATUS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| DbError::Serialization {
                    key: STATUS_KEY.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn save(&self, status: &StatusCollection) -> Result<(), DbError> {
        let raw = serde_json::to_string(status).map_err(|source| DbError::Serialization {
            key: STATUS_KEY.to_string(),
            source,
        })?;
        self.store.put(STATUS_KEY, &raw)?;
        tracing::debug!("Status: saved {} entries", status.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_missing_then_save() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let status_store = StatusStore::new(store.clone());

        assert!(status_store.load().unwrap().is_none());

        let mut status = StatusCollection::from_urls(["https://a.example"]);
        status.get_or_insert("https://a.example").record_failure(42);
        status_store.save(&status).unwrap();

        let loaded = status_store.load().unwrap().unwrap();
        assert_eq!(loaded, status);
        assert_eq!(
            store.get(STATUS_KEY).unwrap().as_deref(),
            Some(r#"{"urls":[{"name":"https://a.example","last_failed":"42"}]}"#)
        );
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let store = Arc::new(Store::new(":memory:").unwrap());
        store.put(STATUS_KEY, "{").unwrap();
        let err = StatusStore::new(store).load().unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
    }
}
