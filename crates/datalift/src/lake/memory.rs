//! In-memory object store
//!
//! Used by tests and `--dry-run` invocations; behaves like the S3 store
//! (overwrite-on-put, sorted listing, not-found on missing keys).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::ObjectStore;
use datalift_common::{DataliftError, Result};

#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| DataliftError::storage("memory store mutex poisoned"))
    }

    pub fn object_count(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        self.lock()?.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| DataliftError::ObjectNotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
