//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryObjectStore`, which satisfies the [`ObjectStore`] contract
//! without any external dependencies and records the order of operations.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{ComstarError, Result};
use crate::push::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    log: Vec<StoreOp>,
    fail_on: Option<String>,
}

/// In-memory object store backed by a `BTreeMap<key, object>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `key` fail with a storage error.
    pub fn failing_on(key: &str) -> Self {
        let store = Self::default();
        store.lock().fail_on = Some(key.to_string());
        store
    }

    /// Pre-populate an object, bypassing the operation log.
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Operations in the order they completed.
    pub fn log(&self) -> Vec<StoreOp> {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.lock().fail_on.as_deref() == Some(key) {
            return Err(ComstarError::Storage(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, local_file: &Path, content_type: &str) -> Result<()> {
        self.check(key)?;
        let data = tokio::fs::read(local_file).await?;
        let mut state = self.lock();
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        state.log.push(StoreOp::Put(key.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(key)?;
        let mut state = self.lock();
        state.objects.remove(key);
        state.log.push(StoreOp::Delete(key.to_string()));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
