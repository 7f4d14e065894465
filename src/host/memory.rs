//! In-process cache storage

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::host::http::{Method, Request, Response};
use crate::host::{Cache, CacheStorage, StorageError};

/// One generation held in memory
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Response>>,
}

impl MemoryCache {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Response>> {
        // A poisoned map still holds whole entries; puts never leave one half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn lookup(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        if request.method != Method::Get {
            return Ok(None);
        }
        Ok(self.entries().get(&request.cache_key()).cloned())
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), StorageError> {
        if request.method != Method::Get {
            return Err(StorageError::UnsupportedMethod(request.method.to_string()));
        }
        self.entries().insert(request.cache_key(), response);
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool, StorageError> {
        if request.method != Method::Get {
            return Ok(false);
        }
        Ok(self.entries().remove(&request.cache_key()).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Generations keyed by name, all in memory
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<BTreeMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn caches(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<MemoryCache>>> {
        self.caches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, StorageError> {
        let cache = self
            .caches()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches().contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches().remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.caches().keys().cloned().collect())
    }
}
