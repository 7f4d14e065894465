//! Host module - Collaborators the worker relies on but does not own
//!
//! Provides:
//! - http: Request/response values
//! - CacheStorage / Cache: named, isolated key-response stores
//! - Network: the transport used on cache misses
//! - memory: in-process storage
//! - disk: persistent storage under a store directory
//! - site: a network serving a local site directory

pub mod disk;
pub mod http;
pub mod memory;
pub mod site;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::host::http::{Request, Response};

/// Failure of the network transport (the request never produced a response)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("network unreachable: {0}")]
    Unreachable(String),

    #[error("request to {url} was refused: {reason}")]
    Refused { url: String, reason: String },

    #[error("failed to read {url}: {message}")]
    Io { url: String, message: String },
}

/// Failure of the cache storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request method {0} is not supported by the cache")]
    UnsupportedMethod(String),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("pre-population of {url} failed: {reason}")]
    AddFailed { url: String, reason: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A single cache generation
///
/// Only `GET` requests are matched or stored; entries are keyed by
/// [`Request::cache_key`] and replaced wholesale on `put`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Find the stored response for a request
    async fn lookup(&self, request: &Request) -> Result<Option<Response>, StorageError>;

    /// Store a response, replacing any previous entry for the same key
    async fn put(&self, request: &Request, response: Response) -> Result<(), StorageError>;

    /// Remove an entry, returning whether one existed
    #[allow(dead_code)]
    async fn delete(&self, request: &Request) -> Result<bool, StorageError>;

    /// Cache keys currently stored, sorted
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Registry of named cache generations
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, StorageError>;

    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// Delete a generation, returning whether it existed
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of all existing generations, sorted
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Network transport
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Shared handle types used across the worker
pub type DynStorage = Arc<dyn CacheStorage>;
pub type DynNetwork = Arc<dyn Network>;
