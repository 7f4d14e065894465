//! Disk-backed cache storage
//!
//! Layout under the store root:
//! - `<generation>/meta.json`: generation name, store format, creation stamp
//! - `<generation>/entries/<xxh3(key)>.entry`: one JSON header line followed
//!   by the raw response body
//!
//! Every entry is written to a temporary file and renamed into place, so a
//! reader sees either the previous entry or the new one.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::core::util::{hash_bytes, HashAlgorithm};
use crate::host::http::{Headers, Method, Request, Response};
use crate::host::{Cache, CacheStorage, StorageError};

pub const META_FILE: &str = "meta.json";
pub const ENTRIES_DIR: &str = "entries";
const ENTRY_EXT: &str = "entry";

/// On-disk format version
pub const STORE_VERSION: &str = "1";

/// Generation names usable verbatim as directory names
static SAFE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("Invalid SAFE_NAME_RE regex"));

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generation metadata stored in `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// Generation name as given to `open`
    pub generation: String,

    /// Store format version
    pub store_version: String,

    /// Version of the tool that created the generation
    pub created_by: String,

    /// Creation stamp; also identifies this incarnation of the generation
    pub created_at: String,
}

impl GenerationMeta {
    pub fn new(generation: &str) -> Self {
        Self {
            generation: generation.to_string(),
            store_version: STORE_VERSION.to_string(),
            created_by: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

/// Header line of an entry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub cached_at: DateTime<Utc>,
    pub size: u64,
    /// SHA-1 of the body
    pub digest: String,
}

/// Directory name for a generation
pub fn generation_dir_name(name: &str) -> String {
    if SAFE_NAME_RE.is_match(name) {
        name.to_string()
    } else {
        format!("g-{}", hash_bytes(name.as_bytes(), HashAlgorithm::Xxh3))
    }
}

fn entry_file_name(key: &str) -> String {
    format!(
        "{}.{}",
        hash_bytes(key.as_bytes(), HashAlgorithm::Xxh3),
        ENTRY_EXT
    )
}

async fn read_meta(dir: &Path) -> Result<Option<GenerationMeta>, StorageError> {
    match fs::read(dir.join(META_FILE)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to `path` through a uniquely named temporary file
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Split an entry file into its header and body
fn decode_entry(bytes: &[u8]) -> Result<(StoredEntry, Vec<u8>), StorageError> {
    let split = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let entry: StoredEntry = serde_json::from_slice(&bytes[..split])?;
    let body = bytes.get(split + 1..).unwrap_or_default().to_vec();
    Ok((entry, body))
}

/// Read every entry header of a generation directory
pub async fn read_entries(dir: &Path) -> Result<Vec<StoredEntry>, StorageError> {
    let entries_dir = dir.join(ENTRIES_DIR);
    let mut read_dir = match fs::read_dir(&entries_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    while let Some(item) = read_dir.next_entry().await? {
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
            continue;
        }
        match fs::read(&path).await {
            Ok(bytes) => entries.push(decode_entry(&bytes)?.0),
            // Replaced or removed between listing and reading
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    entries.sort_by(|a, b| a.url.cmp(&b.url));
    Ok(entries)
}

/// One generation directory
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    created_at: String,
}

impl DiskCache {
    /// Fail if the generation this handle was opened on has since been deleted
    async fn ensure_live(&self) -> Result<(), StorageError> {
        match read_meta(&self.dir).await? {
            Some(meta) if meta.created_at == self.created_at => Ok(()),
            _ => Err(StorageError::Unavailable(format!(
                "generation at {} was deleted",
                self.dir.display()
            ))),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(ENTRIES_DIR).join(entry_file_name(key))
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn lookup(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        if request.method != Method::Get {
            return Ok(None);
        }
        let key = request.cache_key();
        let bytes = match fs::read(self.entry_path(&key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (entry, body) = decode_entry(&bytes)?;
        if entry.url != key {
            debug!(url = %key, stored = %entry.url, "entry hash collision, treating as miss");
            return Ok(None);
        }
        Ok(Some(Response {
            status: entry.status,
            status_text: entry.status_text,
            headers: entry.headers,
            body,
        }))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), StorageError> {
        if request.method != Method::Get {
            return Err(StorageError::UnsupportedMethod(request.method.to_string()));
        }
        self.ensure_live().await?;

        let key = request.cache_key();
        let entry = StoredEntry {
            url: key.clone(),
            method: request.method.to_string(),
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            cached_at: Utc::now(),
            size: response.body.len() as u64,
            digest: hash_bytes(&response.body, HashAlgorithm::Sha1),
        };
        let mut contents = serde_json::to_vec(&entry)?;
        contents.push(b'\n');
        contents.extend_from_slice(&response.body);

        let path = self.entry_path(&key);
        fs::create_dir_all(self.dir.join(ENTRIES_DIR)).await?;
        write_atomic(&path, &contents).await?;

        // The generation may have been deleted while the entry was written
        if let Err(e) = self.ensure_live().await {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool, StorageError> {
        if request.method != Method::Get {
            return Ok(false);
        }
        match fs::remove_file(self.entry_path(&request.cache_key())).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(read_entries(&self.dir)
            .await?
            .into_iter()
            .map(|e| e.url)
            .collect())
    }
}

/// Generations stored as directories under a root
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(generation_dir_name(name))
    }

    /// Metadata and entry headers of a generation, if it exists
    pub async fn inspect(
        &self,
        name: &str,
    ) -> Result<Option<(GenerationMeta, Vec<StoredEntry>)>, StorageError> {
        let dir = self.generation_dir(name);
        match read_meta(&dir).await? {
            Some(meta) => Ok(Some((meta, read_entries(&dir).await?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, StorageError> {
        let dir = self.generation_dir(name);
        let meta = match read_meta(&dir).await? {
            Some(meta) => meta,
            None => {
                // Entries left behind by a write that raced a delete
                match fs::remove_dir_all(dir.join(ENTRIES_DIR)).await {
                    Ok(()) => debug!(generation = name, "removed orphaned entries"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                fs::create_dir_all(dir.join(ENTRIES_DIR)).await?;
                let meta = GenerationMeta::new(name);
                write_atomic(&dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?).await?;
                debug!(generation = name, dir = %dir.display(), "created cache generation");
                meta
            }
        };
        Ok(Arc::new(DiskCache {
            dir,
            created_at: meta.created_at,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(read_meta(&self.generation_dir(name)).await?.is_some())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.generation_dir(name);
        if read_meta(&dir).await?.is_none() {
            return Ok(false);
        }
        // Drop the meta first so open handles stop writing before the tree goes
        fs::remove_file(dir.join(META_FILE)).await?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut read_dir = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(meta) = read_meta(&item.path()).await? {
                names.push(meta.generation);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use url::Url;

    fn req(path: &str) -> Request {
        Request::get(Url::parse("http://localhost:8080").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_generation_dir_name() {
        assert_eq!(generation_dir_name("pupu-cosmos-v1"), "pupu-cosmos-v1");
        assert_eq!(generation_dir_name("v1.2"), "v1.2");
        assert!(generation_dir_name("../escape").starts_with("g-"));
        assert!(generation_dir_name(".hidden").starts_with("g-"));
        assert!(generation_dir_name("with space").starts_with("g-"));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp = tempdir().unwrap();
        {
            let storage = DiskCacheStorage::new(temp.path());
            let cache = storage.open("v1").await.unwrap();
            cache
                .put(
                    &req("/style.css"),
                    Response::new(200, "body { }\nh1 { }").with_header("Content-Type", "text/css"),
                )
                .await
                .unwrap();
        }

        let storage = DiskCacheStorage::new(temp.path());
        assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
        let cache = storage.open("v1").await.unwrap();
        let hit = cache.lookup(&req("/style.css")).await.unwrap().unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, b"body { }\nh1 { }");
        assert_eq!(hit.headers.get("content-type"), Some("text/css"));
    }

    #[tokio::test]
    async fn test_delete_generation_removes_directory() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());
        storage.open("old").await.unwrap();
        storage.open("new").await.unwrap();

        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.generation_dir("old").exists());
        assert_eq!(storage.keys().await.unwrap(), vec!["new"]);
        assert!(!storage.delete("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_write_after_delete() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());
        let stale = storage.open("v1").await.unwrap();
        storage.delete("v1").await.unwrap();

        let err = stale.put(&req("/a.js"), Response::new(200, "x")).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));

        let fresh = storage.open("v1").await.unwrap();
        assert!(fresh.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_discards_orphaned_entries() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());
        let cache = storage.open("v1").await.unwrap();
        cache.put(&req("/a.js"), Response::new(200, "x")).await.unwrap();

        // A write that lost the race leaves entries without meta.json
        fs::remove_file(storage.generation_dir("v1").join(META_FILE))
            .await
            .unwrap();
        assert!(!storage.has("v1").await.unwrap());

        let fresh = storage.open("v1").await.unwrap();
        assert!(fresh.keys().await.unwrap().is_empty());
        assert!(fresh.lookup(&req("/a.js")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_put_racing_delete_never_resurrects_entry() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());

        for round in 0..100 {
            let stale = storage.open("v1").await.unwrap();
            let url = format!("/race-{}.js", round);
            let put = {
                let request = req(&url);
                tokio::spawn(async move { stale.put(&request, Response::new(200, "x")).await })
            };
            let delete = {
                let storage = storage.clone();
                tokio::spawn(async move { storage.delete("v1").await })
            };
            let _ = put.await.unwrap();
            let _ = delete.await.unwrap();

            assert!(!storage.has("v1").await.unwrap());
            let fresh = storage.open("v1").await.unwrap();
            assert!(
                fresh.keys().await.unwrap().is_empty(),
                "round {} brought a deleted entry back",
                round
            );
            storage.delete("v1").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_inspect_reports_digest_and_size() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());
        let cache = storage.open("v1").await.unwrap();
        cache.put(&req("/logo.png"), Response::new(200, "png")).await.unwrap();

        let (meta, entries) = storage.inspect("v1").await.unwrap().unwrap();
        assert_eq!(meta.generation, "v1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "http://localhost:8080/logo.png");
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[0].digest.len(), 40);
        assert!(storage.inspect("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_entry_and_non_get() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path());
        let cache = storage.open("v1").await.unwrap();
        cache.put(&req("/a.js"), Response::new(200, "x")).await.unwrap();

        let head = req("/a.js").with_method(Method::Head);
        assert!(cache.lookup(&head).await.unwrap().is_none());
        assert!(cache.put(&head, Response::new(200, "x")).await.is_err());

        assert!(cache.delete(&req("/a.js")).await.unwrap());
        assert!(!cache.delete(&req("/a.js")).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_on_missing_root() {
        let temp = tempdir().unwrap();
        let storage = DiskCacheStorage::new(temp.path().join("nope"));
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
