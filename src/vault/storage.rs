//! Object storage backends

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{now_iso, CareError, Result};
use crate::vault::guess_content_type;

pub const OBJECT_EXISTS: &str = "A file with this name already exists.";

/// Listing entry for one stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Bucket-scoped object storage.
///
/// Paths are `/`-separated and already validated by the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a new object; fails with `Conflict` when the path is taken
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<ObjectInfo>;

    async fn get(&self, path: &str) -> Result<Option<StoredObject>>;

    /// Objects directly under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Move an object; `Conflict` if `to` exists, `NotFound` if `from` is missing
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Remove an object, returning whether it existed
    async fn remove(&self, path: &str) -> Result<bool>;

    /// Remove everything under `prefix`, returning the count
    async fn remove_prefix(&self, prefix: &str) -> Result<u64>;
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Filesystem backend: one directory per bucket
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(storage_root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            root: storage_root.as_ref().join(bucket),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(CareError::BadRequest("Invalid storage path.".into()));
            }
            full.push(segment);
        }
        Ok(full)
    }

    async fn info(&self, path: &str, full: &Path) -> Result<ObjectInfo> {
        let meta = tokio::fs::metadata(full).await?;
        let created = meta.created().or_else(|_| meta.modified()).ok().map(|t| {
            DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true)
        });
        Ok(ObjectInfo {
            name: file_name_of(path).to_string(),
            path: path.to_string(),
            size: meta.len(),
            created_at: created,
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, _content_type: &str) -> Result<ObjectInfo> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // never overwrite
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await;
        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CareError::Conflict(OBJECT_EXISTS.into()))
            }
            Err(e) => return Err(CareError::Storage(e.to_string())),
        };

        use tokio::io::AsyncWriteExt;
        file.write_all(&bytes)
            .await
            .map_err(|e| CareError::Storage(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| CareError::Storage(e.to_string()))?;

        debug!(path = %path, size = bytes.len(), "Stored object");
        self.info(path, &full).await
    }

    async fn get(&self, path: &str) -> Result<Option<StoredObject>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(StoredObject {
                bytes: Bytes::from(data),
                content_type: guess_content_type(file_name_of(path)).to_string(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CareError::Storage(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let dir = self.resolve(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CareError::Storage(e.to_string())),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CareError::Storage(e.to_string()))?
        {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = format!("{}/{}", prefix, name);
            out.push(self.info(&path, &entry.path()).await?);
        }
        Ok(out)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if tokio::fs::try_exists(&target).await? {
            return Err(CareError::Conflict(OBJECT_EXISTS.into()));
        }
        if !tokio::fs::try_exists(&source).await? {
            return Err(CareError::NotFound("File not found.".into()));
        }
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| CareError::Storage(e.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CareError::Storage(e.to_string())),
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let dir = self.resolve(prefix)?;
        let mut removed = 0;
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CareError::Storage(e.to_string())),
            };
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                } else {
                    removed += 1;
                }
            }
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(CareError::Storage(e.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Bytes,
    content_type: String,
    created_at: String,
}

/// In-memory backend for tests and dev mode
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit creation time
    pub async fn put_at(&self, path: &str, bytes: Bytes, created_at: &str) {
        self.objects.write().await.insert(
            path.to_string(),
            MemoryObject {
                content_type: guess_content_type(file_name_of(path)).to_string(),
                bytes,
                created_at: created_at.to_string(),
            },
        );
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

fn memory_info(path: &str, object: &MemoryObject) -> ObjectInfo {
    ObjectInfo {
        name: file_name_of(path).to_string(),
        path: path.to_string(),
        size: object.bytes.len() as u64,
        created_at: Some(object.created_at.clone()),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<ObjectInfo> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(path) {
            return Err(CareError::Conflict(OBJECT_EXISTS.into()));
        }
        let object = MemoryObject {
            bytes,
            content_type: content_type.to_string(),
            created_at: now_iso(),
        };
        let info = memory_info(path, &object);
        objects.insert(path.to_string(), object);
        Ok(info)
    }

    async fn get(&self, path: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().await.get(path).map(|o| StoredObject {
            bytes: o.bytes.clone(),
            content_type: o.content_type.clone(),
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let dir = format!("{}/", prefix);
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&dir)
                    .map(|rest| !rest.contains('/'))
                    .unwrap_or(false)
            })
            .map(|(path, object)| memory_info(path, object))
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(to) {
            return Err(CareError::Conflict(OBJECT_EXISTS.into()));
        }
        let object = objects
            .remove(from)
            .ok_or_else(|| CareError::NotFound("File not found.".into()))?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(path).is_some())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let dir = format!("{}/", prefix);
        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|path, _| !path.starts_with(&dir));
        Ok((before - objects.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn ObjectStore) {
        store
            .put("P/reports/x.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();
        let dup = store
            .put("P/reports/x.pdf", Bytes::from_static(b"again"), "application/pdf")
            .await
            .unwrap_err();
        assert_eq!(dup.to_string(), OBJECT_EXISTS);

        store
            .put("P/reports/y.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        let mut names: Vec<String> = store.list("P/reports").await.unwrap().into_iter().map(|o| o.name).collect();
        names.sort();
        assert_eq!(names, vec!["x.pdf", "y.png"]);
        assert!(store.list("P/bills").await.unwrap().is_empty());

        let err = store.rename("P/reports/x.pdf", "P/reports/y.png").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::CONFLICT);
        store.rename("P/reports/x.pdf", "P/reports/z.pdf").await.unwrap();
        let fetched = store.get("P/reports/z.pdf").await.unwrap().unwrap();
        assert_eq!(&fetched.bytes[..], b"%PDF");

        assert!(store.remove("P/reports/z.pdf").await.unwrap());
        assert!(!store.remove("P/reports/z.pdf").await.unwrap());
        assert_eq!(store.remove_prefix("P").await.unwrap(), 1);
        assert!(store.get("P/reports/y.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_semantics() {
        exercise(&MemoryObjectStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store_semantics() {
        let root = std::env::temp_dir().join(format!("carecircle-test-{}", crate::types::new_id()));
        let store = FsObjectStore::new(&root, "medical-vault");
        exercise(&store).await;
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let store = FsObjectStore::new(std::env::temp_dir(), "bucket");
        assert!(store.get("P/../../etc/passwd").await.is_err());
    }
}
