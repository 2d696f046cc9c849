//! Vault operations over an object store
//!
//! Callers resolve and authorize the owner profile first; everything here
//! works on an already-trusted owner profile id.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::care::profile::parse_timestamp;
use crate::types::{now_iso, CareError, Result};
use crate::vault::signed::UrlSigner;
use crate::vault::storage::{ObjectInfo, ObjectStore};
use crate::vault::{
    build_upload_name, is_allowed_upload_type, is_valid_storage_file_name, object_path,
    VaultFolder, INVALID_FILE_NAME,
};

pub const MAX_LIST_LIMIT: usize = 50;

/// Listing controls taken from query parameters
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Empty when the requested category is unknown
    pub folders: Vec<VaultFolder>,
    pub include_signed: bool,
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            folders: VaultFolder::ALL.to_vec(),
            include_signed: true,
            limit: None,
            since: None,
        }
    }
}

impl ListOptions {
    /// `category` is a folder name or `all`; an unknown category lists nothing
    pub fn from_query(
        category: Option<&str>,
        include_signed: Option<&str>,
        limit: Option<&str>,
        since: Option<&str>,
    ) -> Self {
        let folders = match category.map(str::trim).filter(|c| !c.is_empty()) {
            None | Some("all") => VaultFolder::ALL.to_vec(),
            Some(other) => VaultFolder::parse(other).into_iter().collect(),
        };
        let include_signed = include_signed
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let limit = limit
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 1.0)
            .map(|v| (v.floor() as usize).min(MAX_LIST_LIMIT));

        Self {
            folders,
            include_signed,
            limit,
            since: since.and_then(parse_timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VaultFile {
    pub name: String,
    pub created_at: Option<String>,
    pub folder: VaultFolder,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub folder: VaultFolder,
    pub created_at: String,
    pub path: String,
}

/// A decoded upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub folder: VaultFolder,
    /// Base name chosen by the user; the extension comes from `original_name`
    pub file_name: Option<String>,
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

fn created_millis(info: &ObjectInfo) -> i64 {
    info.created_at
        .as_deref()
        .and_then(parse_timestamp)
        .map(|ts| ts.timestamp_millis())
        .unwrap_or(0)
}

pub struct Vault {
    objects: Arc<dyn ObjectStore>,
    signer: UrlSigner,
    max_upload_bytes: usize,
}

impl Vault {
    pub fn new(objects: Arc<dyn ObjectStore>, signer: UrlSigner, max_upload_bytes: usize) -> Self {
        Self {
            objects,
            signer,
            max_upload_bytes,
        }
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Files of one owner, newest first
    pub async fn list(&self, owner_profile_id: &str, options: &ListOptions) -> Result<Vec<VaultFile>> {
        let mut files: Vec<(i64, VaultFile)> = Vec::new();

        for folder in &options.folders {
            let prefix = format!("{}/{}", owner_profile_id, folder.as_str());
            let mut entries = self.objects.list(&prefix).await?;
            entries.sort_by_key(|e| std::cmp::Reverse(created_millis(e)));
            if let Some(limit) = options.limit {
                entries.truncate(limit);
            }

            for entry in entries {
                if let Some(since) = options.since {
                    let fresh = entry
                        .created_at
                        .as_deref()
                        .and_then(parse_timestamp)
                        .map(|ts| ts >= since)
                        .unwrap_or(false);
                    if !fresh {
                        continue;
                    }
                }

                let url = if options.include_signed {
                    match self.signer.sign(&entry.path) {
                        Ok(url) => Some(url),
                        Err(e) => {
                            warn!("Failed to sign vault listing entry: {}", e);
                            None
                        }
                    }
                } else {
                    None
                };

                files.push((
                    created_millis(&entry),
                    VaultFile {
                        name: entry.name,
                        created_at: entry.created_at,
                        folder: *folder,
                        url,
                    },
                ));
            }
        }

        files.sort_by_key(|(created, _)| std::cmp::Reverse(*created));
        Ok(files.into_iter().map(|(_, f)| f).collect())
    }

    /// Validate and store an upload without overwriting
    pub async fn upload(&self, owner_profile_id: &str, upload: UploadRequest) -> Result<StoredFile> {
        if upload.bytes.is_empty() {
            return Err(CareError::BadRequest("File is empty.".into()));
        }
        if upload.bytes.len() > self.max_upload_bytes {
            return Err(CareError::BadRequest(format!(
                "File is too large. Maximum allowed size is {}MB.",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }
        if !is_allowed_upload_type(upload.content_type.as_deref(), &upload.original_name) {
            return Err(CareError::BadRequest(
                "Only PDF and image files are allowed.".into(),
            ));
        }

        let name = build_upload_name(upload.file_name.as_deref(), &upload.original_name);
        let path = object_path(owner_profile_id, upload.folder, &name)?;
        let content_type = upload
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| crate::vault::guess_content_type(&name).to_string());

        let stored = self.objects.put(&path, upload.bytes, &content_type).await?;
        info!(folder = upload.folder.as_str(), size = stored.size, "Vault file uploaded");

        Ok(StoredFile {
            name,
            folder: upload.folder,
            created_at: stored.created_at.unwrap_or_else(now_iso),
            path,
        })
    }

    pub async fn rename(
        &self,
        owner_profile_id: &str,
        folder: VaultFolder,
        current: &str,
        next: &str,
    ) -> Result<(String, String)> {
        let (current, next) = (current.trim(), next.trim());
        if !is_valid_storage_file_name(current) || !is_valid_storage_file_name(next) {
            return Err(CareError::BadRequest(INVALID_FILE_NAME.into()));
        }
        if current == next {
            return Err(CareError::BadRequest("Please choose a different name.".into()));
        }

        let from = object_path(owner_profile_id, folder, current)?;
        let to = object_path(owner_profile_id, folder, next)?;
        self.objects.rename(&from, &to).await?;
        Ok((from, to))
    }

    pub async fn delete(&self, owner_profile_id: &str, folder: VaultFolder, name: &str) -> Result<String> {
        let path = object_path(owner_profile_id, folder, name)?;
        self.objects.remove(&path).await?;
        Ok(path)
    }

    pub fn signed_url(&self, owner_profile_id: &str, folder: VaultFolder, name: &str) -> Result<String> {
        let path = object_path(owner_profile_id, folder, name)?;
        self.signer.sign(&path)
    }

    /// Remove every object of a profile
    pub async fn purge(&self, owner_profile_id: &str) -> Result<u64> {
        let owner = owner_profile_id.trim();
        if owner.is_empty() || owner.contains(['/', '\\']) || owner.starts_with('.') {
            return Err(CareError::BadRequest("Invalid profile.".into()));
        }
        self.objects.remove_prefix(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::storage::MemoryObjectStore;

    fn vault_with(objects: Arc<MemoryObjectStore>) -> Vault {
        let signer = UrlSigner::new("test-secret-that-is-at-least-32-characters", "http://localhost", "medical-vault", 60);
        Vault::new(objects, signer, 1024)
    }

    fn pdf(folder: VaultFolder, name: Option<&str>) -> UploadRequest {
        UploadRequest {
            folder,
            file_name: name.map(str::to_string),
            original_name: "scan.pdf".into(),
            content_type: Some("application/pdf".into()),
            bytes: Bytes::from_static(b"%PDF-1.7"),
        }
    }

    #[tokio::test]
    async fn test_upload_conflict_and_validation() {
        let vault = vault_with(Arc::new(MemoryObjectStore::new()));
        let stored = vault.upload("P", pdf(VaultFolder::Reports, Some("Blood"))).await.unwrap();
        assert_eq!(stored.path, "P/reports/Blood.pdf");

        let err = vault.upload("P", pdf(VaultFolder::Reports, Some("Blood"))).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "A file with this name already exists.");

        let mut empty = pdf(VaultFolder::Bills, None);
        empty.bytes = Bytes::new();
        assert_eq!(vault.upload("P", empty).await.unwrap_err().to_string(), "File is empty.");

        let mut big = pdf(VaultFolder::Bills, None);
        big.bytes = Bytes::from(vec![0u8; 2048]);
        assert!(vault.upload("P", big).await.is_err());

        let mut text = pdf(VaultFolder::Bills, None);
        text.content_type = Some("text/plain".into());
        text.original_name = "notes.txt".into();
        assert!(vault.upload("P", text).await.is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_filtered_and_signed() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put_at("P/reports/old.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00.000Z").await;
        objects.put_at("P/bills/new.png", Bytes::from_static(b"2"), "2024-03-01T00:00:00.000Z").await;
        objects.put_at("P/reports/mid.pdf", Bytes::from_static(b"3"), "2024-02-01T00:00:00.000Z").await;
        objects.put_at("Q/reports/other.pdf", Bytes::from_static(b"4"), "2024-04-01T00:00:00.000Z").await;
        let vault = vault_with(objects);

        let all = vault.list("P", &ListOptions::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["new.png", "mid.pdf", "old.pdf"]);
        assert!(all.iter().all(|f| f.url.is_some()));

        let opts = ListOptions::from_query(Some("reports"), Some("false"), Some("1"), None);
        let reports = vault.list("P", &opts).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "mid.pdf");
        assert!(reports[0].url.is_none());

        let recent = ListOptions::from_query(None, None, None, Some("2024-01-15T00:00:00Z"));
        assert_eq!(vault.list("P", &recent).await.unwrap().len(), 2);

        let unknown = ListOptions::from_query(Some("photos"), None, None, None);
        assert!(vault.list("P", &unknown).await.unwrap().is_empty());
    }

    #[test]
    fn test_limit_capped() {
        let opts = ListOptions::from_query(None, None, Some("500"), None);
        assert_eq!(opts.limit, Some(MAX_LIST_LIMIT));
        assert_eq!(ListOptions::from_query(None, None, Some("0"), None).limit, None);
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let vault = vault_with(Arc::new(MemoryObjectStore::new()));
        vault.upload("P", pdf(VaultFolder::Insurance, Some("a"))).await.unwrap();

        let err = vault.rename("P", VaultFolder::Insurance, "a.pdf", "a.pdf").await.unwrap_err();
        assert_eq!(err.to_string(), "Please choose a different name.");
        let err = vault.rename("P", VaultFolder::Insurance, "a.pdf", "../b.pdf").await.unwrap_err();
        assert_eq!(err.to_string(), INVALID_FILE_NAME);

        let (from, to) = vault.rename("P", VaultFolder::Insurance, "a.pdf", "b.pdf").await.unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("P/insurance/a.pdf", "P/insurance/b.pdf"));
    }

    #[tokio::test]
    async fn test_purge_profile() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put_at("P/reports/a.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        objects.put_at("PX/reports/b.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        let vault = vault_with(objects.clone());
        assert_eq!(vault.purge("P").await.unwrap(), 1);
        assert_eq!(objects.paths().await, vec!["PX/reports/b.pdf".to_string()]);
    }
}
