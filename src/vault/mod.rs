//! Medical document vault
//!
//! Objects live at `{ownerProfileId}/{folder}/{fileName}` inside one
//! bucket. Reads go through short-lived signed URLs.

pub mod service;
pub mod signed;
pub mod storage;

pub use service::{ListOptions, UploadRequest, Vault, VaultFile};
pub use signed::UrlSigner;
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore};

use serde::{Deserialize, Serialize};

use crate::types::{CareError, Result};

pub const FALLBACK_FILE_BASE: &str = "untitled";
pub const INVALID_FOLDER: &str = "Invalid folder.";
pub const INVALID_FILE_NAME: &str = "Invalid file name.";

const MAX_FILE_NAME_LEN: usize = 255;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "tif", "tiff", "heic", "heif", "avif", "ico",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultFolder {
    Reports,
    Prescriptions,
    Insurance,
    Bills,
}

impl VaultFolder {
    pub const ALL: [VaultFolder; 4] = [
        VaultFolder::Reports,
        VaultFolder::Prescriptions,
        VaultFolder::Insurance,
        VaultFolder::Bills,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Prescriptions => "prescriptions",
            Self::Insurance => "insurance",
            Self::Bills => "bills",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == raw.trim())
    }

    /// Parse a required folder parameter
    pub fn require(raw: Option<&str>) -> Result<Self> {
        raw.and_then(Self::parse)
            .ok_or_else(|| CareError::BadRequest(INVALID_FOLDER.into()))
    }
}

/// A single path segment that is safe to store under
pub fn is_valid_storage_file_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty()
        && name.len() <= MAX_FILE_NAME_LEN
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.chars().any(|c| c.is_control())
}

/// Storage path for one object; rejects names that could escape the folder
pub fn object_path(owner_profile_id: &str, folder: VaultFolder, file_name: &str) -> Result<String> {
    let owner = owner_profile_id.trim();
    if owner.is_empty() || owner.contains(['/', '\\']) || owner.starts_with('.') {
        return Err(CareError::BadRequest("Invalid profile.".into()));
    }
    if !is_valid_storage_file_name(file_name) {
        return Err(CareError::BadRequest(INVALID_FILE_NAME.into()));
    }
    Ok(format!("{}/{}/{}", owner, folder.as_str(), file_name.trim()))
}

/// Extension after the last dot, if the name has one
pub fn file_extension(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.trim()).filter(|e| !e.is_empty() && !e.contains(['/', '\\']))
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, ext)) if !ext.contains(['/', '\\']) => base,
        _ => name,
    }
}

/// Final stored name for an upload.
///
/// The requested base name wins over the uploaded file's own base name;
/// the extension always comes from the uploaded file. Separators become
/// `-` and an empty result falls back to `untitled`.
pub fn build_upload_name(requested: Option<&str>, original: &str) -> String {
    let clean = |raw: &str| raw.replace(['/', '\\'], "-").trim().to_string();
    let original = original.trim();

    let requested_base = requested.map(|r| clean(strip_extension(r.trim()))).unwrap_or_default();
    let original_base = clean(strip_extension(original));
    let base = [requested_base, original_base]
        .into_iter()
        .find(|b| !b.is_empty())
        .unwrap_or_else(|| FALLBACK_FILE_BASE.to_string());

    match file_extension(original).map(clean).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

/// PDF or image by MIME type, else by extension
pub fn is_allowed_upload_type(content_type: Option<&str>, file_name: &str) -> bool {
    let mime = content_type.unwrap_or_default().trim().to_ascii_lowercase();
    if mime == "application/pdf" || mime.starts_with("image/") {
        return true;
    }
    match file_extension(file_name).map(str::to_ascii_lowercase) {
        Some(ext) => ext == "pdf" || IMAGE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Content type for a stored name when none was recorded
pub fn guess_content_type(file_name: &str) -> &'static str {
    match file_extension(file_name).map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
