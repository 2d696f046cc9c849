//! Own-vault routes
//!
//! - GET    /api/vault         - list files of an owned profile
//! - POST   /api/vault         - upload (JSON, base64 file content)
//! - PATCH  /api/vault         - rename
//! - DELETE /api/vault         - delete
//! - GET    /api/vault/signed  - short-lived URL for one file

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::care::profile::select_profile;
use crate::db::schemas::ProfileDoc;
use crate::routes::{
    json_response, method_not_allowed, not_found, ok_json, parse_json_body, query_params,
    require_user, respond, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::{CareError, Result};
use crate::vault::{ListOptions, UploadRequest, VaultFolder, INVALID_FILE_NAME};

const PROFILE_NOT_FOUND: &str = "Profile not found.";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilePayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

/// Upload body shared by the own and member vault routes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadPayload {
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub actor_profile_id: Option<String>,
    #[serde(default)]
    pub file: Option<FilePayload>,
}

/// Rename and delete body shared by the own and member vault routes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilePathPayload {
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub actor_profile_id: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub next_name: String,
}

/// Body limit for an upload carrying `max_upload_bytes` of base64 content
pub(crate) fn upload_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.div_ceil(3) * 4 + MAX_JSON_BODY
}

/// Turn an upload body into a validated-shape [`UploadRequest`].
///
/// Accepts raw base64 or a `data:` URL; the URL's media type is used when
/// no explicit content type is given.
pub(crate) fn decode_upload(folder: Option<&str>, file_name: Option<&str>, file: Option<FilePayload>) -> Result<UploadRequest> {
    let folder = VaultFolder::require(folder)?;
    let file = file
        .filter(|f| !f.name.trim().is_empty())
        .ok_or_else(|| CareError::BadRequest("A file is required.".into()))?;

    let mut content_type = file.content_type.filter(|c| !c.trim().is_empty());
    let encoded = match file.data.trim().strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| CareError::BadRequest("File content must be base64 encoded.".into()))?;
            if content_type.is_none() {
                content_type = header
                    .split(';')
                    .next()
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
            }
            payload.to_string()
        }
        None => file.data.trim().to_string(),
    };

    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|_| CareError::BadRequest("File content must be base64 encoded.".into()))?;

    Ok(UploadRequest {
        folder,
        file_name: file_name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        original_name: file.name.trim().to_string(),
        content_type,
        bytes: Bytes::from(bytes),
    })
}

pub(crate) fn query_str<'a>(query: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    query.get(key).map(String::as_str)
}

pub(crate) fn list_options(query: &HashMap<String, String>) -> ListOptions {
    ListOptions::from_query(
        query_str(query, "category"),
        query_str(query, "includeSigned"),
        query_str(query, "limit"),
        query_str(query, "since"),
    )
}

async fn owned(state: &AppState, user_id: &str, requested: Option<&str>) -> Result<ProfileDoc> {
    select_profile(state.store.as_ref(), user_id, requested)
        .await?
        .ok_or_else(|| CareError::NotFound(PROFILE_NOT_FOUND.into()))
}

async fn list(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let profile = owned(&state, &user.id, query_str(&query, "profileId")).await?;

    let files = state.vault.list(&profile.id, &list_options(&query)).await?;
    Ok(ok_json(&json!({ "files": files })))
}

async fn upload(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let limit = upload_body_limit(state.args.max_upload_bytes);
    let payload: UploadPayload = parse_json_body(req, limit).await?;

    let profile = owned(&state, &user.id, payload.profile_id.as_deref()).await?;
    let request = decode_upload(payload.folder.as_deref(), payload.file_name.as_deref(), payload.file)?;
    let file = state.vault.upload(&profile.id, request).await?;

    Ok(json_response(StatusCode::CREATED, &json!({ "file": file })))
}

async fn rename(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let payload: FilePathPayload = parse_json_body(req, MAX_JSON_BODY).await?;

    let profile = owned(&state, &user.id, payload.profile_id.as_deref()).await?;
    let folder = VaultFolder::require(payload.folder.as_deref())?;
    state
        .vault
        .rename(&profile.id, folder, &payload.name, &payload.next_name)
        .await?;

    Ok(ok_json(&json!({
        "file": { "name": payload.next_name.trim(), "folder": folder }
    })))
}

async fn delete(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let payload: FilePathPayload = parse_json_body(req, MAX_JSON_BODY).await?;

    let profile = owned(&state, &user.id, payload.profile_id.as_deref()).await?;
    let folder = VaultFolder::require(payload.folder.as_deref())?;
    state.vault.delete(&profile.id, folder, &payload.name).await?;

    Ok(ok_json(&json!({ "deleted": true })))
}

async fn signed(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let (Some(folder), Some(name)) = (query_str(&query, "folder"), query_str(&query, "name")) else {
        return Err(CareError::BadRequest("Missing required parameters.".into()));
    };
    let folder = VaultFolder::require(Some(folder))?;
    if name.trim().is_empty() {
        return Err(CareError::BadRequest(INVALID_FILE_NAME.into()));
    }

    let profile = owned(&state, &user.id, query_str(&query, "profileId")).await?;
    let url = state.vault.signed_url(&profile.id, folder, name.trim())?;
    Ok(ok_json(&json!({ "url": url })))
}

pub async fn handle_vault_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/vault") {
        return None;
    }

    let method = req.method().clone();
    let result = match (&method, path.as_str()) {
        (&Method::GET, "/api/vault") => list(req, state).await,
        (&Method::POST, "/api/vault") => upload(req, state).await,
        (&Method::PATCH, "/api/vault") => rename(req, state).await,
        (&Method::DELETE, "/api/vault") => delete(req, state).await,
        (&Method::GET, "/api/vault/signed") => signed(req, state).await,
        (_, "/api/vault") | (_, "/api/vault/signed") => Ok(method_not_allowed()),
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
