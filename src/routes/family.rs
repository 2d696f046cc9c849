//! Family group routes
//!
//! - GET  /api/family/links               - links with counterpart names
//! - GET  /api/family/relations           - caller's labels for members
//! - POST /api/family/relations           - set one label
//! - POST /api/family/create              - create a group
//! - POST /api/family/delete              - owner deletes the group
//! - POST /api/family/invite              - pending link by phone number
//! - GET  /api/family/health              - health summary of a linked member
//! - GET  /api/family/member/details      - a member's profile and records
//! - GET  /api/family/member/vault        - a member's vault files
//! - GET  /api/family/member/vault/signed - signed URL for a member's file

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::care::family;
use crate::routes::vault::{list_options, query_str};
use crate::routes::{
    json_response, method_not_allowed, not_found, ok_json, parse_json_body, query_params,
    require_user, respond, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::{CareError, Result};
use crate::vault::{VaultFolder, INVALID_FILE_NAME};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationRequest {
    #[serde(default)]
    member_id: String,
    #[serde(default)]
    relation: String,
}

#[derive(Debug, Deserialize)]
struct InviteRequest {
    #[serde(default)]
    contact: String,
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    name: String,
}

fn split_ids(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

async fn links(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let overview = family::family_links(state.store.as_ref(), &user.id).await?;
    Ok(ok_json(&overview))
}

async fn get_relations(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let ids = split_ids(query_str(&query, "memberIds"));

    let relations = family::relations(state.store.as_ref(), &user.id, &ids).await?;
    Ok(ok_json(&json!({ "relations": relations })))
}

async fn set_relation(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body: RelationRequest = parse_json_body(req, MAX_JSON_BODY).await?;

    family::set_relation(state.store.as_ref(), &user.id, &body.member_id, &body.relation).await?;
    Ok(ok_json(&json!({ "message": "Relation saved." })))
}

async fn create(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body: CreateRequest = parse_json_body(req, MAX_JSON_BODY).await?;

    let created = family::create_family(state.store.as_ref(), &user.id, &body.name).await?;
    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "family": { "id": created.id, "name": created.name } }),
    ))
}

async fn delete(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let family_id = family::delete_family(state.store.as_ref(), &user.id).await?;
    Ok(ok_json(&json!({ "message": "Family deleted.", "familyId": family_id })))
}

async fn invite(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    state.rate_limit("invite", &user.id)?;
    let body: InviteRequest = parse_json_body(req, MAX_JSON_BODY).await?;

    family::invite_to_family(state.store.as_ref(), &user.id, &body.contact).await?;
    Ok(ok_json(&json!({ "message": "Invite sent successfully" })))
}

fn member_id(query: &HashMap<String, String>) -> &str {
    query_str(query, "memberId").unwrap_or_default()
}

async fn health(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let health = family::member_health(state.store.as_ref(), &user.id, member_id(&query)).await?;
    Ok(ok_json(&json!({ "health": health })))
}

async fn member_details(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let details = family::group_member_details(state.store.as_ref(), &user.id, member_id(&query)).await?;
    Ok(ok_json(&details))
}

async fn member_vault(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let files = family::member_vault_files(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        member_id(&query),
        &list_options(&query),
    )
    .await?;
    Ok(ok_json(&json!({ "files": files })))
}

async fn member_signed(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let (Some(member_id), Some(folder), Some(name)) = (
        query_str(&query, "memberId").filter(|m| !m.trim().is_empty()),
        query_str(&query, "folder"),
        query_str(&query, "name"),
    ) else {
        return Err(CareError::BadRequest("Missing required parameters.".into()));
    };
    let folder = VaultFolder::require(Some(folder))?;
    if name.trim().is_empty() {
        return Err(CareError::BadRequest(INVALID_FILE_NAME.into()));
    }

    let path = family::member_vault_path(state.store.as_ref(), &user.id, member_id, folder, name.trim()).await?;
    let url = state.vault.signer().sign(&path)?;
    Ok(ok_json(&json!({ "url": url })))
}

pub async fn handle_family_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let route = path.strip_prefix("/api/family")?.to_string();

    let method = req.method().clone();
    let result = match (&method, route.as_str()) {
        (&Method::GET, "/links") => links(req, state).await,
        (&Method::GET, "/relations") => get_relations(req, state).await,
        (&Method::POST, "/relations") => set_relation(req, state).await,
        (&Method::POST, "/create") => create(req, state).await,
        (&Method::POST, "/delete") => delete(req, state).await,
        (&Method::POST, "/invite") => invite(req, state).await,
        (&Method::GET, "/health") => health(req, state).await,
        (&Method::GET, "/member/details") => member_details(req, state).await,
        (&Method::GET, "/member/vault") => member_vault(req, state).await,
        (&Method::GET, "/member/vault/signed") => member_signed(req, state).await,
        (
            _,
            "/links" | "/relations" | "/create" | "/delete" | "/invite" | "/health"
            | "/member/details" | "/member/vault" | "/member/vault/signed",
        ) => Ok(method_not_allowed()),
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
