//! Care-circle routes
//!
//! - POST   /api/care-circle/invite                 - invite a user by phone
//! - GET    /api/care-circle/links                  - outgoing and incoming links
//! - POST   /api/care-circle/respond                - accept or decline invites
//! - PATCH  /api/care-circle/role                   - change a member's relationship
//! - GET    /api/care-circle/member/details         - shared profile, health and records
//! - \*     /api/care-circle/member/vault           - shared profile's vault
//! - GET    /api/care-circle/member/vault/signed    - signed URL for a shared file
//! - \*     /api/care-circle/member/medications     - shared medication list
//! - \*     /api/care-circle/member/appointments    - shared appointment list
//! - GET    /api/care-circle/activity               - activity on shared profiles

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::care::activity::{circle_feed, FeedWindow};
use crate::care::{circle, member_vault, members};
use crate::db::schemas::LinkStatus;
use crate::routes::vault::{decode_upload, list_options, query_str, upload_body_limit, FilePathPayload, UploadPayload};
use crate::routes::{
    json_response, method_not_allowed, not_found, ok_json, parse_json_body, parse_json_object,
    query_params, require_user, respond, str_field, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::{CareError, Result};
use crate::vault::{VaultFolder, INVALID_FILE_NAME};

const LINK_ID_REQUIRED: &str = "linkId is required.";

fn require_link_id(raw: Option<&str>) -> Result<String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CareError::BadRequest(LINK_ID_REQUIRED.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteRequest {
    #[serde(default)]
    contact: String,
    #[serde(default)]
    profile_id: Option<String>,
}

async fn invite(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    state.rate_limit("invite", &user.id)?;
    let body: InviteRequest = parse_json_body(req, MAX_JSON_BODY).await?;

    let outcome = circle::invite(
        state.store.as_ref(),
        &user.id,
        &body.contact,
        body.profile_id.as_deref(),
        &state.args.sms.default_country_code,
    )
    .await?;
    Ok(ok_json(&outcome))
}

async fn links(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let links = circle::list_links(state.store.as_ref(), &user.id, query_str(&query, "profileId")).await?;
    Ok(ok_json(&links))
}

async fn respond_invite(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;

    let link_id = require_link_id(str_field(&body, "linkId"))?;
    let decision = str_field(&body, "decision")
        .and_then(LinkStatus::parse_decision)
        .ok_or_else(|| CareError::BadRequest("decision must be accepted or declined.".into()))?;

    let outcome = circle::respond(state.store.as_ref(), &user.id, &link_id, decision).await?;
    Ok(ok_json(&outcome))
}

async fn update_role(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;

    let link_id = require_link_id(str_field(&body, "linkId"))?;
    let role = str_field(&body, "role").unwrap_or_default();
    let outcome = circle::update_role(state.store.as_ref(), &user.id, &link_id, role).await?;
    Ok(ok_json(&outcome))
}

async fn details(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let link_id = require_link_id(query_str(&query, "linkId"))?;

    let details = members::member_details(state.store.as_ref(), &user.id, &link_id).await?;
    Ok(ok_json(&details))
}

async fn vault_list(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let link_id = require_link_id(query_str(&query, "linkId"))?;

    let files = member_vault::list(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        &link_id,
        &list_options(&query),
    )
    .await?;
    Ok(ok_json(&json!({ "files": files })))
}

async fn vault_upload(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let limit = upload_body_limit(state.args.max_upload_bytes);
    let payload: UploadPayload = parse_json_body(req, limit).await?;

    let link_id = require_link_id(payload.link_id.as_deref())?;
    let request = decode_upload(payload.folder.as_deref(), payload.file_name.as_deref(), payload.file)?;
    let file = member_vault::upload(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        &link_id,
        request,
        payload.actor_profile_id.as_deref(),
    )
    .await?;

    Ok(json_response(StatusCode::CREATED, &json!({ "file": file })))
}

async fn vault_rename(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let payload: FilePathPayload = parse_json_body(req, MAX_JSON_BODY).await?;

    let link_id = require_link_id(payload.link_id.as_deref())?;
    let folder = VaultFolder::require(payload.folder.as_deref())?;
    let outcome = member_vault::rename(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        &link_id,
        folder,
        &payload.name,
        &payload.next_name,
        payload.actor_profile_id.as_deref(),
    )
    .await?;

    Ok(ok_json(&json!({
        "file": { "name": outcome.to_name, "folder": outcome.folder }
    })))
}

async fn vault_delete(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let payload: FilePathPayload = parse_json_body(req, MAX_JSON_BODY).await?;

    let link_id = require_link_id(payload.link_id.as_deref())?;
    let folder = VaultFolder::require(payload.folder.as_deref())?;
    member_vault::delete(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        &link_id,
        folder,
        &payload.name,
        payload.actor_profile_id.as_deref(),
    )
    .await?;

    Ok(ok_json(&json!({ "deleted": true })))
}

async fn vault_signed(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);

    let link_id = require_link_id(query_str(&query, "linkId"))?;
    let folder = VaultFolder::require(query_str(&query, "folder"))?;
    let name = query_str(&query, "name").map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(CareError::BadRequest(INVALID_FILE_NAME.into()));
    }

    let url = member_vault::signed_url(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        &link_id,
        folder,
        name,
    )
    .await?;
    Ok(ok_json(&json!({ "url": url })))
}

/// The nested record object of a mutation body, e.g. `{linkId, medication: {...}}`
fn record_object(body: &Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    body.get(key)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| CareError::BadRequest(format!("{key} is required.")))
}

fn record_id(body: &Map<String, Value>, key: &str) -> Result<String> {
    str_field(body, key)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CareError::BadRequest(format!("{key} is required.")))
}

async fn medications(
    req: Request<Incoming>,
    state: Arc<AppState>,
    method: Method,
) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;
    let link_id = require_link_id(str_field(&body, "linkId"))?;
    let store = state.store.as_ref();

    let change = match method {
        Method::POST => {
            let input = record_object(&body, "medication")?;
            members::add_medication(store, &user.id, &link_id, &input).await?
        }
        Method::PATCH => {
            let input = record_object(&body, "medication")?;
            members::update_medication(store, &user.id, &link_id, &input).await?
        }
        _ => {
            let id = record_id(&body, "medicationId")?;
            members::delete_medication(store, &user.id, &link_id, &id).await?
        }
    };

    let status = if method == Method::POST { StatusCode::CREATED } else { StatusCode::OK };
    Ok(json_response(status, &change))
}

async fn appointments(
    req: Request<Incoming>,
    state: Arc<AppState>,
    method: Method,
) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;
    let link_id = require_link_id(str_field(&body, "linkId"))?;
    let store = state.store.as_ref();

    let change = match method {
        Method::POST => {
            let input = Value::Object(record_object(&body, "appointment")?);
            members::add_appointment(store, &user.id, &link_id, &input).await?
        }
        Method::PATCH => {
            let input = Value::Object(record_object(&body, "appointment")?);
            members::update_appointment(store, &user.id, &link_id, &input).await?
        }
        _ => {
            let id = record_id(&body, "appointmentId")?;
            members::delete_appointment(store, &user.id, &link_id, &id).await?
        }
    };

    let status = if method == Method::POST { StatusCode::CREATED } else { StatusCode::OK };
    Ok(json_response(status, &change))
}

async fn activity(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let window = FeedWindow::from_query(query_str(&query, "limit"), query_str(&query, "sinceHours"));

    let logs = circle_feed(state.store.as_ref(), &user.id, window).await?;
    Ok(ok_json(&json!({ "logs": logs })))
}

pub async fn handle_care_circle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let route = path.strip_prefix("/api/care-circle")?.to_string();

    let method = req.method().clone();
    let result = match (&method, route.as_str()) {
        (&Method::POST, "/invite") => invite(req, state).await,
        (&Method::GET, "/links") => links(req, state).await,
        (&Method::POST, "/respond") => respond_invite(req, state).await,
        (&Method::PATCH, "/role") | (&Method::POST, "/role") => update_role(req, state).await,
        (&Method::GET, "/member/details") => details(req, state).await,
        (&Method::GET, "/member/vault") => vault_list(req, state).await,
        (&Method::POST, "/member/vault") => vault_upload(req, state).await,
        (&Method::PATCH, "/member/vault") => vault_rename(req, state).await,
        (&Method::DELETE, "/member/vault") => vault_delete(req, state).await,
        (&Method::GET, "/member/vault/signed") => vault_signed(req, state).await,
        (&Method::POST, "/member/medications")
        | (&Method::PATCH, "/member/medications")
        | (&Method::DELETE, "/member/medications") => medications(req, state, method.clone()).await,
        (&Method::POST, "/member/appointments")
        | (&Method::PATCH, "/member/appointments")
        | (&Method::DELETE, "/member/appointments") => appointments(req, state, method.clone()).await,
        (&Method::GET, "/activity") => activity(req, state).await,
        (
            _,
            "/invite" | "/links" | "/respond" | "/role" | "/member/details" | "/member/vault"
            | "/member/vault/signed" | "/member/medications" | "/member/appointments" | "/activity",
        ) => Ok(method_not_allowed()),
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
