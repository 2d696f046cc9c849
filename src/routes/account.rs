//! Account-level routes
//!
//! - POST /api/account/delete  - hard-delete the caller's account
//! - POST /api/health-profile  - save the caller's health profile

use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde_json::json;
use std::sync::Arc;

use crate::care::health::{self, HealthProfileInput};
use crate::care::manage;
use crate::routes::{
    method_not_allowed, not_found, ok_json, parse_json_body, parse_json_object, require_user,
    respond, str_field, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::Result;

async fn delete_account(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;

    let deleted = manage::delete_account(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        str_field(&body, "confirmation"),
    )
    .await?;
    Ok(ok_json(&deleted))
}

async fn save_health_profile(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let input: HealthProfileInput = parse_json_body(req, MAX_JSON_BODY).await?;

    health::save_health_profile(state.store.as_ref(), &user.id, input).await?;
    Ok(ok_json(&json!({ "ok": true })))
}

pub async fn handle_account_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/account") && !path.starts_with("/api/health-profile") {
        return None;
    }

    let method = req.method().clone();
    let result = match (&method, path.as_str()) {
        (&Method::POST, "/api/account/delete") => delete_account(req, state).await,
        (&Method::POST, "/api/health-profile") => save_health_profile(req, state).await,
        (_, "/api/account/delete") | (_, "/api/health-profile") => Ok(method_not_allowed()),
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
