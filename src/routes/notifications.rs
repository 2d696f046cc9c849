//! Notification state routes
//!
//! - GET  /api/notifications/state?ids=a,b - stored flags for the given ids
//! - POST /api/notifications/state         - set read/dismissed flags

use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde_json::json;
use std::sync::Arc;

use crate::care::notifications::{self, StateUpdate};
use crate::routes::vault::query_str;
use crate::routes::{
    method_not_allowed, not_found, ok_json, parse_json_body, query_params, require_user, respond,
    BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::Result;

async fn get_state(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let ids = notifications::parse_query_ids(query_str(&query, "ids"));

    let states = notifications::get_states(state.store.as_ref(), &user.id, &ids).await?;
    Ok(ok_json(&json!({ "states": states })))
}

async fn update_state(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let update: StateUpdate = parse_json_body(req, MAX_JSON_BODY).await?;

    notifications::update_states(state.store.as_ref(), &user.id, update).await?;
    Ok(ok_json(&json!({ "success": true })))
}

pub async fn handle_notifications_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/notifications") {
        return None;
    }

    let method = req.method().clone();
    let result = match (&method, path.as_str()) {
        (&Method::GET, "/api/notifications/state") => get_state(req, state).await,
        (&Method::POST, "/api/notifications/state") => update_state(req, state).await,
        (_, "/api/notifications/state") => Ok(method_not_allowed()),
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
