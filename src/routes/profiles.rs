//! Profile routes
//!
//! - GET    /api/profiles          - caller's profiles and the preferred id
//! - POST   /api/profiles          - create a profile
//! - DELETE /api/profiles          - delete a non-primary profile and its data
//! - GET    /api/profile/activity  - activity on one owned profile
//! - POST   /api/profile/activity  - record activity on one owned profile

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use std::sync::Arc;

use crate::care::activity::FeedWindow;
use crate::care::manage::{self, OwnActivity, ProfileInput};
use crate::routes::{
    json_response, method_not_allowed, not_found, ok_json, parse_json_body, parse_json_object,
    query_params, require_user, respond, str_field, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::Result;

async fn list(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let profiles = manage::list_profiles(state.store.as_ref(), &user.id).await?;
    Ok(ok_json(&profiles))
}

async fn create(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let input: ProfileInput = parse_json_body(req, MAX_JSON_BODY).await?;
    let profile = manage::create_profile(state.store.as_ref(), &user.id, input).await?;
    Ok(json_response(StatusCode::CREATED, &json!({ "profile": profile })))
}

async fn delete(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body = parse_json_object(req, MAX_JSON_BODY).await?;
    let outcome = manage::delete_profile(
        state.store.as_ref(),
        &state.vault,
        &user.id,
        str_field(&body, "profileId"),
    )
    .await?;
    Ok(ok_json(&outcome))
}

async fn activity_feed(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let query = query_params(&req);
    let window = FeedWindow::from_query(
        query.get("limit").map(String::as_str),
        query.get("sinceHours").map(String::as_str),
    );

    let logs = manage::own_feed(
        state.store.as_ref(),
        &user.id,
        query.get("profileId").map(String::as_str),
        window,
    )
    .await?;
    Ok(ok_json(&json!({ "logs": logs })))
}

async fn record_activity(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let input: OwnActivity = parse_json_body(req, MAX_JSON_BODY).await?;
    manage::record_own_activity(state.store.as_ref(), &user.id, input).await?;
    Ok(ok_json(&json!({ "success": true })))
}

pub async fn handle_profiles_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/profile") {
        return None;
    }

    let method = req.method().clone();
    let result = match (&method, path.as_str()) {
        (&Method::GET, "/api/profiles") => list(req, state).await,
        (&Method::POST, "/api/profiles") => create(req, state).await,
        (&Method::DELETE, "/api/profiles") | (&Method::POST, "/api/profile/delete") => {
            delete(req, state).await
        }
        (&Method::GET, "/api/profile/activity") => activity_feed(req, state).await,
        (&Method::POST, "/api/profile/activity") => record_activity(req, state).await,
        (_, "/api/profiles") | (_, "/api/profile/activity") | (_, "/api/profile/delete") => {
            Ok(method_not_allowed())
        }
        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}
