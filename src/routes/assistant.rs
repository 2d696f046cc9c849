//! Chat assistant route
//!
//! - POST /api/chat - relay a chat message to the first reachable backend

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::proxy::AssistantReply;
use crate::routes::{
    json_response, method_not_allowed, parse_json_body, require_user, respond, BoxBody,
    MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::types::{CareError, Result};

const SIGN_IN_REPLY: &str = "Please sign in to use the assistant.";

fn reply_response(reply: AssistantReply) -> Response<BoxBody> {
    let status = StatusCode::from_u16(reply.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    if let AssistantReply::Unavailable { attempts } = &reply {
        warn!(attempts = attempts.len(), "Assistant backends unreachable");
    }
    json_response(status, &reply.into_body())
}

async fn chat(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = match require_user(&req, &state).await {
        Ok(user) => user,
        Err(CareError::Unauthorized(_)) => {
            return Ok(json_response(
                StatusCode::UNAUTHORIZED,
                &json!({ "success": false, "message": "Unauthorized", "reply": SIGN_IN_REPLY }),
            ))
        }
        Err(e) => return Err(e),
    };
    state.rate_limit("chat", &user.id)?;

    let payload: Value = parse_json_body(req, MAX_JSON_BODY).await?;
    Ok(reply_response(state.assistant.forward(&payload).await))
}

pub async fn handle_assistant_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if req.uri().path() != "/api/chat" {
        return None;
    }

    let result = match *req.method() {
        Method::POST => chat(req, state).await,
        _ => Ok(method_not_allowed()),
    };
    Some(respond(result))
}
