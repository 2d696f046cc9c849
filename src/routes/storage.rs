//! Signed object downloads
//!
//! - GET /storage/object/sign/{bucket}/{path}?token= - serve one vault object

use hyper::body::Incoming;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

use crate::routes::vault::query_str;
use crate::routes::{full_body, method_not_allowed, query_params, respond, BoxBody};
use crate::server::AppState;
use crate::types::{CareError, Result};

const SIGN_PREFIX: &str = "/storage/object/sign/";

/// Split `{bucket}/{path}` and percent-decode every segment
fn split_object_path(raw: &str) -> Result<(String, String)> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        let decoded = urlencoding::decode(segment)
            .map_err(|_| CareError::BadRequest("Invalid object path.".into()))?;
        if decoded.is_empty() || decoded == "." || decoded == ".." || decoded.contains('/') {
            return Err(CareError::BadRequest("Invalid object path.".into()));
        }
        segments.push(decoded.into_owned());
    }

    if segments.len() < 2 {
        return Err(CareError::BadRequest("Invalid object path.".into()));
    }
    let bucket = segments.remove(0);
    Ok((bucket, segments.join("/")))
}

async fn download(req: Request<Incoming>, state: Arc<AppState>, raw: &str) -> Result<Response<BoxBody>> {
    let (bucket, path) = split_object_path(raw)?;
    let query = query_params(&req);
    let token = query_str(&query, "token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CareError::Forbidden("Missing signature.".into()))?;

    state.vault.signer().verify(&bucket, &path, token)?;

    let object = state
        .vault
        .objects()
        .get(&path)
        .await?
        .ok_or_else(|| CareError::NotFound("Object not found.".into()))?;
    debug!(size = object.bytes.len(), "Serving signed object");

    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(full_body(object.bytes));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=60"));
    Ok(response)
}

pub async fn handle_storage_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let raw = path.strip_prefix(SIGN_PREFIX)?;

    let result = match *req.method() {
        Method::GET => download(req, state, raw).await,
        _ => Ok(method_not_allowed()),
    };
    Some(respond(result))
}
