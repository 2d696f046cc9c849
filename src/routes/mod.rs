//! HTTP routes for CareCircle
//!
//! Each module exposes `handle_*_request(req, state) -> Option<Response>`,
//! returning `None` for paths it does not own. Handlers stay thin: parse,
//! authenticate, call into [`crate::care`] and shape the JSON.

pub mod account;
pub mod assistant;
pub mod auth_routes;
pub mod care_circle;
pub mod family;
pub mod health;
pub mod notifications;
pub mod profiles;
pub mod sos;
pub mod storage;
pub mod vault;

pub use account::handle_account_request;
pub use assistant::handle_assistant_request;
pub use auth_routes::handle_auth_request;
pub use care_circle::handle_care_circle_request;
pub use family::handle_family_request;
pub use health::{health_check, readiness_check, version_info};
pub use notifications::handle_notifications_request;
pub use profiles::handle_profiles_request;
pub use sos::handle_sos_request;
pub use storage::handle_storage_request;
pub use vault::handle_vault_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::error;

use crate::auth::{authenticate, AuthUser};
use crate::server::AppState;
use crate::types::{CareError, Result};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Cap for ordinary JSON bodies
pub const MAX_JSON_BODY: usize = 64 * 1024;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    apply_cors(response.headers_mut());
    response
}

pub fn ok_json<T: Serialize>(body: &T) -> Response<BoxBody> {
    json_response(StatusCode::OK, body)
}

/// `{"message": ...}` with the error's status; 429 carries `Retry-After`
pub fn error_response(err: CareError) -> Response<BoxBody> {
    let retry_after = match &err {
        CareError::TooManyRequests { retry_after_secs, .. } => Some(*retry_after_secs),
        _ => None,
    };
    if err.status_code().is_server_error() {
        error!("Request failed: {}", err);
    }

    let (status, body) = err.into_status_code_and_body();
    let mut response = json_response(status, &body);
    if let Some(secs) = retry_after {
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Collapse a handler result into a response
pub fn respond(result: Result<Response<BoxBody>>) -> Response<BoxBody> {
    result.unwrap_or_else(error_response)
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::NO_CONTENT;
    apply_cors(response.headers_mut());
    response
        .headers_mut()
        .insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    response
}

pub fn not_found(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &json!({ "message": "Not Found", "path": path }),
    )
}

pub fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({ "message": "Method not allowed" }),
    )
}

/// Read a whole body, refusing anything over `limit` bytes
pub async fn read_body<B>(req: Request<B>, limit: usize) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(CareError::PayloadTooLarge("Request body too large.".into()))
        }
        Err(e) => Err(CareError::BadRequest(format!("Failed to read body: {}", e))),
    }
}

pub async fn parse_json_body<T, B>(req: Request<B>, limit: usize) -> Result<T>
where
    T: DeserializeOwned,
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(req, limit).await?;
    serde_json::from_slice(&bytes).map_err(CareError::from)
}

/// Body as a JSON object; an empty or non-object body yields an empty map
pub async fn parse_json_object<B>(req: Request<B>, limit: usize) -> Result<Map<String, Value>>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(req, limit).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Trimmed non-empty string field of a JSON object
pub fn str_field<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Decoded query parameters; the last occurrence of a key wins
pub fn query_params<B>(req: &Request<B>) -> HashMap<String, String> {
    req.uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

/// Client address for rate limiting
pub fn client_ip<B>(req: &Request<B>) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    header("x-real-ip").unwrap_or("unknown").to_string()
}

pub fn auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Resolve the caller or fail with 401
pub async fn require_user<B>(req: &Request<B>, state: &AppState) -> Result<AuthUser> {
    authenticate(&state.jwt, state.store.as_ref(), auth_header(req)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)], body: &'static str) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
    }

    #[test]
    fn test_client_ip_precedence() {
        let req = request("/", &[("x-forwarded-for", " 10.0.0.1 , 10.0.0.2"), ("x-real-ip", "10.9.9.9")], "");
        assert_eq!(client_ip(&req), "10.0.0.1");

        let req = request("/", &[("x-real-ip", "10.9.9.9")], "");
        assert_eq!(client_ip(&req), "10.9.9.9");

        let req = request("/", &[("x-forwarded-for", " ")], "");
        assert_eq!(client_ip(&req), "unknown");
    }

    #[test]
    fn test_query_params_decode() {
        let req = request("/api/vault?profileId=p%201&category=all&category=bills", &[], "");
        let params = query_params(&req);
        assert_eq!(params.get("profileId").map(String::as_str), Some("p 1"));
        assert_eq!(params.get("category").map(String::as_str), Some("bills"));
        assert!(query_params(&request("/x", &[], "")).is_empty());
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = error_response(CareError::TooManyRequests {
            message: "Too many requests. Please try again later.".into(),
            retry_after_secs: 17,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "17");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let response = error_response(CareError::Internal("secret detail".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_body_limit() {
        let err = read_body(request("/", &[], "0123456789"), 4).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let body: Value = parse_json_body(request("/", &[], r#"{"a":1}"#), 64).await.unwrap();
        assert_eq!(body["a"], 1);
    }

    #[tokio::test]
    async fn test_json_object_tolerates_empty_body() {
        assert!(parse_json_object(request("/", &[], "  "), 64).await.unwrap().is_empty());
        assert!(parse_json_object(request("/", &[], "[1]"), 64).await.unwrap().is_empty());
        let err = parse_json_object(request("/", &[], "{"), 64).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
