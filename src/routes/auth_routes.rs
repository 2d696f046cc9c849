//! HTTP Routes for Authentication
//!
//! - POST /auth/signup          - Create an email/password account
//! - POST /auth/login           - Password login
//! - POST /auth/logout          - Revoke every issued token
//! - POST /auth/refresh         - Exchange a refresh token for a new session
//! - GET  /auth/me              - Current user
//! - POST /auth/password        - Change password
//! - POST /api/auth/check-email - Whether an email is registered
//! - POST /api/auth/otp/send    - Start phone verification
//! - POST /api/auth/otp/verify  - Finish phone verification and sign in
//! - POST /api/auth/remember-device         - register, verify or forget a device
//! - POST /api/auth/remember-device/consume - sign in with a remembered device

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::auth::account::{self, Session};
use crate::auth::device::{self, SAVED_LOGIN_EXPIRED};
use crate::auth::{authenticate, extract_token_from_header};
use crate::routes::{
    auth_header, client_ip, json_response, method_not_allowed, not_found, ok_json,
    parse_json_body, require_user, respond, BoxBody, MAX_JSON_BODY,
};
use crate::server::AppState;
use crate::sms::{normalize_phone, phone_fingerprint, phone_variants, VerificationStatus};
use crate::types::{CareError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

#[derive(Debug, Deserialize)]
struct EmailRequest {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct OtpRequest {
    #[serde(default)]
    phone: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RememberDeviceRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    device_token: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    device_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceAction {
    Register,
    Verify,
    Remove,
}

impl DeviceAction {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "register" => Ok(Self::Register),
            "verify" => Ok(Self::Verify),
            "remove" => Ok(Self::Remove),
            _ => Err(CareError::BadRequest("Invalid action.".into())),
        }
    }
}

fn session_response(status: StatusCode, session: &Session) -> Response<BoxBody> {
    json_response(status, session)
}

fn require_phone(raw: &str, state: &AppState) -> Result<String> {
    normalize_phone(raw, &state.args.sms.default_country_code)
        .ok_or_else(|| CareError::BadRequest("A valid phone number is required.".into()))
}

/// POST /auth/signup
async fn handle_signup(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let body: SignupRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let phone = match body.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => Some(require_phone(raw, &state)?),
        None => None,
    };

    let session = account::signup(state.store.as_ref(), &state.jwt, &body.email, &body.password, phone).await?;
    Ok(session_response(StatusCode::CREATED, &session))
}

/// POST /auth/login
async fn handle_login(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let body: LoginRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let session = account::login(state.store.as_ref(), &state.jwt, &body.email, &body.password).await?;
    info!(user_id = %session.user.id, "User logged in");
    Ok(session_response(StatusCode::OK, &session))
}

/// POST /auth/logout
async fn handle_logout(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    account::logout(state.store.as_ref(), &user.id).await?;
    Ok(ok_json(&json!({ "success": true })))
}

/// POST /auth/refresh
///
/// The refresh token comes from the body, or from the Authorization header.
async fn handle_refresh(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let header_token = extract_token_from_header(auth_header(&req)).map(str::to_string);
    let body: RefreshRequest = parse_json_body(req, MAX_JSON_BODY).await.unwrap_or_default();

    let token = body
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or(header_token)
        .ok_or_else(|| CareError::Unauthorized("missing refresh token".into()))?;

    let session = account::refresh(state.store.as_ref(), &state.jwt, &token).await?;
    Ok(session_response(StatusCode::OK, &session))
}

/// GET /auth/me
async fn handle_me(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    Ok(ok_json(&user))
}

/// POST /auth/password
async fn handle_password(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let user = require_user(&req, &state).await?;
    let body: PasswordRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    account::change_password(
        state.store.as_ref(),
        &user.id,
        &body.current_password,
        &body.new_password,
    )
    .await?;
    Ok(ok_json(&json!({ "success": true })))
}

/// POST /api/auth/check-email
async fn handle_check_email(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let body: EmailRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let exists = account::email_exists(state.store.as_ref(), &body.email).await?;
    Ok(ok_json(&json!({ "exists": exists })))
}

/// POST /api/auth/otp/send
async fn handle_otp_send(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let ip = client_ip(&req);
    state.rate_limit("otp-ip", &ip)?;

    let body: OtpRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let phone = require_phone(&body.phone, &state)?;
    state.rate_limit("otp-phone", &phone_fingerprint(&phone))?;

    state.sms.send_verification(&phone).await?;
    Ok(ok_json(&json!({ "success": true })))
}

/// POST /api/auth/otp/verify
async fn handle_otp_verify(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let ip = client_ip(&req);
    state.rate_limit("otp-verify-ip", &ip)?;

    let body: OtpRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let phone = require_phone(&body.phone, &state)?;
    let code = body
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CareError::BadRequest("Verification code is required.".into()))?;

    if state.sms.check_verification(&phone, code).await? != VerificationStatus::Approved {
        return Err(CareError::BadRequest("Invalid or expired verification code.".into()));
    }

    let mut variants = vec![phone.clone()];
    for variant in phone_variants(&phone, &state.args.sms.default_country_code) {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }

    let session = account::phone_login(state.store.as_ref(), &state.jwt, &variants).await?;
    Ok(session_response(StatusCode::OK, &session))
}

/// POST /api/auth/remember-device
///
/// Registering needs a signed-in caller, via the Authorization header or an
/// `accessToken` in the body.
async fn handle_remember_device(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    let header_user = require_user(&req, &state).await.ok();
    let body: RememberDeviceRequest = parse_json_body(req, MAX_JSON_BODY).await?;
    let action = DeviceAction::parse(&body.action)?;
    let token = device::require_device_token(body.device_token.as_deref())?;
    let store = state.store.as_ref();

    match action {
        DeviceAction::Register => {
            let user = match header_user {
                Some(user) => user,
                None => authenticate(&state.jwt, store, body.access_token.as_deref()).await?,
            };
            device::register(store, &user.id, token, body.label).await?;
            Ok(ok_json(&json!({ "ok": true })))
        }
        DeviceAction::Verify => {
            let user_id = device::verify(store, token, body.user_id.as_deref()).await?;
            Ok(ok_json(&json!({ "ok": true, "userId": user_id })))
        }
        DeviceAction::Remove => {
            device::remove(store, token).await?;
            Ok(ok_json(&json!({ "ok": true })))
        }
    }
}

/// POST /api/auth/remember-device/consume
async fn handle_consume_device(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    state.rate_limit("remember-device", &client_ip(&req))?;

    let body: ConsumeRequest = parse_json_body(req, MAX_JSON_BODY).await.unwrap_or_default();
    let consumed = device::consume(
        state.store.as_ref(),
        &state.jwt,
        body.device_token.as_deref(),
        body.user_id.as_deref(),
    )
    .await;

    match consumed {
        Ok(login) => Ok(ok_json(&login)),
        Err(CareError::Unauthorized(reason)) => {
            info!(reason = %reason, "Remembered device rejected");
            Ok(json_response(
                StatusCode::UNAUTHORIZED,
                &json!({ "message": SAVED_LOGIN_EXPIRED }),
            ))
        }
        Err(e) => Err(e),
    }
}

pub async fn handle_auth_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with("/auth") && !path.starts_with("/api/auth") {
        return None;
    }

    let method = req.method().clone();
    let result = match (&method, path.as_str()) {
        (&Method::POST, "/auth/signup") => handle_signup(req, state).await,
        (&Method::POST, "/auth/login") => handle_login(req, state).await,
        (&Method::POST, "/auth/logout") => handle_logout(req, state).await,
        (&Method::POST, "/auth/refresh") => handle_refresh(req, state).await,
        (&Method::GET, "/auth/me") => handle_me(req, state).await,
        (&Method::POST, "/auth/password") => handle_password(req, state).await,
        (&Method::POST, "/api/auth/check-email") => handle_check_email(req, state).await,
        (&Method::POST, "/api/auth/otp/send") => handle_otp_send(req, state).await,
        (&Method::POST, "/api/auth/otp/verify") => handle_otp_verify(req, state).await,
        (&Method::POST, "/api/auth/remember-device") => handle_remember_device(req, state).await,
        (&Method::POST, "/api/auth/remember-device/consume") => {
            handle_consume_device(req, state).await
        }

        (_, "/auth/signup")
        | (_, "/auth/login")
        | (_, "/auth/logout")
        | (_, "/auth/refresh")
        | (_, "/auth/me")
        | (_, "/auth/password")
        | (_, "/api/auth/check-email")
        | (_, "/api/auth/otp/send")
        | (_, "/api/auth/otp/verify")
        | (_, "/api/auth/remember-device")
        | (_, "/api/auth/remember-device/consume") => Ok(method_not_allowed()),

        _ => Ok(not_found(&path)),
    };

    Some(respond(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_action_parse() {
        assert_eq!(DeviceAction::parse("register").unwrap(), DeviceAction::Register);
        assert_eq!(DeviceAction::parse(" verify ").unwrap(), DeviceAction::Verify);
        assert_eq!(DeviceAction::parse("remove").unwrap(), DeviceAction::Remove);
        let err = DeviceAction::parse("consume").unwrap_err();
        assert_eq!(err.to_string(), "Invalid action.");
    }

    #[test]
    fn test_remember_device_request_fields() {
        let body: RememberDeviceRequest = serde_json::from_str(
            r#"{"action":"register","deviceToken":"t","label":"Phone","accessToken":"jwt"}"#,
        )
        .unwrap();
        assert_eq!(body.device_token.as_deref(), Some("t"));
        assert_eq!(body.access_token.as_deref(), Some("jwt"));
        assert!(body.user_id.is_none());
    }
}
