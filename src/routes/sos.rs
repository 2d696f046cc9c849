//! Emergency alert route
//!
//! - POST /api/sos - text every emergency contact at once

use futures::future::join_all;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::routes::{client_ip, method_not_allowed, ok_json, parse_json_body, respond, BoxBody, MAX_JSON_BODY};
use crate::server::AppState;
use crate::sms::{normalize_phone, SmsProvider};
use crate::types::{CareError, Result};

const INVALID_NUMBER: &str = "Please enter a valid number";

#[derive(Debug, Deserialize)]
struct SosContact {
    #[serde(default)]
    name: Option<String>,
    /// Clients send strings or bare numbers
    #[serde(default)]
    phone: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SosRequest {
    #[serde(default, alias = "emergencyContacts")]
    contacts: Vec<SosContact>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SosDelivery {
    pub contact_name: Option<String>,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SosOutcome {
    pub sent: Vec<SosDelivery>,
    pub failed: Vec<SosDelivery>,
}

fn sos_message(user_name: Option<&str>, location: Option<&str>) -> String {
    let who = user_name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("A user");
    let mut message = format!("EMERGENCY ALERT\n\n{} has triggered an SOS emergency", who);
    if let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) {
        message.push_str(&format!("\nLocation: {}", location));
    }
    message
}

fn phone_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn dispatch(
    sms: &dyn SmsProvider,
    contacts: Vec<SosContact>,
    message: &str,
    country_code: &str,
) -> Result<SosOutcome> {
    let targets: Vec<(Option<String>, String)> = contacts
        .into_iter()
        .filter_map(|c| {
            let phone = phone_text(&c.phone).and_then(|p| normalize_phone(&p, country_code))?;
            Some((c.name, phone))
        })
        .collect();
    if targets.is_empty() {
        return Err(CareError::BadRequest("No valid emergency contacts found.".into()));
    }

    let results = join_all(targets.into_iter().map(|(name, phone)| async move {
        let result = sms.send_message(&phone, message).await;
        (name, phone, result)
    }))
    .await;

    let mut outcome = SosOutcome {
        sent: Vec::new(),
        failed: Vec::new(),
    };
    for (contact_name, phone_number, result) in results {
        match result {
            Ok(id) => outcome.sent.push(SosDelivery {
                contact_name,
                phone_number,
                message_id: Some(id),
                error: None,
            }),
            Err(e) => {
                warn!(error = %e, "SOS message failed");
                outcome.failed.push(SosDelivery {
                    contact_name,
                    phone_number,
                    message_id: None,
                    error: Some(INVALID_NUMBER.into()),
                });
            }
        }
    }
    Ok(outcome)
}

async fn send(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>> {
    state.rate_limit("sos", &client_ip(&req))?;
    let body: SosRequest = parse_json_body(req, MAX_JSON_BODY).await?;

    let message = sos_message(body.user_name.as_deref(), body.location.as_deref());
    let outcome = dispatch(
        state.sms.as_ref(),
        body.contacts,
        &message,
        &state.args.sms.default_country_code,
    )
    .await?;

    if outcome.sent.is_empty() {
        return Err(CareError::BadRequest(INVALID_NUMBER.into()));
    }
    info!(sent = outcome.sent.len(), failed = outcome.failed.len(), "SOS alert sent");
    Ok(ok_json(&outcome))
}

pub async fn handle_sos_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if req.uri().path() != "/api/sos" {
        return None;
    }

    let result = match *req.method() {
        Method::POST => send(req, state).await,
        _ => Ok(method_not_allowed()),
    };
    Some(respond(result))
}
