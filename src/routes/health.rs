//! Health check endpoints
//!
//! - /health, /healthz - liveness, always 200 while the process runs
//! - /ready, /readyz - readiness, 200 only when the store answers a ping
//! - /version - build information

use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::routes::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the server state was built
    pub uptime: u64,
    pub mode: &'static str,
    pub store: &'static str,
    pub sms: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        store: state.store.backend(),
        sms: state.sms.name(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        error: None,
    }
}

/// Liveness check
pub fn health_check(state: &AppState) -> Response<BoxBody> {
    json_response(StatusCode::OK, &build_health_response(state))
}

/// Readiness check: the store must be reachable
pub async fn readiness_check(state: &AppState) -> Response<BoxBody> {
    let mut response = build_health_response(state);

    let status = match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            response.healthy = false;
            response.error = Some(format!("{} store unreachable", state.store.backend()));
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    json_response(status, &response)
}

#[derive(Serialize)]
struct VersionResponse {
    name: &'static str,
    version: &'static str,
}

pub fn version_info() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}
