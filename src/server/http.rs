//! HTTP server with route dispatch
//!
//! One tokio task per connection; every request goes through
//! [`handle_request`], which hands it to the first route module that claims
//! the path.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::proxy::AssistantProxy;
use crate::ratelimit::{self, RateLimiter};
use crate::routes::{self, BoxBody};
use crate::sms::{DevSms, SmsProvider, TwilioSms};
use crate::store::CareStore;
use crate::types::{CareError, Result};
use crate::vault::{ObjectStore, UrlSigner, Vault};

/// Shared state for all request handlers
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn CareStore>,
    pub vault: Vault,
    pub jwt: JwtValidator,
    pub sms: Arc<dyn SmsProvider>,
    /// Shared by OTP, SOS, invite and chat; keys are prefixed per route
    pub limiter: Arc<RateLimiter>,
    pub assistant: AssistantProxy,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, store: Arc<dyn CareStore>, objects: Arc<dyn ObjectStore>) -> Result<Self> {
        let jwt = match args.jwt_secret.clone() {
            Some(secret) => JwtValidator::new(secret, args.jwt_expiry_seconds)?,
            None if args.dev_mode => {
                warn!("JWT_SECRET not set, using the development secret");
                JwtValidator::new_dev()
            }
            None => return Err(CareError::Config("JWT_SECRET is required in production mode".into())),
        };

        let sms: Arc<dyn SmsProvider> = if args.sms.is_configured() {
            Arc::new(TwilioSms::from_args(&args.sms)?)
        } else if args.dev_mode {
            warn!("SMS provider not configured, verification codes are logged instead of sent");
            Arc::new(DevSms::new())
        } else {
            return Err(CareError::Config("SMS provider credentials are missing".into()));
        };

        let signer = UrlSigner::new(
            jwt.secret(),
            &args.public_url,
            &args.vault_bucket,
            args.signed_url_ttl_seconds,
        );
        let vault = Vault::new(objects, signer, args.max_upload_bytes);

        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(args.rate_limit_window_seconds),
            args.rate_limit_max_requests,
        ));
        let assistant = AssistantProxy::new(
            &args.assistant_urls,
            Duration::from_millis(args.assistant_timeout_ms),
        );

        Ok(Self {
            args,
            store,
            vault,
            jwt,
            sms,
            limiter,
            assistant,
            started_at: Instant::now(),
        })
    }

    /// Count a request against a per-route key
    pub fn rate_limit(&self, scope: &str, key: &str) -> Result<()> {
        self.limiter.check(&format!("{}:{}", scope, key))
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "CareCircle listening on {} (store: {}, sms: {})",
        state.args.listen,
        state.store.backend(),
        state.sms.name()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    ratelimit::spawn_cleanup_task(Arc::clone(&state.limiter));
    info!(
        "Assistant proxy candidates: {}",
        state.assistant.candidates().join(", ")
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Handle an incoming HTTP request
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(routes::cors_preflight());
    }

    match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return Ok(routes::health_check(&state));
        }
        (&Method::GET, "/ready") | (&Method::GET, "/readyz") => {
            return Ok(routes::readiness_check(&state).await);
        }
        (&Method::GET, "/version") => return Ok(routes::version_info()),
        _ => {}
    }

    let response = if path.starts_with("/auth") || path.starts_with("/api/auth") {
        routes::handle_auth_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/account") || path.starts_with("/api/health-profile") {
        routes::handle_account_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/profile") {
        routes::handle_profiles_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/care-circle") {
        routes::handle_care_circle_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/family") {
        routes::handle_family_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/vault") {
        routes::handle_vault_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/notifications") {
        routes::handle_notifications_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/chat") {
        routes::handle_assistant_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/api/sos") {
        routes::handle_sos_request(req, Arc::clone(&state)).await
    } else if path.starts_with("/storage/") {
        routes::handle_storage_request(req, Arc::clone(&state)).await
    } else {
        None
    };

    Ok(response.unwrap_or_else(|| routes::not_found(&path)))
}
