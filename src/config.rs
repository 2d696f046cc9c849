//! Configuration for CareCircle
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CareCircle - shared health records for families and friends
#[derive(Parser, Debug, Clone)]
#[command(name = "carecircle")]
#[command(about = "Care-circle API server: profiles, links, vault, activity")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store fallback, log-only SMS)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "carecircle")]
    pub mongodb_db: String,

    /// JWT secret for session and signed-URL tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Public base URL used when building signed URLs
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8080")]
    pub public_url: String,

    /// Root directory for stored vault objects
    #[arg(long, env = "STORAGE_ROOT", default_value = "./storage")]
    pub storage_root: PathBuf,

    /// Bucket holding medical vault files
    #[arg(long, env = "VAULT_BUCKET", default_value = "medical-vault")]
    pub vault_bucket: String,

    /// Lifetime of signed URLs in seconds
    #[arg(long, env = "SIGNED_URL_TTL_SECONDS", default_value = "60")]
    pub signed_url_ttl_seconds: u64,

    /// Maximum vault upload size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Candidate chatbot backend base URLs, tried in order
    #[arg(
        long,
        env = "ASSISTANT_URLS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:5000,http://localhost:5000"
    )]
    pub assistant_urls: Vec<String>,

    /// Per-candidate timeout for chatbot requests in milliseconds
    #[arg(long, env = "ASSISTANT_TIMEOUT_MS", default_value = "30000")]
    pub assistant_timeout_ms: u64,

    /// SMS provider settings
    #[command(flatten)]
    pub sms: SmsArgs,

    /// Fixed window length for rate limiting in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECONDS", default_value = "60")]
    pub rate_limit_window_seconds: u64,

    /// Requests allowed per key within one window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "5")]
    pub rate_limit_max_requests: u32,
}

/// Twilio-compatible SMS/OTP provider settings
#[derive(Parser, Debug, Clone)]
pub struct SmsArgs {
    /// Account SID
    #[arg(long, env = "TWILIO_ACCOUNT_SID")]
    pub twilio_account_sid: Option<String>,

    /// Auth token
    #[arg(long, env = "TWILIO_AUTH_TOKEN")]
    pub twilio_auth_token: Option<String>,

    /// Verify service SID used for OTP
    #[arg(long, env = "TWILIO_VERIFY_SERVICE_SID")]
    pub twilio_verify_service_sid: Option<String>,

    /// Sender number for plain messages (SOS)
    #[arg(long, env = "TWILIO_FROM_NUMBER")]
    pub twilio_from_number: Option<String>,

    /// Country code prepended to numbers without one
    #[arg(long, env = "DEFAULT_COUNTRY_CODE", default_value = "+91")]
    pub default_country_code: String,
}

impl SmsArgs {
    /// True when every credential needed for the HTTP provider is present
    pub fn is_configured(&self) -> bool {
        self.twilio_account_sid.is_some()
            && self.twilio_auth_token.is_some()
            && self.twilio_verify_service_sid.is_some()
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".into()),
                Some(secret) if secret.len() < 32 => {
                    return Err("JWT_SECRET must be at least 32 characters".into())
                }
                Some(_) => {}
            }
            if !self.sms.is_configured() {
                return Err("TWILIO_* credentials are required in production mode".into());
            }
        }

        if self.signed_url_ttl_seconds == 0 {
            return Err("SIGNED_URL_TTL_SECONDS must be positive".into());
        }

        if self.rate_limit_window_seconds == 0 || self.rate_limit_max_requests == 0 {
            return Err("rate limit window and maximum must be positive".into());
        }

        if self.assistant_urls.iter().all(|u| u.trim().is_empty()) {
            return Err("ASSISTANT_URLS must name at least one backend".into());
        }

        if !self.sms.default_country_code.starts_with('+') {
            return Err("DEFAULT_COUNTRY_CODE must start with '+'".into());
        }

        Ok(())
    }

    /// Defaults for in-process tests
    pub fn for_tests() -> Self {
        Self::parse_from(["carecircle", "--dev-mode"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_defaults_validate() {
        let args = Args::for_tests();
        assert!(args.dev_mode);
        assert_eq!(args.signed_url_ttl_seconds, 60);
        assert_eq!(args.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(args.assistant_urls.len(), 2);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let args = Args::parse_from(["carecircle"]);
        assert!(args.validate().unwrap_err().contains("JWT_SECRET"));

        let args = Args::parse_from(["carecircle", "--jwt-secret", "short"]);
        assert!(args.validate().unwrap_err().contains("32"));
    }
}
