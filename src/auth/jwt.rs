//! JWT session tokens
//!
//! Security notes:
//! - Tokens are signed with HS256 (HMAC-SHA256)
//! - Access tokens default to 1 hour, refresh tokens to 7 days
//! - `version` must match the credential's `token_version`; logout bumps it

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::CareError;

const REFRESH_EXPIRY_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Distinguishes access from refresh tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Payload stored in JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email_confirmed: bool,
    /// Token version (for invalidation)
    pub version: i32,
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Input for creating a new token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed: bool,
    pub version: i32,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, CareError> {
        if secret.is_empty() {
            return Err(CareError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(CareError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Create a validator for dev mode (allows empty secret)
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Raw secret, shared with the signed-URL signer
    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    /// Generate an access token
    pub fn generate_token(&self, input: &TokenInput) -> Result<String, CareError> {
        self.sign(input, TokenKind::Access, self.expiry_seconds)
    }

    /// Generate a refresh token with longer expiry (7 days)
    pub fn generate_refresh_token(&self, input: &TokenInput) -> Result<String, CareError> {
        self.sign(input, TokenKind::Refresh, REFRESH_EXPIRY_SECONDS)
    }

    fn sign(&self, input: &TokenInput, kind: TokenKind, ttl: u64) -> Result<String, CareError> {
        let now = unix_now()?;

        let claims = Claims {
            sub: input.user_id.clone(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            email_confirmed: input.email_confirmed,
            version: input.version,
            kind,
            iat: now,
            exp: now + ttl,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CareError::Auth(format!("Failed to generate token: {}", e)))
    }

    /// Validate a token and return its claims
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        let mut validation = Validation::default();
        validation.leeway = 0;

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => TokenValidationResult::valid(data.claims),
            Err(e) => TokenValidationResult::invalid(e.to_string()),
        }
    }
}

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> Result<u64, CareError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| CareError::Auth(format!("System time error: {}", e)))
}

/// Extract token from Authorization header
///
/// Supports both "Bearer <token>" and raw token formats
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let token = match header.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &header[6..];
            // "Bearerabc" is a raw token, not a scheme
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                header
            } else {
                rest.trim()
            }
        }
        _ => header,
    };
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> TokenInput {
        TokenInput {
            user_id: "user-1".into(),
            email: Some("a@example.com".into()),
            phone: None,
            email_confirmed: true,
            version: 1,
        }
    }

    #[test]
    fn test_generate_and_verify() {
        let validator = JwtValidator::new_dev();
        let token = validator.generate_token(&input()).unwrap();
        let result = validator.verify_token(&token);
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.email_confirmed);
    }

    #[test]
    fn test_refresh_token_kind() {
        let validator = JwtValidator::new_dev();
        let token = validator.generate_refresh_token(&input()).unwrap();
        let claims = validator.verify_token(&token).claims.unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert!(claims.exp - claims.iat == REFRESH_EXPIRY_SECONDS);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let a = JwtValidator::new_dev();
        let b = JwtValidator::new("another-secret-that-is-long-enough-0123".into(), 60).unwrap();
        let token = a.generate_token(&input()).unwrap();
        let result = b.verify_token(&token);
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(JwtValidator::new("short".into(), 60).is_err());
        assert!(JwtValidator::new(String::new(), 60).is_err());
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token_from_header(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_token_from_header(Some("abc")), Some("abc"));
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_extract_token_scheme_variants() {
        assert_eq!(extract_token_from_header(Some("Bearer")), None);
        assert_eq!(extract_token_from_header(Some("  bearer   ")), None);
        assert_eq!(extract_token_from_header(Some("BEARER  abc ")), Some("abc"));
        assert_eq!(extract_token_from_header(Some("bearer\tabc")), Some("abc"));
        assert_eq!(extract_token_from_header(Some("Bearerabc")), Some("Bearerabc"));
        assert_eq!(extract_token_from_header(Some("   ")), None);
    }
}
