//! Signed object URLs
//!
//! A signed URL carries an HS256 token bound to one bucket and object path.
//! The signing key is derived from the session secret so a session token
//! never verifies as a URL token or the reverse.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::jwt::unix_now;
use crate::types::{CareError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectClaims {
    bucket: String,
    path: String,
    iat: u64,
    exp: u64,
}

#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
    public_url: String,
    bucket: String,
    ttl_seconds: u64,
}

/// Percent-encode each path segment, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl UrlSigner {
    pub fn new(session_secret: &str, public_url: &str, bucket: &str, ttl_seconds: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"carecircle-signed-url:");
        hasher.update(session_secret.as_bytes());
        Self {
            key: hasher.finalize().to_vec(),
            public_url: public_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            ttl_seconds,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Token granting read access to `path` until the TTL elapses
    pub fn token_for(&self, path: &str) -> Result<String> {
        let now = unix_now()?;
        let claims = ObjectClaims {
            bucket: self.bucket.clone(),
            path: path.to_string(),
            iat: now,
            exp: now + self.ttl_seconds,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.key))
            .map_err(|e| CareError::Internal(format!("Unable to create signed URL: {}", e)))
    }

    /// Absolute URL serving `path` through the storage route
    pub fn sign(&self, path: &str) -> Result<String> {
        let token = self.token_for(path)?;
        Ok(format!(
            "{}/storage/object/sign/{}/{}?token={}",
            self.public_url,
            urlencoding::encode(&self.bucket),
            encode_path(path),
            urlencoding::encode(&token)
        ))
    }

    /// Check a token against the requested bucket and decoded object path
    pub fn verify(&self, bucket: &str, path: &str, token: &str) -> Result<()> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<ObjectClaims>(token, &DecodingKey::from_secret(&self.key), &validation)
            .map_err(|_| CareError::Forbidden("Invalid or expired signature.".into()))?;

        if data.claims.bucket != bucket || data.claims.path != path {
            return Err(CareError::Forbidden("Invalid or expired signature.".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret-that-is-at-least-32-characters", "http://localhost:8080/", "medical-vault", 60)
    }

    #[test]
    fn test_signed_url_shape() {
        let url = signer().sign("P/reports/blood test.pdf").unwrap();
        assert!(url.starts_with(
            "http://localhost:8080/storage/object/sign/medical-vault/P/reports/blood%20test.pdf?token="
        ));
    }

    #[test]
    fn test_token_bound_to_path() {
        let s = signer();
        let token = s.token_for("P/reports/x.pdf").unwrap();
        assert!(s.verify("medical-vault", "P/reports/x.pdf", &token).is_ok());
        assert!(s.verify("medical-vault", "P/reports/y.pdf", &token).is_err());
        assert!(s.verify("other", "P/reports/x.pdf", &token).is_err());
    }

    #[test]
    fn test_session_secret_does_not_verify_directly() {
        let s = signer();
        let foreign = UrlSigner::new("another-secret-that-is-at-least-32-chars", "http://x", "medical-vault", 60);
        let token = foreign.token_for("P/reports/x.pdf").unwrap();
        assert!(s.verify("medical-vault", "P/reports/x.pdf", &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let s = UrlSigner::new("test-secret-that-is-at-least-32-characters", "http://x", "b", 0);
        let token = s.token_for("P/bills/a.png").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(s.verify("b", "P/bills/a.png", &token).is_err());
    }
}
