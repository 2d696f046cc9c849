//! Account flows: signup, login, refresh, logout, password change and
//! phone (OTP) login. Each successful flow ends in a [`Session`].

use serde::Serialize;
use tracing::info;

use crate::auth::{hash_password, verify_password, AuthUser, JwtValidator, TokenInput, TokenKind};
use crate::db::schemas::CredentialDoc;
use crate::store::CareStore;
use crate::types::{CareError, Result};

pub const INVALID_CREDENTIALS: &str = "Invalid login credentials.";

/// Tokens handed to a client after authentication
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: AuthUser,
}

fn token_input(credential: &CredentialDoc) -> TokenInput {
    TokenInput {
        user_id: credential.id.clone(),
        email: credential.email.clone(),
        phone: credential.phone.clone(),
        email_confirmed: credential.email_confirmed,
        version: credential.token_version,
    }
}

/// Mint an access/refresh pair for a credential
pub fn issue_session(jwt: &JwtValidator, credential: &CredentialDoc) -> Result<Session> {
    let input = token_input(credential);
    Ok(Session {
        access_token: jwt.generate_token(&input)?,
        refresh_token: jwt.generate_refresh_token(&input)?,
        token_type: "bearer",
        expires_in: jwt.expiry_seconds(),
        user: AuthUser {
            id: credential.id.clone(),
            email: credential.email.clone(),
            phone: credential.phone.clone(),
            email_confirmed: credential.email_confirmed,
        },
    })
}

/// Lowercased, trimmed email; rejects values without `@` or a domain dot
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }
    Some(email)
}

fn require_email(raw: &str) -> Result<String> {
    normalize_email(raw).ok_or_else(|| CareError::BadRequest("A valid email is required.".into()))
}

pub async fn signup(
    store: &dyn CareStore,
    jwt: &JwtValidator,
    email: &str,
    password: &str,
    phone: Option<String>,
) -> Result<Session> {
    let email = require_email(email)?;
    if store.credential_by_email(&email).await?.is_some() {
        return Err(CareError::Conflict("User already registered.".into()));
    }

    let hash = hash_password(password)?;
    let credential = store
        .insert_credential(CredentialDoc::new(Some(email), phone, Some(hash)))
        .await
        .map_err(|e| match e {
            CareError::Conflict(_) => CareError::Conflict("User already registered.".into()),
            other => other,
        })?;

    info!(user_id = %credential.id, "Account created");
    issue_session(jwt, &credential)
}

pub async fn login(
    store: &dyn CareStore,
    jwt: &JwtValidator,
    email: &str,
    password: &str,
) -> Result<Session> {
    let invalid = || CareError::BadRequest(INVALID_CREDENTIALS.into());
    let email = normalize_email(email).ok_or_else(invalid)?;

    let credential = store.credential_by_email(&email).await?.ok_or_else(invalid)?;
    let hash = credential.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(password, hash)? {
        return Err(invalid());
    }

    issue_session(jwt, &credential)
}

/// Revoke every token issued so far
pub async fn logout(store: &dyn CareStore, user_id: &str) -> Result<()> {
    let mut credential = store
        .credential_by_id(user_id)
        .await?
        .ok_or_else(|| CareError::Unauthorized("unknown user".into()))?;
    credential.token_version += 1;
    store.replace_credential(&credential).await
}

pub async fn refresh(store: &dyn CareStore, jwt: &JwtValidator, refresh_token: &str) -> Result<Session> {
    let validation = jwt.verify_token(refresh_token.trim());
    let claims = match validation.claims {
        Some(claims) if validation.valid && claims.kind == TokenKind::Refresh => claims,
        _ => return Err(CareError::Unauthorized("invalid refresh token".into())),
    };

    let credential = store
        .credential_by_id(&claims.sub)
        .await?
        .filter(|c| c.token_version == claims.version)
        .ok_or_else(|| CareError::Unauthorized("refresh token revoked".into()))?;

    issue_session(jwt, &credential)
}

pub async fn change_password(
    store: &dyn CareStore,
    user_id: &str,
    current: &str,
    next: &str,
) -> Result<()> {
    let mut credential = store
        .credential_by_id(user_id)
        .await?
        .ok_or_else(|| CareError::Unauthorized("unknown user".into()))?;

    if let Some(hash) = credential.password_hash.as_deref() {
        if !verify_password(current, hash)? {
            return Err(CareError::BadRequest("Current password is incorrect.".into()));
        }
    }
    if current == next {
        return Err(CareError::BadRequest(
            "New password must be different from the current password.".into(),
        ));
    }

    credential.password_hash = Some(hash_password(next)?);
    store.replace_credential(&credential).await
}

pub async fn email_exists(store: &dyn CareStore, email: &str) -> Result<bool> {
    let email = require_email(email)?;
    Ok(store.credential_by_email(&email).await?.is_some())
}

/// Session for a phone number that passed OTP verification.
///
/// `variants` are the equivalent spellings of the number; the first one is
/// stored on a freshly created credential.
pub async fn phone_login(store: &dyn CareStore, jwt: &JwtValidator, variants: &[String]) -> Result<Session> {
    let phone = variants
        .first()
        .ok_or_else(|| CareError::BadRequest("A valid phone number is required.".into()))?;

    let credential = match store.credential_by_phone(variants).await? {
        Some(existing) => existing,
        None => {
            let created = store
                .insert_credential(CredentialDoc::new(None, Some(phone.clone()), None))
                .await?;
            info!(user_id = %created.id, "Account created from phone verification");
            created
        }
    };

    issue_session(jwt, &credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authenticate;
    use crate::store::MemoryStore;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  A@Example.COM "), Some("a@example.com".to_string()));
        assert_eq!(normalize_email("nope"), None);
        assert_eq!(normalize_email("a@localhost"), None);
        assert_eq!(normalize_email("@x.com"), None);
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let store = MemoryStore::new();
        let jwt = JwtValidator::new_dev();

        let session = signup(&store, &jwt, "Asha@Example.com", "correct-horse", None).await.unwrap();
        assert_eq!(session.user.email.as_deref(), Some("asha@example.com"));

        let dup = signup(&store, &jwt, "asha@example.com", "correct-horse", None).await.unwrap_err();
        assert_eq!(dup.status_code(), hyper::StatusCode::CONFLICT);

        let again = login(&store, &jwt, "asha@example.com", "correct-horse").await.unwrap();
        assert_eq!(again.user.id, session.user.id);

        let wrong = login(&store, &jwt, "asha@example.com", "wrong-password").await.unwrap_err();
        assert_eq!(wrong.to_string(), INVALID_CREDENTIALS);
        let unknown = login(&store, &jwt, "ghost@example.com", "whatever1").await.unwrap_err();
        assert_eq!(unknown.to_string(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_logout_revokes_tokens() {
        let store = MemoryStore::new();
        let jwt = JwtValidator::new_dev();
        let session = signup(&store, &jwt, "a@example.com", "password123", None).await.unwrap();

        assert!(authenticate(&jwt, &store, Some(&session.access_token)).await.is_ok());
        logout(&store, &session.user.id).await.unwrap();
        assert!(authenticate(&jwt, &store, Some(&session.access_token)).await.is_err());
        assert!(refresh(&store, &jwt, &session.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_kind() {
        let store = MemoryStore::new();
        let jwt = JwtValidator::new_dev();
        let session = signup(&store, &jwt, "a@example.com", "password123", None).await.unwrap();

        assert!(refresh(&store, &jwt, &session.access_token).await.is_err());
        let renewed = refresh(&store, &jwt, &session.refresh_token).await.unwrap();
        assert_eq!(renewed.user.id, session.user.id);
    }

    #[tokio::test]
    async fn test_change_password() {
        let store = MemoryStore::new();
        let jwt = JwtValidator::new_dev();
        let session = signup(&store, &jwt, "a@example.com", "password123", None).await.unwrap();

        let err = change_password(&store, &session.user.id, "bad-guess", "password456")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Current password is incorrect.");

        change_password(&store, &session.user.id, "password123", "password456").await.unwrap();
        assert!(login(&store, &jwt, "a@example.com", "password456").await.is_ok());
    }

    #[tokio::test]
    async fn test_phone_login_reuses_credential() {
        let store = MemoryStore::new();
        let jwt = JwtValidator::new_dev();
        let variants = vec!["+919876543210".to_string(), "9876543210".to_string()];

        let first = phone_login(&store, &jwt, &variants).await.unwrap();
        let second = phone_login(&store, &jwt, &variants).await.unwrap();
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.user.phone.as_deref(), Some("+919876543210"));
        assert!(email_exists(&store, "nobody@example.com").await.map(|e| !e).unwrap());
    }
}
