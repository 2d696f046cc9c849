//! Bearer resolution
//!
//! Turns an `Authorization` header into the authenticated user, checking
//! the token signature, kind and version against the stored credential.

use serde::Serialize;
use tracing::debug;

use crate::auth::{extract_token_from_header, JwtValidator, TokenKind};
use crate::store::CareStore;
use crate::types::{CareError, Result};

/// The user behind a valid session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed: bool,
}

fn unauthorized(reason: impl Into<String>) -> CareError {
    CareError::Unauthorized(reason.into())
}

/// Resolve the caller of a request.
///
/// Any failure yields `CareError::Unauthorized`; the reason is only logged.
pub async fn authenticate(
    jwt: &JwtValidator,
    store: &dyn CareStore,
    header: Option<&str>,
) -> Result<AuthUser> {
    let token = extract_token_from_header(header).ok_or_else(|| unauthorized("missing token"))?;

    let validation = jwt.verify_token(token);
    let claims = match validation.claims {
        Some(claims) if validation.valid => claims,
        _ => {
            debug!("Rejected bearer token: {:?}", validation.error);
            return Err(unauthorized("invalid token"));
        }
    };

    if claims.kind != TokenKind::Access {
        return Err(unauthorized("refresh token used as access token"));
    }

    let credential = store
        .credential_by_id(&claims.sub)
        .await?
        .ok_or_else(|| unauthorized("unknown user"))?;

    if credential.token_version != claims.version {
        return Err(unauthorized("token revoked"));
    }

    Ok(AuthUser {
        id: credential.id,
        email: credential.email,
        phone: credential.phone,
        email_confirmed: credential.email_confirmed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenInput;
    use crate::db::schemas::CredentialDoc;
    use crate::store::MemoryStore;

    async fn seeded() -> (MemoryStore, CredentialDoc) {
        let store = MemoryStore::new();
        let credential = store
            .insert_credential(CredentialDoc::new(Some("a@example.com".into()), None, None))
            .await
            .unwrap();
        (store, credential)
    }

    fn input(credential: &CredentialDoc) -> TokenInput {
        TokenInput {
            user_id: credential.id.clone(),
            email: credential.email.clone(),
            phone: None,
            email_confirmed: false,
            version: credential.token_version,
        }
    }

    #[tokio::test]
    async fn test_valid_bearer() {
        let (store, credential) = seeded().await;
        let jwt = JwtValidator::new_dev();
        let token = jwt.generate_token(&input(&credential)).unwrap();
        let header = format!("Bearer {}", token);
        let user = authenticate(&jwt, &store, Some(&header)).await.unwrap();
        assert_eq!(user.id, credential.id);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let (store, _) = seeded().await;
        let jwt = JwtValidator::new_dev();
        let err = authenticate(&jwt, &store, None).await.unwrap_err();
        assert!(matches!(err, CareError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let (store, mut credential) = seeded().await;
        let jwt = JwtValidator::new_dev();
        let token = jwt.generate_token(&input(&credential)).unwrap();

        credential.token_version += 1;
        store.replace_credential(&credential).await.unwrap();

        let err = authenticate(&jwt, &store, Some(&token)).await.unwrap_err();
        assert!(matches!(err, CareError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_rejected() {
        let (store, credential) = seeded().await;
        let jwt = JwtValidator::new_dev();
        let token = jwt.generate_refresh_token(&input(&credential)).unwrap();
        assert!(authenticate(&jwt, &store, Some(&token)).await.is_err());
    }
}
