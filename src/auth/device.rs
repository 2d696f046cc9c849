//! Remembered devices
//!
//! A signed-in client may register a random device token. Presenting it
//! later mints a fresh session without a password or OTP; every use rotates
//! the token, so a copied token works at most once.

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::auth::account::{issue_session, Session};
use crate::auth::JwtValidator;
use crate::db::schemas::RememberedDeviceDoc;
use crate::store::CareStore;
use crate::types::{new_id, CareError, Result};

pub const SAVED_LOGIN_EXPIRED: &str = "Saved login expired. Please sign in again.";

/// 32 random bytes, hex encoded
pub fn generate_device_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_device_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn require_device_token(raw: Option<&str>) -> Result<&str> {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CareError::BadRequest("Missing device token.".into()))
}

fn expired(reason: &str) -> CareError {
    CareError::Unauthorized(reason.to_string())
}

/// Remember `token` for the user; re-registering a token moves it
pub async fn register(
    store: &dyn CareStore,
    user_id: &str,
    token: &str,
    label: Option<String>,
) -> Result<()> {
    store
        .upsert_remembered_device(RememberedDeviceDoc {
            id: new_id(),
            user_id: user_id.to_string(),
            device_token_hash: hash_device_token(token),
            label: label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            ..Default::default()
        })
        .await?;
    info!(user_id = %user_id, "Device remembered");
    Ok(())
}

/// Owner of a remembered token, optionally checked against `expected_user`
pub async fn verify(store: &dyn CareStore, token: &str, expected_user: Option<&str>) -> Result<String> {
    let hash = hash_device_token(token);
    let device = store
        .remembered_device(&hash)
        .await?
        .ok_or_else(|| CareError::NotFound("Not found.".into()))?;

    if expected_user.is_some_and(|expected| expected != device.user_id) {
        return Err(CareError::Unauthorized("device belongs to another user".into()));
    }

    store.touch_remembered_device(&hash).await?;
    Ok(device.user_id)
}

pub async fn remove(store: &dyn CareStore, token: &str) -> Result<u64> {
    store.delete_remembered_device(&hash_device_token(token)).await
}

/// Session minted from a remembered device, plus the rotated token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedLogin {
    pub ok: bool,
    pub user_id: String,
    pub device_token: String,
    #[serde(flatten)]
    pub session: Session,
}

/// Trade a remembered token for a session.
///
/// Unknown tokens, tokens of another user and tokens whose account is gone
/// all fail with `Unauthorized`; the latter two also forget the device.
pub async fn consume(
    store: &dyn CareStore,
    jwt: &JwtValidator,
    token: Option<&str>,
    expected_user: Option<&str>,
) -> Result<ConsumedLogin> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| expired("missing device token"))?;
    let hash = hash_device_token(token);

    let device = store
        .remembered_device(&hash)
        .await?
        .ok_or_else(|| expired("unknown device token"))?;

    let expected_user = expected_user.map(str::trim).filter(|u| !u.is_empty());
    if expected_user.is_some_and(|expected| expected != device.user_id) {
        store.delete_remembered_device(&hash).await?;
        debug!("Remembered device presented for another user");
        return Err(expired("device belongs to another user"));
    }

    let next_token = generate_device_token();
    let next_hash = hash_device_token(&next_token);
    let rotated = store
        .rotate_remembered_device(&hash, &next_hash)
        .await?
        .ok_or_else(|| expired("device token already used"))?;

    let Some(credential) = store.credential_by_id(&rotated.user_id).await? else {
        store.delete_remembered_device(&next_hash).await?;
        return Err(expired("account no longer exists"));
    };

    let session = issue_session(jwt, &credential)?;
    info!(user_id = %credential.id, "Signed in from remembered device");
    Ok(ConsumedLogin {
        ok: true,
        user_id: credential.id,
        device_token: next_token,
        session,
    })
}
