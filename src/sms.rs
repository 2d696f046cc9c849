//! SMS delivery and phone verification
//!
//! [`TwilioSms`] talks to the Twilio Verify and Messages REST APIs. In dev
//! mode [`DevSms`] stands in: codes are generated locally, logged, and
//! only their hashes are kept.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SmsArgs;
use crate::types::{new_id, CareError, Result};

const VERIFY_BASE: &str = "https://verify.twilio.com/v2/Services";
const MESSAGES_BASE: &str = "https://api.twilio.com/2010-04-01/Accounts";
const DEV_CODE_TTL: Duration = Duration::from_secs(600);

/// Outcome of a verification check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Approved,
    Rejected,
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start an SMS verification to an E.164 number
    async fn send_verification(&self, phone: &str) -> Result<()>;

    async fn check_verification(&self, phone: &str, code: &str) -> Result<VerificationStatus>;

    /// Send a plain text message; returns the provider message id
    async fn send_message(&self, to: &str, body: &str) -> Result<String>;
}

/// Normalize a phone number to E.164.
///
/// `+`-prefixed input keeps its digits as-is; anything else drops one
/// leading `0` and gets the default country code.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        return Some(format!("+{}", digits));
    }
    let local = digits.strip_prefix('0').unwrap_or(&digits);
    if local.is_empty() {
        return None;
    }
    Some(format!("{}{}", country_code, local))
}

/// Every stored form a phone number may have been saved in
pub fn phone_variants(raw: &str, country_code: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    let country_digits = country_code.trim_start_matches('+');

    let mut candidates = vec![trimmed.to_string(), digits.clone(), format!("+{}", digits)];
    if let Some(normalized) = normalize_phone(trimmed, country_code) {
        candidates.push(normalized.trim_start_matches('+').to_string());
        candidates.push(normalized);
    }
    if !country_digits.is_empty() && digits.len() > 10 && digits.starts_with(country_digits) {
        candidates.push(digits[country_digits.len()..].to_string());
    }

    let mut variants: Vec<String> = Vec::new();
    for candidate in candidates {
        if candidate.len() > 1 && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

pub fn looks_like_email(contact: &str) -> bool {
    contact.contains('@')
}

/// Stable non-reversible key for a phone number (rate limit buckets, logs)
pub fn phone_fingerprint(phone: &str) -> String {
    hex::encode(Sha256::digest(phone.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct TwilioVerification {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: Option<String>,
}

pub struct TwilioSms {
    account_sid: String,
    auth_token: String,
    verify_service_sid: String,
    from_number: Option<String>,
    http_client: reqwest::Client,
}

impl TwilioSms {
    pub fn from_args(args: &SmsArgs) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CareError::Config(format!("{} is not set", name)))
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("carecircle/1.0")
            .build()
            .unwrap_or_default();

        Ok(Self {
            account_sid: required(&args.twilio_account_sid, "TWILIO_ACCOUNT_SID")?,
            auth_token: required(&args.twilio_auth_token, "TWILIO_AUTH_TOKEN")?,
            verify_service_sid: required(&args.twilio_verify_service_sid, "TWILIO_VERIFY_SERVICE_SID")?,
            from_number: args.twilio_from_number.clone().filter(|v| !v.trim().is_empty()),
            http_client,
        })
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(&self, url: &str, form: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http_client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<TwilioError>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("SMS provider returned {}", status));
            warn!(status = %status, "Twilio request failed: {}", message);
            return Err(CareError::Upstream(message));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SmsProvider for TwilioSms {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send_verification(&self, phone: &str) -> Result<()> {
        let url = format!("{}/{}/Verifications", VERIFY_BASE, self.verify_service_sid);
        let verification: TwilioVerification = self
            .post_form(&url, &[("To", phone), ("Channel", "sms")])
            .await?;
        debug!(status = %verification.status, "Verification started");
        Ok(())
    }

    async fn check_verification(&self, phone: &str, code: &str) -> Result<VerificationStatus> {
        let url = format!("{}/{}/VerificationCheck", VERIFY_BASE, self.verify_service_sid);
        let verification: TwilioVerification =
            self.post_form(&url, &[("To", phone), ("Code", code)]).await?;
        Ok(if verification.status == "approved" {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        })
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<String> {
        let from = self
            .from_number
            .as_deref()
            .ok_or_else(|| CareError::Config("TWILIO_FROM_NUMBER is not set".into()))?;
        let url = format!("{}/{}/Messages.json", MESSAGES_BASE, self.account_sid);
        let message: TwilioMessage = self
            .post_form(&url, &[("To", to), ("From", from), ("Body", body)])
            .await?;
        Ok(message.sid)
    }
}

struct PendingCode {
    hash: String,
    expires_at: Instant,
}

/// Local stand-in for development
#[derive(Default)]
pub struct DevSms {
    codes: DashMap<String, PendingCode>,
}

impl DevSms {
    pub fn new() -> Self {
        Self::default()
    }

    fn hash(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    /// Issue a code without logging it
    fn issue(&self, phone: &str) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        self.codes.insert(
            phone.to_string(),
            PendingCode {
                hash: Self::hash(&code),
                expires_at: Instant::now() + DEV_CODE_TTL,
            },
        );
        code
    }
}

#[async_trait]
impl SmsProvider for DevSms {
    fn name(&self) -> &'static str {
        "dev"
    }

    async fn send_verification(&self, phone: &str) -> Result<()> {
        let code = self.issue(phone);
        info!(phone = %phone, code = %code, "DEV MODE: verification code issued");
        Ok(())
    }

    async fn check_verification(&self, phone: &str, code: &str) -> Result<VerificationStatus> {
        let approved = match self.codes.get(phone) {
            Some(pending) => {
                pending.expires_at > Instant::now() && pending.hash == Self::hash(code.trim())
            }
            None => false,
        };
        if approved {
            self.codes.remove(phone);
            return Ok(VerificationStatus::Approved);
        }
        Ok(VerificationStatus::Rejected)
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<String> {
        info!(to = %to, "DEV MODE: SMS not sent: {}", body);
        Ok(format!("dev-{}", new_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("098765 43210", "+91"), Some("+919876543210".into()));
        assert_eq!(normalize_phone("+1 (555) 010-0000", "+91"), Some("+15550100000".into()));
        assert_eq!(normalize_phone("9876543210", "+91"), Some("+919876543210".into()));
        assert_eq!(normalize_phone("abc", "+91"), None);
        assert_eq!(normalize_phone("0", "+91"), None);
    }

    #[test]
    fn test_phone_variants_cover_stored_forms() {
        let variants = phone_variants("+91 98765 43210", "+91");
        for expected in ["+91 98765 43210", "919876543210", "+919876543210", "9876543210"] {
            assert!(variants.contains(&expected.to_string()), "missing {}", expected);
        }

        let local = phone_variants("9876543210", "+91");
        assert!(local.contains(&"+919876543210".to_string()));
        assert!(local.contains(&"919876543210".to_string()));
    }

    #[test]
    fn test_variants_deduplicated() {
        let variants = phone_variants("+15550100000", "+91");
        let mut sorted = variants.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), variants.len());
    }

    #[test]
    fn test_fingerprint_hides_number() {
        let key = phone_fingerprint("+919876543210");
        assert_eq!(key.len(), 64);
        assert!(!key.contains("9876543210"));
    }

    #[tokio::test]
    async fn test_dev_codes_single_use() {
        let sms = DevSms::new();
        let code = sms.issue("+911234567890");

        assert_eq!(
            sms.check_verification("+911234567890", "000000x").await.unwrap(),
            VerificationStatus::Rejected
        );
        assert_eq!(
            sms.check_verification("+911234567890", &code).await.unwrap(),
            VerificationStatus::Approved
        );
        assert_eq!(
            sms.check_verification("+911234567890", &code).await.unwrap(),
            VerificationStatus::Rejected
        );
    }

    #[test]
    fn test_twilio_requires_credentials() {
        let args = SmsArgs {
            twilio_account_sid: Some("AC123".into()),
            twilio_auth_token: None,
            twilio_verify_service_sid: Some("VA123".into()),
            twilio_from_number: None,
            default_country_code: "+91".into(),
        };
        assert!(TwilioSms::from_args(&args).is_err());
    }
}
