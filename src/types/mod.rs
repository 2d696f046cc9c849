//! Shared types for CareCircle

pub mod error;

pub use error::{CareError, Result};

use chrono::{SecondsFormat, Utc};

/// Current time as an RFC 3339 string with millisecond precision.
///
/// Every persisted timestamp uses this shape so rows sort lexically.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fresh row identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
