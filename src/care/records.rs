//! Appointment and medication record lists
//!
//! Stored lists arrive in one of three shapes depending on which client
//! wrote them: a bare array, an object wrapping the array under its kind
//! key, or either of those JSON-encoded into a string. [`RawRecordList`]
//! names the shapes; [`RawRecordList::into_items`] flattens them and
//! yields an empty list for anything else.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::care::profile::parse_timestamp;
use crate::types::{CareError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RawRecordList {
    Array(Vec<Value>),
    Wrapped(Map<String, Value>),
    Encoded(String),
    Unrecognized,
}

impl From<Value> for RawRecordList {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Array(items),
            Value::Object(map) => Self::Wrapped(map),
            Value::String(text) => Self::Encoded(text),
            _ => Self::Unrecognized,
        }
    }
}

impl RawRecordList {
    /// Ordered records; invalid encodings give an empty list
    pub fn into_items(self, key: &str) -> Vec<Value> {
        match self {
            Self::Array(items) => items,
            Self::Wrapped(mut map) => match map.remove(key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            // one level of decoding only; a string inside a string is invalid
            Self::Encoded(text) => match serde_json::from_str::<Value>(&text) {
                Ok(inner @ (Value::Array(_) | Value::Object(_))) => {
                    RawRecordList::from(inner).into_items(key)
                }
                _ => Vec::new(),
            },
            Self::Unrecognized => Vec::new(),
        }
    }
}

pub fn record_items(value: Value, key: &str) -> Vec<Value> {
    RawRecordList::from(value).into_items(key)
}

fn trimmed(row: &Map<String, Value>, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn optional(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Normalize a date to `YYYY-MM-DD`
pub fn normalize_date(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if raw.len() == 10 {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    parse_timestamp(raw).map(|ts| ts.format("%Y-%m-%d").to_string())
}

/// Normalize a time to zero-padded 24h `HH:MM`
pub fn normalize_time(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?.trim();
    let (hour, minute) = raw.split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", hour, minute))
}

/// Non-negative whole number of doses per day
pub fn normalize_times_per_day(value: Option<&Value>) -> Option<u32> {
    let numeric = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !numeric.is_finite() || numeric < 0.0 {
        return None;
    }
    Some(numeric.floor() as u32)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationLog {
    pub medication_id: String,
    pub timestamp: String,
    pub taken: bool,
}

impl MedicationLog {
    fn from_value(value: &Value) -> Option<Self> {
        let row = value.as_object()?;
        let medication_id = trimmed(row, "medicationId");
        let timestamp = trimmed(row, "timestamp");
        let taken = row.get("taken")?.as_bool()?;
        if medication_id.is_empty() || timestamp.is_empty() {
            return None;
        }
        Some(Self {
            medication_id,
            timestamp,
            taken,
        })
    }
}

fn parse_logs(value: Option<&Value>) -> Vec<MedicationLog> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(MedicationLog::from_value).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub logs: Vec<MedicationLog>,
}

const MEDICATION_REQUIRED: &str = "Medication name, dosage, and frequency are required.";

impl Medication {
    /// Read a stored record; incomplete rows are dropped
    pub fn from_value(value: &Value) -> Option<Self> {
        let row = value.as_object()?;
        let medication = Self {
            id: trimmed(row, "id"),
            name: trimmed(row, "name"),
            dosage: trimmed(row, "dosage"),
            frequency: trimmed(row, "frequency"),
            purpose: optional(trimmed(row, "purpose")),
            times_per_day: normalize_times_per_day(row.get("timesPerDay")),
            start_date: normalize_date(row.get("startDate")),
            end_date: normalize_date(row.get("endDate")),
            logs: parse_logs(row.get("logs")),
        };
        if medication.id.is_empty()
            || medication.name.is_empty()
            || medication.dosage.is_empty()
            || medication.frequency.is_empty()
        {
            return None;
        }
        Some(medication)
    }

    /// Build a new record from client input.
    ///
    /// Missing id gets a fresh uuid, `timesPerDay` defaults to 1 and
    /// `startDate` to `today`.
    pub fn create(input: &Map<String, Value>, today: &str) -> Result<Self> {
        let name = trimmed(input, "name");
        let dosage = trimmed(input, "dosage");
        let frequency = trimmed(input, "frequency");
        if name.is_empty() || dosage.is_empty() || frequency.is_empty() {
            return Err(CareError::BadRequest(MEDICATION_REQUIRED.into()));
        }

        Ok(Self {
            id: optional(trimmed(input, "id")).unwrap_or_else(crate::types::new_id),
            name,
            dosage,
            frequency,
            purpose: optional(trimmed(input, "purpose")),
            times_per_day: Some(normalize_times_per_day(input.get("timesPerDay")).unwrap_or(1)),
            start_date: Some(
                normalize_date(input.get("startDate")).unwrap_or_else(|| today.to_string()),
            ),
            end_date: normalize_date(input.get("endDate")),
            logs: parse_logs(input.get("logs")),
        })
    }

    /// Apply a partial update.
    ///
    /// Blank name/dosage/frequency keep the existing value; optional fields
    /// present in the input replace (or clear) the existing value.
    pub fn apply_update(&self, input: &Map<String, Value>) -> Result<Self> {
        let keep = |key: &str, current: &str| optional(trimmed(input, key)).unwrap_or_else(|| current.to_string());
        let updated = Self {
            id: self.id.clone(),
            name: keep("name", &self.name),
            dosage: keep("dosage", &self.dosage),
            frequency: keep("frequency", &self.frequency),
            purpose: if input.contains_key("purpose") {
                optional(trimmed(input, "purpose"))
            } else {
                self.purpose.clone()
            },
            times_per_day: if input.contains_key("timesPerDay") {
                normalize_times_per_day(input.get("timesPerDay"))
            } else {
                self.times_per_day
            },
            start_date: if input.contains_key("startDate") {
                normalize_date(input.get("startDate"))
            } else {
                self.start_date.clone()
            },
            end_date: if input.contains_key("endDate") {
                normalize_date(input.get("endDate"))
            } else {
                self.end_date.clone()
            },
            logs: if input.contains_key("logs") {
                parse_logs(input.get("logs"))
            } else {
                self.logs.clone()
            },
        };
        if updated.name.is_empty() || updated.dosage.is_empty() || updated.frequency.is_empty() {
            return Err(CareError::BadRequest(MEDICATION_REQUIRED.into()));
        }
        Ok(updated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub date: String,
    pub time: String,
    /// Any other string fields (doctor, location, notes, ...)
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

pub const APPOINTMENT_REQUIRED: &str = "Appointment requires id, title, type, date, and time.";

impl Appointment {
    pub fn from_value(value: &Value) -> Option<Self> {
        let row = value.as_object()?;
        let id = trimmed(row, "id");
        let title = trimmed(row, "title");
        let kind = trimmed(row, "type");
        let date = normalize_date(row.get("date"))?;
        let time = normalize_time(row.get("time"))?;
        if id.is_empty() || title.is_empty() || kind.is_empty() {
            return None;
        }

        let extras = row
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "id" | "title" | "type" | "date" | "time"))
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.trim().to_string())))
            .collect();

        Some(Self {
            id,
            title,
            kind,
            date,
            time,
            extras,
        })
    }
}

pub fn parse_medications(value: Value) -> Vec<Medication> {
    record_items(value, "medications")
        .iter()
        .filter_map(Medication::from_value)
        .collect()
}

pub fn parse_appointments(value: Value) -> Vec<Appointment> {
    record_items(value, "appointments")
        .iter()
        .filter_map(Appointment::from_value)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shapes_normalize_to_same_sequence() {
        let items = json!([{ "id": "1" }, { "id": "2" }]);
        let wrapped = json!({ "medications": items.clone() });
        let encoded = Value::String(items.to_string());
        let encoded_wrapped = Value::String(wrapped.to_string());

        for value in [items.clone(), wrapped, encoded, encoded_wrapped] {
            let out = record_items(value, "medications");
            assert_eq!(out, items.as_array().cloned().unwrap());
        }
    }

    #[test]
    fn test_invalid_shapes_are_empty() {
        assert!(record_items(json!(null), "medications").is_empty());
        assert!(record_items(json!(42), "medications").is_empty());
        assert!(record_items(json!("{not json"), "medications").is_empty());
        assert!(record_items(json!({ "other": [] }), "medications").is_empty());
        assert!(record_items(json!({ "medications": "nope" }), "medications").is_empty());
        // doubly encoded
        let twice = Value::String(Value::String("[]".into()).to_string());
        assert!(record_items(twice, "medications").is_empty());
    }

    #[test]
    fn test_wrong_wrapper_key() {
        let wrapped = json!({ "appointments": [{ "id": "1" }] });
        assert!(record_items(wrapped, "medications").is_empty());
    }

    #[test]
    fn test_normalize_date_and_time() {
        assert_eq!(normalize_date(Some(&json!("2024-03-05"))), Some("2024-03-05".into()));
        assert_eq!(
            normalize_date(Some(&json!("2024-03-05T10:00:00Z"))),
            Some("2024-03-05".into())
        );
        assert_eq!(normalize_date(Some(&json!("yesterday"))), None);
        assert_eq!(normalize_time(Some(&json!("9:05"))), Some("09:05".into()));
        assert_eq!(normalize_time(Some(&json!("24:00"))), None);
        assert_eq!(normalize_time(Some(&json!("09:5"))), None);
    }

    #[test]
    fn test_times_per_day() {
        assert_eq!(normalize_times_per_day(Some(&json!(2.7))), Some(2));
        assert_eq!(normalize_times_per_day(Some(&json!(" 3 "))), Some(3));
        assert_eq!(normalize_times_per_day(Some(&json!(-1))), None);
        assert_eq!(normalize_times_per_day(Some(&json!(""))), None);
    }

    #[test]
    fn test_medication_create_defaults() {
        let input = json!({ "name": " Metformin ", "dosage": "500mg", "frequency": "daily" });
        let med = Medication::create(input.as_object().unwrap(), "2024-05-01").unwrap();
        assert_eq!(med.name, "Metformin");
        assert_eq!(med.times_per_day, Some(1));
        assert_eq!(med.start_date.as_deref(), Some("2024-05-01"));
        assert!(!med.id.is_empty());

        let missing = json!({ "name": "x" });
        assert!(Medication::create(missing.as_object().unwrap(), "2024-05-01").is_err());
    }

    #[test]
    fn test_medication_partial_update() {
        let existing = Medication::from_value(&json!({
            "id": "m1", "name": "A", "dosage": "1", "frequency": "daily",
            "purpose": "pain", "endDate": "2024-12-31"
        }))
        .unwrap();

        let update = json!({ "name": "", "purpose": "", "timesPerDay": 2 });
        let updated = existing.apply_update(update.as_object().unwrap()).unwrap();
        assert_eq!(updated.name, "A");
        assert_eq!(updated.purpose, None);
        assert_eq!(updated.times_per_day, Some(2));
        assert_eq!(updated.end_date.as_deref(), Some("2024-12-31"));
    }

    #[test]
    fn test_appointment_keeps_string_extras() {
        let appt = Appointment::from_value(&json!({
            "id": "a1", "title": "Checkup", "type": "clinic",
            "date": "2024-06-01", "time": "8:30", "doctor": " Dr. Rao ", "priority": 2
        }))
        .unwrap();
        assert_eq!(appt.time, "08:30");
        assert_eq!(appt.extras.get("doctor").map(String::as_str), Some("Dr. Rao"));
        assert!(!appt.extras.contains_key("priority"));

        let serialized = serde_json::to_value(&appt).unwrap();
        assert_eq!(serialized["type"], "clinic");
        assert_eq!(serialized["doctor"], "Dr. Rao");
    }
}
