//! Self-reported health profile
//!
//! The owner fills in vitals and history once; age and BMI are derived on
//! save and stored next to the raw values.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::care::profile::select_profile;
use crate::store::CareStore;
use crate::types::{CareError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CurrentMedication {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PastSurgery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub month: Option<Value>,
    #[serde(default)]
    pub year: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProfileInput {
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub current_diagnosed_condition: Option<Vec<String>>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub ongoing_treatments: Option<Vec<String>>,
    #[serde(default)]
    pub current_medication: Option<Vec<CurrentMedication>>,
    #[serde(default)]
    pub previous_diagnosed_conditions: Option<Vec<String>>,
    #[serde(default)]
    pub past_surgeries: Option<Vec<PastSurgery>>,
    #[serde(default)]
    pub childhood_illness: Option<Vec<String>>,
    #[serde(default)]
    pub long_term_treatments: Option<Vec<String>>,
}

/// Whole years between `dob` and `today`; `None` outside 0..=130
pub fn compute_age(dob: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    u32::try_from(age).ok().filter(|a| *a <= 130)
}

/// BMI to one decimal; `None` for implausible height or weight
pub fn compute_bmi(height_cm: f64, weight_kg: f64) -> Option<f64> {
    if !(50.0..=260.0).contains(&height_cm) || !(10.0..=400.0).contains(&weight_kg) {
        return None;
    }
    let meters = height_cm / 100.0;
    Some((weight_kg / (meters * meters) * 10.0).round() / 10.0)
}

fn clean_list(items: Option<Vec<String>>) -> Value {
    let items: Vec<String> = items
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        Value::Null
    } else {
        json!(items)
    }
}

fn named<T: Serialize>(items: Option<Vec<T>>, name: impl Fn(&T) -> &str) -> Value {
    let kept: Vec<&T> = items
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|item| !name(item).trim().is_empty())
        .collect();
    if kept.is_empty() {
        Value::Null
    } else {
        json!(kept)
    }
}

fn positive(value: Option<f64>, message: &str) -> Result<f64> {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| CareError::BadRequest(message.into()))
}

/// Validate the input and turn it into the stored health columns
pub fn health_fields(input: HealthProfileInput, today: NaiveDate) -> Result<Map<String, Value>> {
    let dob = input
        .date_of_birth
        .as_deref()
        .map(str::trim)
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .ok_or_else(|| CareError::BadRequest("DOB is required (YYYY-MM-DD)".into()))?;
    let blood_group = input
        .blood_group
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| CareError::BadRequest("Blood group is required".into()))?
        .to_string();
    let height_cm = positive(input.height_cm, "Height is required")?;
    let weight_kg = positive(input.weight_kg, "Weight is required")?;

    let mut fields = Map::new();
    fields.insert("date_of_birth".into(), json!(dob.format("%Y-%m-%d").to_string()));
    fields.insert("blood_group".into(), json!(blood_group));
    fields.insert("height_cm".into(), json!(height_cm));
    fields.insert("weight_kg".into(), json!(weight_kg));
    fields.insert("age".into(), json!(compute_age(dob, today)));
    fields.insert("bmi".into(), json!(compute_bmi(height_cm, weight_kg)));
    fields.insert(
        "current_diagnosed_condition".into(),
        clean_list(input.current_diagnosed_condition),
    );
    fields.insert("allergies".into(), clean_list(input.allergies));
    fields.insert("ongoing_treatments".into(), clean_list(input.ongoing_treatments));
    fields.insert(
        "current_medication".into(),
        named(input.current_medication, |m| m.name.as_str()),
    );
    fields.insert(
        "previous_diagnosed_conditions".into(),
        clean_list(input.previous_diagnosed_conditions),
    );
    fields.insert(
        "past_surgeries".into(),
        named(input.past_surgeries, |s| s.name.as_str()),
    );
    fields.insert("childhood_illness".into(), clean_list(input.childhood_illness));
    fields.insert("long_term_treatments".into(), clean_list(input.long_term_treatments));
    Ok(fields)
}

/// Save the health profile of an owned profile (the preferred one by default)
pub async fn save_health_profile(
    store: &dyn CareStore,
    user_id: &str,
    mut input: HealthProfileInput,
) -> Result<()> {
    let requested = input.profile_id.take();
    let fields = health_fields(input, Utc::now().date_naive())?;
    let profile = select_profile(store, user_id, requested.as_deref())
        .await?
        .ok_or_else(|| CareError::NotFound("Profile not found.".into()))?;

    store.upsert_health(&profile.id, user_id, fields).await?;
    info!(profile_id = %profile.id, "Health profile saved");
    Ok(())
}
