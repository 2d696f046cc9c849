//! Care-circle member data: details and record edits
//!
//! Everything here goes through [`authorize_member`] first, so the caller is
//! always the accepted recipient of a family link and the profile is the
//! one the link shares.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::care::activity::{log_activity, ActivityAction, ActivityDomain, ActivityEvent};
use crate::care::policy::{authorize_member, Capability, MemberAccess};
use crate::care::records::{
    parse_appointments, parse_medications, record_items, Appointment, Medication,
    APPOINTMENT_REQUIRED,
};
use crate::db::schemas::{HealthDoc, ProfileDoc, RecordKind};
use crate::store::CareStore;
use crate::types::{CareError, Result};

pub const MEMBER_PROFILE_NOT_FOUND: &str = "Member profile not found.";

const HEALTH_FIELDS: &[&str] = &[
    "date_of_birth",
    "blood_group",
    "bmi",
    "age",
    "current_diagnosed_condition",
    "allergies",
    "ongoing_treatments",
    "current_medication",
    "previous_diagnosed_conditions",
    "past_surgeries",
    "childhood_illness",
    "long_term_treatments",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PersonalInfo {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
}

impl From<&ProfileDoc> for PersonalInfo {
    fn from(profile: &ProfileDoc) -> Self {
        let trimmed = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            display_name: trimmed(&profile.display_name).or_else(|| trimmed(&profile.name)),
            phone: profile.phone.clone(),
            gender: profile.gender.clone(),
            address: profile.address.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberDetails {
    pub personal: PersonalInfo,
    pub health: Option<Map<String, Value>>,
    pub appointments: Vec<Value>,
    pub medications: Vec<Value>,
}

fn health_view(doc: HealthDoc) -> Map<String, Value> {
    HEALTH_FIELDS
        .iter()
        .map(|field| {
            let value = doc.fields.get(*field).cloned().unwrap_or(Value::Null);
            (field.to_string(), value)
        })
        .collect()
}

/// Personal, health and record data for the profile a link shares.
///
/// The three reads run concurrently; any one failing fails the call.
pub async fn member_details(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
) -> Result<MemberDetails> {
    let access = authorize_member(store, user_id, link_id, Capability::ReadHealth).await?;

    let profile = store
        .profile_by_id(&access.owner_profile_id)
        .await?
        .ok_or_else(|| CareError::NotFound(MEMBER_PROFILE_NOT_FOUND.into()))?;
    details_for_profile(store, &profile).await
}

/// Details of an already authorized profile
pub(crate) async fn details_for_profile(store: &dyn CareStore, profile: &ProfileDoc) -> Result<MemberDetails> {
    let (health, appointments, medications) = tokio::try_join!(
        store.health_by_profile(&profile.id),
        store.records(RecordKind::Appointments, &profile.id),
        store.records(RecordKind::Medications, &profile.id),
    )?;

    let items = |doc: Option<crate::db::schemas::RecordListDoc>, kind: RecordKind| {
        doc.map(|d| record_items(d.data, kind.wrapper_key()))
            .unwrap_or_default()
    };

    Ok(MemberDetails {
        personal: PersonalInfo::from(profile),
        health: health.map(health_view),
        appointments: items(appointments, RecordKind::Appointments),
        medications: items(medications, RecordKind::Medications),
    })
}

async fn load_medications(store: &dyn CareStore, profile_id: &str) -> Result<Vec<Medication>> {
    Ok(store
        .records(RecordKind::Medications, profile_id)
        .await?
        .map(|doc| parse_medications(doc.data))
        .unwrap_or_default())
}

async fn load_appointments(store: &dyn CareStore, profile_id: &str) -> Result<Vec<Appointment>> {
    Ok(store
        .records(RecordKind::Appointments, profile_id)
        .await?
        .map(|doc| parse_appointments(doc.data))
        .unwrap_or_default())
}

async fn save<T: Serialize>(
    store: &dyn CareStore,
    kind: RecordKind,
    access: &MemberAccess,
    items: &[T],
) -> Result<()> {
    let data = serde_json::to_value(items).map_err(|e| CareError::Internal(e.to_string()))?;
    store
        .save_records(kind, &access.owner_profile_id, Some(&access.owner_user_id), data)
        .await
}

/// Result of a medication mutation: the touched record plus the new list
#[derive(Debug, Clone, Serialize)]
pub struct MedicationChange {
    pub medication: Option<Medication>,
    pub medications: Vec<Medication>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentChange {
    pub appointment: Option<Appointment>,
    pub appointments: Vec<Appointment>,
}

fn event(
    access: &MemberAccess,
    user_id: &str,
    domain: ActivityDomain,
    action: ActivityAction,
) -> ActivityEvent {
    ActivityEvent::new(access.owner_profile_id.clone(), user_id, domain, action)
        .meta("link_id", access.link.id.clone())
}

pub async fn add_medication(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    input: &Map<String, Value>,
) -> Result<MedicationChange> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let medication = Medication::create(input, &today)?;

    let mut medications = load_medications(store, &access.owner_profile_id).await?;
    if medications.iter().any(|m| m.id == medication.id) {
        return Err(CareError::Conflict("Medication ID already exists.".into()));
    }
    medications.push(medication.clone());
    save(store, RecordKind::Medications, &access, &medications).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Medication, ActivityAction::Add)
            .entity(medication.id.clone(), medication.name.clone()),
    )
    .await;

    Ok(MedicationChange {
        medication: Some(medication),
        medications,
    })
}

pub async fn update_medication(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    input: &Map<String, Value>,
) -> Result<MedicationChange> {
    let medication_id = input
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CareError::BadRequest("medication.id is required.".into()))?
        .to_string();

    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;
    let mut medications = load_medications(store, &access.owner_profile_id).await?;
    let slot = medications
        .iter_mut()
        .find(|m| m.id == medication_id)
        .ok_or_else(|| CareError::NotFound("Medication not found.".into()))?;

    let updated = slot.apply_update(input)?;
    *slot = updated.clone();
    save(store, RecordKind::Medications, &access, &medications).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Medication, ActivityAction::Update)
            .entity(updated.id.clone(), updated.name.clone()),
    )
    .await;

    Ok(MedicationChange {
        medication: Some(updated),
        medications,
    })
}

pub async fn delete_medication(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    medication_id: &str,
) -> Result<MedicationChange> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;
    let mut medications = load_medications(store, &access.owner_profile_id).await?;
    let position = medications
        .iter()
        .position(|m| m.id == medication_id)
        .ok_or_else(|| CareError::NotFound("Medication not found.".into()))?;

    let removed = medications.remove(position);
    save(store, RecordKind::Medications, &access, &medications).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Medication, ActivityAction::Delete)
            .entity(removed.id.clone(), removed.name.clone()),
    )
    .await;

    Ok(MedicationChange {
        medication: None,
        medications,
    })
}

fn parse_appointment(input: &Value) -> Result<Appointment> {
    Appointment::from_value(input).ok_or_else(|| CareError::BadRequest(APPOINTMENT_REQUIRED.into()))
}

pub async fn add_appointment(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    input: &Value,
) -> Result<AppointmentChange> {
    let appointment = parse_appointment(input)?;
    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;

    let mut appointments = load_appointments(store, &access.owner_profile_id).await?;
    if appointments.iter().any(|a| a.id == appointment.id) {
        return Err(CareError::Conflict("Appointment ID already exists.".into()));
    }
    appointments.push(appointment.clone());
    save(store, RecordKind::Appointments, &access, &appointments).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Appointment, ActivityAction::Add)
            .entity(appointment.id.clone(), appointment.title.clone())
            .meta("date", appointment.date.clone()),
    )
    .await;

    Ok(AppointmentChange {
        appointment: Some(appointment),
        appointments,
    })
}

pub async fn update_appointment(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    input: &Value,
) -> Result<AppointmentChange> {
    let appointment = parse_appointment(input)?;
    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;

    let mut appointments = load_appointments(store, &access.owner_profile_id).await?;
    let slot = appointments
        .iter_mut()
        .find(|a| a.id == appointment.id)
        .ok_or_else(|| CareError::NotFound("Appointment not found.".into()))?;
    *slot = appointment.clone();
    save(store, RecordKind::Appointments, &access, &appointments).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Appointment, ActivityAction::Update)
            .entity(appointment.id.clone(), appointment.title.clone())
            .meta("date", appointment.date.clone()),
    )
    .await;

    Ok(AppointmentChange {
        appointment: Some(appointment),
        appointments,
    })
}

pub async fn delete_appointment(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    appointment_id: &str,
) -> Result<AppointmentChange> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageRecords).await?;
    let mut appointments = load_appointments(store, &access.owner_profile_id).await?;
    let position = appointments
        .iter()
        .position(|a| a.id == appointment_id)
        .ok_or_else(|| CareError::NotFound("Appointment not found.".into()))?;

    let removed = appointments.remove(position);
    save(store, RecordKind::Appointments, &access, &appointments).await?;

    log_activity(
        store,
        event(&access, user_id, ActivityDomain::Appointment, ActivityAction::Delete)
            .entity(removed.id.clone(), removed.title.clone()),
    )
    .await;

    Ok(AppointmentChange {
        appointment: None,
        appointments,
    })
}
