//! Care-circle domain logic
//!
//! Relationship resolution, access policy and audit logging over a
//! [`CareStore`](crate::store::CareStore). Route handlers stay thin: they
//! parse input, call into here and shape the JSON response.

pub mod activity;
pub mod circle;
pub mod family;
pub mod health;
pub mod manage;
pub mod member_vault;
pub mod members;
pub mod notifications;
pub mod policy;
pub mod profile;
pub mod records;
pub mod relationship;

#[cfg(test)]
pub(crate) mod fixtures;
