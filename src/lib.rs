//! CareCircle - shared health records for families and friends
//!
//! An HTTP API where users keep medical profiles, invite others into a
//! care circle by phone number, and share records and vault documents
//! with the members they trust.
//!
//! ## Services
//!
//! - **Auth**: email/password and phone OTP sessions
//! - **Care circle**: invites, roles and shared-profile access
//! - **Vault**: medical documents behind short-lived signed URLs
//! - **Activity**: per-profile audit feed of member changes
//! - **Assistant**: relay to the chatbot backend
//! - **SOS**: emergency texts to saved contacts

pub mod auth;
pub mod care;
pub mod config;
pub mod db;
pub mod proxy;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod sms;
pub mod store;
pub mod types;
pub mod vault;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CareError, Result};
