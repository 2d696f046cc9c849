//! HTTP server for CareCircle

pub mod http;

pub use http::{run, AppState};
