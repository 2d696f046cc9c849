//! Outbound proxies to external services

pub mod assistant;

pub use assistant::{AssistantProxy, AssistantReply, Attempt};
