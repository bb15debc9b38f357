//! Shared domain types for the Palaver LLM gateway.
//!
//! This crate contains the normalized chat contract all provider adapters
//! conform to (requests, messages, stream events, responses), the shared
//! error taxonomy, and the configuration surface the registry consumes.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.

pub mod chat;
pub mod config;
pub mod error;
