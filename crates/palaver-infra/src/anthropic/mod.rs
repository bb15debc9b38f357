//! Anthropic Messages API adapter.
//!
//! This module provides the [`AnthropicAdapter`] which implements the
//! [`ChatAdapter`](palaver_core::adapter::ChatAdapter) trait for the
//! Anthropic Messages API, including full SSE streaming support.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::AnthropicAdapter;
