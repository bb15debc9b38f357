//! Google GenAI API adapter.
//!
//! This module provides the [`GoogleAdapter`] which implements the
//! [`ChatAdapter`](palaver_core::adapter::ChatAdapter) trait for the
//! Google Generative Language API (`generateContent` /
//! `streamGenerateContent`), including SSE streaming support.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::GoogleAdapter;
