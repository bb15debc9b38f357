//! Observability setup for the Palaver LLM gateway.
//!
//! Structured logging via `tracing` with optional OpenTelemetry trace
//! export, plus the GenAI semantic-convention attribute names used on
//! dispatch spans.

pub mod genai_attrs;
pub mod tracing_setup;
