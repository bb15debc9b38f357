//! Configuration surface consumed by the registry and dispatcher.
//!
//! Loading these from disk or environment is the job of the embedding
//! application; the gateway only defines the shapes and their defaults.
//! Durations travel as `*_ms` integer fields so the structures stay
//! plainly serializable.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backend wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Google,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Google => write!(f, "google"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" => Ok(ProviderKind::Google),
            other => Err(format!("invalid provider kind: '{other}'")),
        }
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total calls = max_retries + 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `base * multiplier^attempt`, capped at `max_delay_ms`. Deliberately
    /// jitter-free so retry schedules are reproducible in tests.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let delay = base * self.multiplier.powi(attempt as i32);
        let delay = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Per-request lifecycle knobs the dispatcher applies uniformly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for a whole request, streaming or not.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// After cancellation, how long already-buffered events may keep
    /// flushing before the terminal marker is forced out.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_cancel_grace_ms() -> u64 {
    2_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Configuration for a single provider backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Logical name requests route by (e.g., "anthropic", "google").
    pub name: String,
    /// Wire protocol this backend speaks.
    pub kind: ProviderKind,
    /// Override the adapter's default base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Reference to the credential in the embedding application's secret
    /// store. The gateway never sees how it is stored.
    #[serde(default)]
    pub api_key_secret_name: Option<String>,
    /// Model registered as an exact match for this provider.
    pub default_model: String,
    /// Additional model patterns (exact, or trailing-`*` prefix wildcard)
    /// this adapter serves.
    #[serde(default)]
    pub model_patterns: Vec<String>,
    /// Per-provider dispatch overrides; the dispatcher's defaults apply
    /// when absent.
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
}

/// Top-level gateway configuration handed in at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}
