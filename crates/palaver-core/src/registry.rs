//! Provider registry: routes (provider, model) pairs to adapters.
//!
//! Built once at startup through [`RegistryBuilder`], immutable
//! afterwards. Lookups are pure and need no lock; the registry is shared
//! behind an `Arc` across request tasks.
//!
//! Model patterns are either exact strings or trailing-`*` prefix
//! wildcards (`"*"` matches everything). An exact match always beats a
//! wildcard; among wildcards, the longest prefix wins. Duplicate
//! `(provider, pattern)` registrations are rejected when the registry is
//! built, so resolution ambiguity is a startup error and never a
//! request-time one.

use std::collections::HashMap;
use std::sync::Arc;

use palaver_types::error::GatewayError;

use super::box_adapter::BoxChatAdapter;

/// Model routing table for one provider.
struct ModelTable {
    exact: HashMap<String, Arc<BoxChatAdapter>>,
    /// (prefix, adapter), sorted longest prefix first.
    wildcards: Vec<(String, Arc<BoxChatAdapter>)>,
}

/// Append-only builder for [`ProviderRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, String, Arc<BoxChatAdapter>)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for a `(provider, model pattern)` pair.
    ///
    /// One adapter instance usually serves several patterns; pass it as
    /// an `Arc` and register it repeatedly.
    pub fn register(
        mut self,
        provider: impl Into<String>,
        pattern: impl Into<String>,
        adapter: Arc<BoxChatAdapter>,
    ) -> Self {
        self.entries.push((provider.into(), pattern.into(), adapter));
        self
    }

    /// Validate the accumulated entries and freeze them into a registry.
    ///
    /// Fails on an empty pattern or a duplicate `(provider, pattern)`
    /// pair -- both are configuration errors that must surface before any
    /// request is served.
    pub fn build(self) -> Result<ProviderRegistry, GatewayError> {
        let mut providers: HashMap<String, ModelTable> = HashMap::new();

        for (provider, pattern, adapter) in self.entries {
            if pattern.is_empty() {
                return Err(GatewayError::InvalidRequest(format!(
                    "empty model pattern registered for provider '{provider}'"
                )));
            }

            let table = providers.entry(provider.clone()).or_insert_with(|| ModelTable {
                exact: HashMap::new(),
                wildcards: Vec::new(),
            });

            if let Some(prefix) = pattern.strip_suffix('*') {
                if table.wildcards.iter().any(|(p, _)| p == prefix) {
                    return Err(GatewayError::InvalidRequest(format!(
                        "duplicate model pattern '{pattern}' for provider '{provider}'"
                    )));
                }
                table.wildcards.push((prefix.to_string(), adapter));
            } else if table.exact.insert(pattern.clone(), adapter).is_some() {
                return Err(GatewayError::InvalidRequest(format!(
                    "duplicate model pattern '{pattern}' for provider '{provider}'"
                )));
            }
        }

        for table in providers.values_mut() {
            table
                .wildcards
                .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }

        Ok(ProviderRegistry { providers })
    }
}

/// Immutable routing table from (provider, model) to adapter.
pub struct ProviderRegistry {
    providers: HashMap<String, ModelTable>,
}

impl ProviderRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve the adapter serving `(provider, model)`.
    ///
    /// Exact model match wins over wildcard match. Fails with
    /// [`GatewayError::UnknownProvider`] or [`GatewayError::UnknownModel`]
    /// before any network I/O happens.
    pub fn resolve(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<&Arc<BoxChatAdapter>, GatewayError> {
        let table = self
            .providers
            .get(provider)
            .ok_or_else(|| GatewayError::UnknownProvider {
                provider: provider.to_string(),
            })?;

        if let Some(adapter) = table.exact.get(model) {
            return Ok(adapter);
        }

        table
            .wildcards
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, adapter)| adapter)
            .ok_or_else(|| GatewayError::UnknownModel {
                provider: provider.to_string(),
                model: model.to_string(),
            })
    }

    /// Names of all registered providers.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}
