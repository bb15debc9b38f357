//! Adapter implementations for the Palaver LLM gateway.
//!
//! Contains concrete implementations of the [`ChatAdapter`] trait defined
//! in `palaver-core`: the Anthropic Messages API and the Google GenAI
//! API, both with SSE streaming. Also provides an adapter factory
//! ([`create_adapter`]) that constructs the right adapter from a
//! [`ProviderConfig`], and [`build_registry`] which wires a full
//! configuration into a ready-to-serve registry.

pub mod anthropic;
pub mod google;

use std::sync::Arc;

use secrecy::SecretString;

use palaver_core::box_adapter::BoxChatAdapter;
use palaver_core::registry::{ProviderRegistry, RegistryBuilder};
use palaver_types::config::{ProviderConfig, ProviderKind};
use palaver_types::error::GatewayError;

use self::anthropic::AnthropicAdapter;
use self::google::GoogleAdapter;

/// Create a [`BoxChatAdapter`] from a [`ProviderConfig`].
///
/// Matches on the provider kind to construct the appropriate concrete
/// adapter, honoring a `base_url` override when the configuration
/// carries one. The API key must already be resolved by the embedding
/// application's secret store.
pub fn create_adapter(
    config: &ProviderConfig,
    api_key: SecretString,
) -> Result<BoxChatAdapter, GatewayError> {
    match config.kind {
        ProviderKind::Anthropic => {
            let mut adapter = AnthropicAdapter::new(api_key);
            if let Some(base_url) = &config.base_url {
                adapter = adapter.with_base_url(base_url.clone());
            }
            Ok(BoxChatAdapter::new(adapter))
        }
        ProviderKind::Google => {
            let mut adapter = GoogleAdapter::new(api_key);
            if let Some(base_url) = &config.base_url {
                adapter = adapter.with_base_url(base_url.clone());
            }
            Ok(BoxChatAdapter::new(adapter))
        }
    }
}

/// Build a frozen [`ProviderRegistry`] from provider configurations.
///
/// Each provider's default model registers as an exact entry and its
/// `model_patterns` register verbatim. `resolve_key` maps a credential
/// reference name to the secret value; a provider whose reference cannot
/// be resolved fails registry construction with
/// [`GatewayError::AuthFailure`] -- better at startup than on the first
/// request.
pub fn build_registry(
    configs: &[ProviderConfig],
    resolve_key: impl Fn(&str) -> Option<SecretString>,
) -> Result<ProviderRegistry, GatewayError> {
    let mut builder = RegistryBuilder::new();

    for config in configs {
        let api_key = match &config.api_key_secret_name {
            Some(reference) => resolve_key(reference).ok_or(GatewayError::AuthFailure)?,
            None => return Err(GatewayError::AuthFailure),
        };

        let adapter = Arc::new(create_adapter(config, api_key)?);
        builder = builder.register(
            config.name.as_str(),
            config.default_model.as_str(),
            Arc::clone(&adapter),
        );
        for pattern in &config.model_patterns {
            builder = builder.register(config.name.as_str(), pattern.as_str(), Arc::clone(&adapter));
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config(kind: ProviderKind, name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind,
            base_url: None,
            api_key_secret_name: Some(format!("{name}_api_key")),
            default_model: "model-x".to_string(),
            model_patterns: vec!["model-*".to_string()],
            dispatch: None,
        }
    }

    #[test]
    fn test_create_adapter_by_kind() {
        let anthropic = create_adapter(
            &provider_config(ProviderKind::Anthropic, "anthropic"),
            SecretString::from("test-key-not-real"),
        )
        .unwrap();
        assert_eq!(anthropic.name(), "anthropic");

        let google = create_adapter(
            &provider_config(ProviderKind::Google, "google"),
            SecretString::from("test-key-not-real"),
        )
        .unwrap();
        assert_eq!(google.name(), "google");
    }

    #[test]
    fn test_build_registry_resolves_default_model_and_patterns() {
        let configs = vec![
            provider_config(ProviderKind::Anthropic, "anthropic"),
            provider_config(ProviderKind::Google, "google"),
        ];
        let registry =
            build_registry(&configs, |_| Some(SecretString::from("test-key"))).unwrap();

        assert_eq!(
            registry.resolve("anthropic", "model-x").unwrap().name(),
            "anthropic"
        );
        assert_eq!(
            registry.resolve("google", "model-y").unwrap().name(),
            "google"
        );
        assert!(registry.resolve("google", "other").is_err());
    }

    #[test]
    fn test_build_registry_fails_on_unresolvable_key() {
        let configs = vec![provider_config(ProviderKind::Anthropic, "anthropic")];
        let result = build_registry(&configs, |_| None);
        assert!(matches!(result, Err(GatewayError::AuthFailure)));
    }

    #[test]
    fn test_build_registry_fails_without_key_reference() {
        let mut config = provider_config(ProviderKind::Anthropic, "anthropic");
        config.api_key_secret_name = None;
        let result = build_registry(&[config], |_| Some(SecretString::from("unused")));
        assert!(matches!(result, Err(GatewayError::AuthFailure)));
    }
}
