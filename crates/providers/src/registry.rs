//! Provider registry.
//!
//! Constructs and holds all configured LLM backend adapters, keyed by
//! the model name they serve (the router resolves a tier to a model
//! name, then looks the provider up here). Failed constructions are
//! recorded and skipped rather than aborting startup.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use crate::util::mask_secrets;
use px_domain::config::{ProviderConfig, ProviderKind};
use px_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub model: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Holds all instantiated LLM providers, keyed by model name.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from the configured backend list.
    ///
    /// `timeout` is the per-call provider deadline from the agent
    /// config; each adapter bakes it into its HTTP client.
    pub fn from_configs(configs: &[ProviderConfig], timeout: Duration) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for pc in configs {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => AnthropicProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(model = %pc.model, kind = ?pc.kind, "provider initialized");
                    providers.insert(pc.model.clone(), provider);
                }
                Err(e) => {
                    let masked = mask_secrets(&e.to_string());
                    tracing::warn!(model = %pc.model, error = %masked, "provider init failed");
                    init_errors.push(ProviderInitError {
                        model: pc.model.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: masked,
                    });
                }
            }
        }

        Self {
            providers,
            init_errors,
        }
    }

    /// Build from pre-constructed providers (useful for testing).
    pub fn from_providers(providers: HashMap<String, Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers,
            init_errors: Vec::new(),
        }
    }

    /// Look up the provider serving `model`.
    pub fn get(&self, model: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(model)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no provider registered for model '{model}'")))
    }

    /// Providers that failed to initialize, for readiness reporting.
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_a_config_error() {
        let registry = ProviderRegistry::from_providers(HashMap::new());
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn from_configs_registers_by_model_name() {
        let configs = vec![ProviderConfig {
            model: "gpt-4o".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            api_key: "k".into(),
            keep_model_prefix: false,
        }];
        let registry = ProviderRegistry::from_configs(&configs, Duration::from_secs(5));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("gpt-4o").is_ok());
        assert!(registry.init_errors().is_empty());
    }
}
