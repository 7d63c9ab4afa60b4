use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::{LlmProvider, StreamSink};
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// The two places the loop talks to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Planner,
    Extractor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Planner => "planner",
            Role::Extractor => "extractor",
        })
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active: llm_config.active_provider.clone(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            PilotError::Config(format!("Active provider '{}' not found in registry", self.active))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider and call configuration for a loop role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature and `stream = true`
    pub fn call_config_for_role(&self, role: Role) -> PilotResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry: Option<&RoleEntry> = match role {
            Role::Planner => self.llm_config.roles.planner.as_ref(),
            Role::Extractor => self.llm_config.roles.extractor.as_ref(),
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                PilotError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role, entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = %role,
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                    max_tokens: entry.max_tokens,
                },
            ));
        }

        // Fallback: active provider, provider-level defaults
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature) = entry
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = %role,
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: true,
                temperature,
                max_tokens: None,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `SCREENPILOT_<ID>_API_KEY`,
    /// falling back to `api_key` in the provider entry.
    pub fn from_config(config: &AppConfig, sink: Option<StreamSink>) -> Self {
        let mut registry = Self::new(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_env(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, env = %api_key_env(id), "no API key configured");
            }
            let provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key, sink.clone());
            registry.register(Arc::new(provider));
        }
        registry
    }
}

pub fn api_key_env(provider_id: &str) -> String {
    format!("SCREENPILOT_{}_API_KEY", provider_id.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const CONFIG: &str = r#"
        [llm]
        active_provider = "openai"

        [llm.providers.openai]
        display_name = "OpenAI"
        api_base = "https://api.openai.com/v1/chat/completions"
        model = "gpt-4o"
        temperature = 0.3

        [llm.providers.local]
        display_name = "Local"
        api_base = "http://localhost:8000/v1/chat/completions"
        model = "qwen"

        [llm.roles.extractor]
        provider = "local"
        model = "qwen-tools"
        stream = false
        max_tokens = 512
    "#;

    #[test]
    fn configured_role_uses_its_provider_and_model() {
        let cfg = parse_config(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&cfg, None);
        let (provider, call) = registry.call_config_for_role(Role::Extractor).unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(call.model, "qwen-tools");
        assert!(!call.stream);
        assert_eq!(call.max_tokens, Some(512));
        assert!((call.temperature - 0.1).abs() < 1e-9);
    }

    #[test]
    fn missing_role_falls_back_to_active_provider() {
        let cfg = parse_config(CONFIG).unwrap();
        let registry = ProviderRegistry::from_config(&cfg, None);
        let (provider, call) = registry.call_config_for_role(Role::Planner).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(call.model, "gpt-4o");
        assert!(call.stream);
        assert!((call.temperature - 0.3).abs() < 1e-9);
        assert_eq!(registry.list_names(), vec!["local", "openai"]);
    }

    #[test]
    fn unknown_active_provider_is_config_error() {
        let registry = ProviderRegistry::new(LlmConfig {
            active_provider: "nope".into(),
            ..LlmConfig::default()
        });
        assert!(matches!(
            registry.call_config_for_role(Role::Planner),
            Err(PilotError::Config(_))
        ));
    }

    #[test]
    fn api_key_env_name() {
        assert_eq!(api_key_env("openai"), "SCREENPILOT_OPENAI_API_KEY");
    }
}
