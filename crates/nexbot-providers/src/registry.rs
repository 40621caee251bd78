//! Provider registry — maps configuration tags to API endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use nexbot_core::config::ProviderConfig;

use crate::http_provider::HttpProvider;
use crate::traits::Provider;

/// Static description of one provider backend.
#[derive(Clone, Copy, Debug)]
pub struct ProviderSpec {
    /// Configuration tag selecting this backend.
    pub tag: &'static str,
    /// Display name for logging.
    pub display_name: &'static str,
    /// Default chat completions base URL.
    pub default_api_base: &'static str,
    /// Whether the backend accepts tool definitions.
    pub supports_tools: bool,
}

/// Known backends, all OpenAI-compatible.
pub const PROVIDER_SPECS: &[ProviderSpec] = &[
    ProviderSpec {
        tag: "zai",
        display_name: "Z.ai",
        default_api_base: "https://api.z.ai/api/paas/v4",
        supports_tools: true,
    },
    ProviderSpec {
        tag: "openai",
        display_name: "OpenAI",
        default_api_base: "https://api.openai.com/v1",
        supports_tools: true,
    },
    ProviderSpec {
        tag: "openrouter",
        display_name: "OpenRouter",
        default_api_base: "https://openrouter.ai/api/v1",
        supports_tools: true,
    },
    ProviderSpec {
        tag: "deepseek",
        display_name: "DeepSeek",
        default_api_base: "https://api.deepseek.com/v1",
        supports_tools: true,
    },
    ProviderSpec {
        tag: "groq",
        display_name: "Groq",
        default_api_base: "https://api.groq.com/openai/v1",
        supports_tools: true,
    },
];

/// Look up a provider spec by its configuration tag.
pub fn lookup_spec(tag: &str) -> Option<&'static ProviderSpec> {
    PROVIDER_SPECS.iter().find(|s| s.tag == tag)
}

/// Build a provider from a configuration tag and the per-tag settings.
pub fn create_provider(
    tag: &str,
    configs: &HashMap<String, ProviderConfig>,
    model: &str,
) -> Result<Arc<dyn Provider>, String> {
    let spec = lookup_spec(tag).ok_or_else(|| format!("unknown provider tag: {tag}"))?;
    let config = configs.get(tag).cloned().unwrap_or_default();
    if !config.is_configured() {
        return Err(format!("provider '{tag}' has no API key configured"));
    }
    Ok(Arc::new(HttpProvider::new(&config, spec, model)))
}
