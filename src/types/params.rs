//! Request parameters and the cache key derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Model identifier used when a configuration names no model.
pub const DEFAULT_MODEL_ID: &str = "default";

/// Provider-reported model metadata.
///
/// Flags set here take precedence over the catalog's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model ID as reported by the provider.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub supports_computer_use: Option<bool>,
    #[serde(default)]
    pub supports_images: Option<bool>,
    #[serde(default)]
    pub supports_prompt_cache: Option<bool>,
    #[serde(default)]
    pub context_window: Option<u32>,
}

/// The provider configuration a caller is asking about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Provider name (e.g. `"anthropic"`, `"openrouter"`).
    #[serde(default)]
    pub provider: Option<String>,
    /// Model ID selected in the configuration.
    #[serde(default)]
    pub model_id: Option<String>,
}

impl Configuration {
    /// Configuration selecting `model_id` with no explicit provider.
    pub fn model(model_id: impl Into<String>) -> Self {
        Self {
            provider: None,
            model_id: Some(model_id.into()),
        }
    }

    /// Set the provider name.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Input to [`CapabilityService::determine_capabilities`](crate::CapabilityService::determine_capabilities).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityParams {
    /// Required: validation rejects a request without a configuration.
    #[serde(default)]
    pub configuration: Option<Configuration>,
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
    /// Whether the browser tool is enabled. Part of the cache key.
    #[serde(default)]
    pub browser_enabled: bool,
}

impl CapabilityParams {
    /// Params for a configuration, no model info, browser disabled.
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration: Some(configuration),
            model_info: None,
            browser_enabled: false,
        }
    }

    pub fn model_info(mut self, info: ModelInfo) -> Self {
        self.model_info = Some(info);
        self
    }

    pub fn browser_enabled(mut self, enabled: bool) -> Self {
        self.browser_enabled = enabled;
        self
    }

    /// The model identifier the request resolves to.
    ///
    /// Configuration model ID first, then the provider-reported ID, then
    /// [`DEFAULT_MODEL_ID`]. Surrounding whitespace is ignored.
    pub fn resolved_model_id(&self) -> &str {
        self.configuration
            .as_ref()
            .and_then(|c| c.model_id.as_deref())
            .or_else(|| self.model_info.as_ref().and_then(|m| m.id.as_deref()))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_MODEL_ID)
    }

    /// Key under which this request's result is cached.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.resolved_model_id(), self.browser_enabled)
    }
}

/// Cache key: resolved model ID plus the browser flag.
///
/// Requests with equal keys are cache-equivalent. Displays as
/// `"<model>:<flag>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub model: String,
    pub browser_enabled: bool,
}

impl CacheKey {
    pub fn new(model: impl Into<String>, browser_enabled: bool) -> Self {
        Self {
            model: model.into(),
            browser_enabled,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.browser_enabled)
    }
}
