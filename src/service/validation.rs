//! Input validation for capability requests.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::CapabilityParams;
use crate::{HuginnError, Result};

/// Markup, shell metacharacters, control characters, script URIs and path
/// traversal. Model IDs legitimately contain `/ . : - _ @`, so those pass.
static INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[<>"'`;$\\{}|&]|\p{Cc}|javascript:|data:|\.\./"#)
        .expect("valid injection regex")
});

/// Limits applied to every request before any other work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Maximum serialized size of the whole request. Default: 100 KiB.
    pub max_payload_bytes: usize,
    /// Maximum length of a model or provider identifier. Default: 256.
    pub max_identifier_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 100 * 1024,
            max_identifier_len: 256,
        }
    }
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn max_identifier_len(mut self, len: usize) -> Self {
        self.max_identifier_len = len;
        self
    }
}

/// Whether `value` contains anything matching the injection pattern.
pub fn contains_injection(value: &str) -> bool {
    INJECTION_RE.is_match(value)
}

/// Check a request against `config`.
///
/// The configuration must be present, the model and provider identifiers
/// must be short and free of injection patterns, and the serialized request
/// must fit the payload limit.
pub fn validate_params(params: &CapabilityParams, config: &ValidationConfig) -> Result<()> {
    let Some(configuration) = &params.configuration else {
        return Err(HuginnError::Validation {
            field: "configuration",
            reason: "is required".into(),
        });
    };

    check_identifier("model_id", params.resolved_model_id(), config)?;
    if let Some(provider) = &configuration.provider {
        check_identifier("provider", provider, config)?;
    }

    let payload = serde_json::to_vec(params)?.len();
    if payload > config.max_payload_bytes {
        return Err(HuginnError::Validation {
            field: "params",
            reason: format!(
                "payload of {payload} bytes exceeds {} bytes",
                config.max_payload_bytes
            ),
        });
    }
    Ok(())
}

fn check_identifier(field: &'static str, value: &str, config: &ValidationConfig) -> Result<()> {
    let len = value.chars().count();
    if len > config.max_identifier_len {
        return Err(HuginnError::Validation {
            field,
            reason: format!("length {len} exceeds {}", config.max_identifier_len),
        });
    }
    if contains_injection(value) {
        return Err(HuginnError::Validation {
            field,
            reason: "contains disallowed characters".into(),
        });
    }
    Ok(())
}
