//! Redaction of model and configuration identifiers before logging.

use serde_json::Value;

use crate::HuginnError;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Object keys whose values are always redacted.
const SENSITIVE_KEYS: &[&str] = &[
    "model_id",
    "modelId",
    "api_model_id",
    "apiModelId",
    "configuration",
    "api_key",
    "apiKey",
    "model_info",
    "key",
];

/// Redact a bare identifier. Empty input stays empty.
pub fn redact_identifier(id: &str) -> &'static str {
    if id.is_empty() { "" } else { REDACTED }
}

/// Recursively replace the values of sensitive keys with `"[REDACTED]"`.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if SENSITIVE_KEYS.contains(&k.as_str()) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, redact_value(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

/// Sanitized error message with any echoed identifier removed.
///
/// Resolver-supplied messages (`InvalidModel`, `Capability`,
/// `InvalidCapability`) are replaced wholesale; retry wrappers are
/// redacted down to their root error.
pub fn redact_error(err: &HuginnError) -> String {
    match err {
        HuginnError::InvalidModel(id) => format!("invalid model {}", redact_identifier(id)),
        HuginnError::Capability(msg) => format!("capability error {}", redact_identifier(msg)),
        HuginnError::InvalidCapability(msg) => {
            format!("invalid capability {}", redact_identifier(msg))
        }
        HuginnError::RetryExhausted { attempts, source } => {
            format!("failed after {attempts} attempts {}", redact_error(source))
        }
        other => other.sanitized(),
    }
}
