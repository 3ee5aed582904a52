//! Capability resolvers: the downstream lookup the service protects.
//!
//! [`CapabilityResolver`] is the seam the host application plugs into. The
//! service treats every error it returns the same way: retried per
//! [`RetryConfig`](crate::RetryConfig), counted by the circuit breaker.
//!
//! [`CatalogResolver`] is the built-in implementation: a prefix table from
//! model ID to capability set, adjusted by provider-reported [`ModelInfo`]
//! flags and the browser flag.
//!
//! ```rust
//! use huginn::{Capability, CapabilityParams, CapabilityResolver, CatalogResolver, Configuration};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> huginn::Result<()> {
//! let resolver = CatalogResolver::new();
//! let params = CapabilityParams::new(Configuration::model("anthropic/claude-sonnet-4"))
//!     .browser_enabled(true);
//! let caps = resolver.resolve(&params).await?;
//! assert!(caps.supports(Capability::ComputerUse));
//! # Ok(())
//! # }
//! ```
//!
//! [`ModelInfo`]: crate::ModelInfo

use async_trait::async_trait;

use crate::types::{Capability, CapabilityParams, CapabilitySet, CapabilityStrength};
use crate::{HuginnError, Result};

/// Maps a request to the capabilities it supports.
///
/// Implementations should be deterministic: the service caches results by
/// [`CacheKey`](crate::CacheKey), so two requests with the same key must
/// resolve to the same set.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    /// Resolver name for logging/debugging.
    fn name(&self) -> &str;

    /// Resolve the capability set for `params`.
    async fn resolve(&self, params: &CapabilityParams) -> Result<CapabilitySet>;
}

use Capability::*;
use CapabilityStrength::{Advanced, Basic};

struct CatalogEntry {
    prefix: &'static str,
    capabilities: &'static [(Capability, CapabilityStrength)],
}

/// Capabilities for models the catalog does not know.
const DEFAULT_CAPABILITIES: &[(Capability, CapabilityStrength)] = &[(ToolUse, Basic)];

/// Ordered from most-specific to least-specific prefix; first match wins.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        prefix: "claude-opus-4",
        capabilities: &[
            (ComputerUse, Advanced),
            (ImageAnalysis, Advanced),
            (PromptCaching, Basic),
            (Reasoning, Advanced),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "claude-sonnet-4",
        capabilities: &[
            (ComputerUse, Advanced),
            (ImageAnalysis, Advanced),
            (PromptCaching, Basic),
            (Reasoning, Advanced),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "claude-haiku-4",
        capabilities: &[
            (ComputerUse, Basic),
            (ImageAnalysis, Basic),
            (PromptCaching, Basic),
            (Reasoning, Basic),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "claude-3-7-sonnet",
        capabilities: &[
            (ComputerUse, Advanced),
            (ImageAnalysis, Advanced),
            (PromptCaching, Basic),
            (Reasoning, Basic),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "claude-3-5-sonnet",
        capabilities: &[
            (ComputerUse, Basic),
            (ImageAnalysis, Advanced),
            (PromptCaching, Basic),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "claude-3-5-haiku",
        capabilities: &[(PromptCaching, Basic), (ToolUse, Basic)],
    },
    CatalogEntry {
        prefix: "claude",
        capabilities: &[(ImageAnalysis, Basic), (ToolUse, Basic)],
    },
    CatalogEntry {
        prefix: "gpt-4o",
        capabilities: &[(ImageAnalysis, Advanced), (ToolUse, Advanced)],
    },
    CatalogEntry {
        prefix: "gpt-4.1",
        capabilities: &[(ImageAnalysis, Advanced), (ToolUse, Advanced)],
    },
    CatalogEntry {
        prefix: "gpt-4",
        capabilities: &[(ToolUse, Basic)],
    },
    CatalogEntry {
        prefix: "o1",
        capabilities: &[(ImageAnalysis, Basic), (Reasoning, Advanced), (ToolUse, Basic)],
    },
    CatalogEntry {
        prefix: "o3",
        capabilities: &[(ImageAnalysis, Basic), (Reasoning, Advanced), (ToolUse, Advanced)],
    },
    CatalogEntry {
        prefix: "o4-mini",
        capabilities: &[(ImageAnalysis, Basic), (Reasoning, Advanced), (ToolUse, Advanced)],
    },
    CatalogEntry {
        prefix: "gemini-2.5",
        capabilities: &[
            (ImageAnalysis, Advanced),
            (PromptCaching, Basic),
            (Reasoning, Advanced),
            (ToolUse, Advanced),
        ],
    },
    CatalogEntry {
        prefix: "gemini",
        capabilities: &[(ImageAnalysis, Basic), (ToolUse, Basic)],
    },
    CatalogEntry {
        prefix: "deepseek-r1",
        capabilities: &[(Reasoning, Advanced)],
    },
    CatalogEntry {
        prefix: "deepseek-reasoner",
        capabilities: &[(Reasoning, Advanced), (ToolUse, Basic)],
    },
];

/// Prefix-table resolver.
///
/// Lookup strips up to two provider routing prefixes
/// (`openrouter/anthropic/claude-...`), then takes the first catalog entry
/// whose prefix matches. Explicit [`ModelInfo`](crate::ModelInfo) flags
/// override the catalog, and computer use is withheld unless the browser
/// is enabled.
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    strict: bool,
}

impl CatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject models the catalog does not know with `InvalidModel` instead
    /// of falling back to the default capabilities.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Catalog capabilities for a bare or provider-prefixed model ID.
    pub fn lookup(&self, model_id: &str) -> Option<CapabilitySet> {
        let bare = strip_provider_prefix(model_id.trim()).to_ascii_lowercase();
        CATALOG
            .iter()
            .find(|entry| bare.starts_with(entry.prefix))
            .map(|entry| build_set(entry.capabilities))
    }
}

#[async_trait]
impl CapabilityResolver for CatalogResolver {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn resolve(&self, params: &CapabilityParams) -> Result<CapabilitySet> {
        let model_id = params.resolved_model_id();
        let mut caps = match self.lookup(model_id) {
            Some(caps) => caps,
            None if self.strict => return Err(HuginnError::InvalidModel(model_id.to_string())),
            None => build_set(DEFAULT_CAPABILITIES),
        };

        if let Some(info) = &params.model_info {
            caps = apply_flag(caps, ComputerUse, info.supports_computer_use);
            caps = apply_flag(caps, ImageAnalysis, info.supports_images);
            caps = apply_flag(caps, PromptCaching, info.supports_prompt_cache);
        }
        if !params.browser_enabled {
            caps = caps.without(ComputerUse);
        }
        Ok(caps)
    }
}

fn build_set(entries: &[(Capability, CapabilityStrength)]) -> CapabilitySet {
    entries
        .iter()
        .fold(CapabilitySet::new(), |set, &(cap, strength)| {
            set.with_details(cap, "1.0", strength)
        })
}

fn apply_flag(caps: CapabilitySet, capability: Capability, flag: Option<bool>) -> CapabilitySet {
    match flag {
        Some(true) if !caps.supports(capability) => caps.with(capability),
        Some(false) => caps.without(capability),
        _ => caps,
    }
}

fn strip_provider_prefix(model_id: &str) -> &str {
    const PROVIDERS: &[&str] = &[
        "openrouter/",
        "anthropic/",
        "openai/",
        "google/",
        "bedrock/",
        "vertex/",
        "deepseek/",
        "together/",
        "groq/",
    ];

    let mut name = model_id;
    for _ in 0..2 {
        match PROVIDERS.iter().find_map(|p| name.strip_prefix(p)) {
            Some(rest) => name = rest,
            None => break,
        }
    }
    name
}
