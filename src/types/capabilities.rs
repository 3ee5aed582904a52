//! Model capability reporting

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HuginnError;

/// A feature a model/configuration may support.
///
/// Closed set: adding a capability is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Driving a browser or desktop via screenshots and input events.
    ComputerUse,
    /// Understanding image inputs.
    ImageAnalysis,
    /// Provider-side prompt caching.
    PromptCaching,
    /// Extended reasoning with a token budget.
    Reasoning,
    /// Tool/function calling.
    ToolUse,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 5] = [
        Capability::ComputerUse,
        Capability::ImageAnalysis,
        Capability::PromptCaching,
        Capability::Reasoning,
        Capability::ToolUse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComputerUse => "computer_use",
            Self::ImageAnalysis => "image_analysis",
            Self::PromptCaching => "prompt_caching",
            Self::Reasoning => "reasoning",
            Self::ToolUse => "tool_use",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = HuginnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| HuginnError::InvalidCapability(s.to_string()))
    }
}

/// How strongly a capability is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStrength {
    #[default]
    Basic,
    Advanced,
}

/// The capabilities a model/configuration supports.
///
/// Treated as an immutable value once built: the service hands out clones
/// and never mutates a set after caching it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    supported: BTreeSet<Capability>,
    versions: BTreeMap<Capability, String>,
    strengths: BTreeMap<Capability, CapabilityStrength>,
}

impl CapabilitySet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability at `Basic` strength, version `"1.0"`.
    pub fn with(self, capability: Capability) -> Self {
        self.with_details(capability, "1.0", CapabilityStrength::Basic)
    }

    /// Add a capability with an explicit version and strength.
    pub fn with_details(
        mut self,
        capability: Capability,
        version: impl Into<String>,
        strength: CapabilityStrength,
    ) -> Self {
        self.supported.insert(capability);
        self.versions.insert(capability, version.into());
        self.strengths.insert(capability, strength);
        self
    }

    /// Drop a capability, if present.
    pub fn without(mut self, capability: Capability) -> Self {
        self.supported.remove(&capability);
        self.versions.remove(&capability);
        self.strengths.remove(&capability);
        self
    }

    /// Whether `capability` is supported.
    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(&capability)
    }

    /// Version string for a supported capability.
    pub fn version(&self, capability: Capability) -> Option<&str> {
        self.versions.get(&capability).map(String::as_str)
    }

    /// Strength of a supported capability.
    pub fn strength(&self, capability: Capability) -> Option<CapabilityStrength> {
        self.strengths.get(&capability).copied()
    }

    /// Supported capabilities in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.supported.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.supported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supported.is_empty()
    }

    /// Merge capabilities using OR logic. Where both sets carry a
    /// capability, the stronger entry wins.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for cap in other.iter() {
            let theirs = other.strength(cap).unwrap_or_default();
            let replace = match merged.strength(cap) {
                None => true,
                Some(ours) => ours == CapabilityStrength::Basic && theirs == CapabilityStrength::Advanced,
            };
            if replace {
                let version = other.version(cap).unwrap_or("1.0").to_string();
                merged = merged.with_details(cap, version, theirs);
            }
        }
        merged
    }
}
