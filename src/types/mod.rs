//! Public types for the Huginn API.

mod capabilities;
mod params;

pub use capabilities::{Capability, CapabilitySet, CapabilityStrength};
pub use params::{CacheKey, CapabilityParams, Configuration, DEFAULT_MODEL_ID, ModelInfo};
