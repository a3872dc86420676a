//! # CRF Configuration

use serde::{Deserialize, Serialize};

/// Default half-width of the uniform range used for fresh transition scores.
pub const DEFAULT_INIT_SCALE: f32 = 0.1;

/// Default seed for transition initialization.
pub const DEFAULT_SEED: u64 = 42;

/// How padding positions beyond a sequence's length are kept out of the DP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingStrategy {
    /// Stop updating a sequence's DP state once its length is reached.
    #[default]
    FreezeAtLength,
    /// Zero the padding emissions and use an identity transition at padding
    /// steps, so the DP state carries through unchanged.
    IdentityTransitions,
}

/// Which transitions are pinned to negative infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionConstraints {
    /// Only the sentinel barriers: nothing enters START, nothing leaves STOP.
    #[default]
    Sentinels,
    /// Sentinel barriers plus every transition the tagging scheme forbids.
    Scheme,
}

/// Configuration for the CRF layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrfConfig {
    /// Padding handling used by the forward algorithm and the decoder
    pub padding: PaddingStrategy,
    /// Barrier mode for the transition matrix
    pub constraints: TransitionConstraints,
    /// Fresh transition scores are drawn from `[-init_scale, init_scale)`
    pub init_scale: f32,
    /// Seed for transition initialization
    pub seed: u64,
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            padding: PaddingStrategy::default(),
            constraints: TransitionConstraints::default(),
            init_scale: DEFAULT_INIT_SCALE,
            seed: DEFAULT_SEED,
        }
    }
}

impl CrfConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the padding strategy.
    pub fn with_padding(mut self, padding: PaddingStrategy) -> Self {
        self.padding = padding;
        self
    }

    /// Set the transition constraint mode.
    pub fn with_constraints(mut self, constraints: TransitionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set the random initialization scale.
    pub fn with_init_scale(mut self, scale: f32) -> Self {
        self.init_scale = scale.abs();
        self
    }

    /// Set the initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
