//! Engine configuration.
//!
//! Loaded from JSON. Every field has a default, so an empty object (or no file
//! at all) gives a working engine.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::engine_state::vessels::claim::ClaimConfig;
use crate::engine_state::vessels::observer::DEFAULT_OBSERVER_LERP;
use crate::engine_state::voxels::{
    block::{block_type::BlockType, BlockClassifier},
    detector::Connectivity,
    world::WorldBorder,
};

/// Tunables for assembly, vessels, and the tick loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest cluster that may become a vessel
    pub max_vessel_size: usize,
    /// Neighbourhood used by detection
    pub connectivity: Connectivity,
    /// Added on every side of a vessel's bounding volume
    pub bounding_margin: f64,
    /// Voxel count above which bounds are computed in parallel
    pub parallel_threshold: usize,
    /// Largest rotation off the grid, in degrees, at which a vessel may deconstruct
    pub alignment_tolerance_degrees: f64,
    /// Share of the remaining distance an observer replica covers per step
    pub observer_lerp: f64,
    /// Simulated seconds per tick
    pub tick_seconds: f64,
    /// Detection worker threads
    pub worker_threads: usize,
    /// Block kinds treated as empty space by detection and vessels
    pub excluded_blocks: Vec<BlockType>,
    /// Where claims are placed
    pub claims: ClaimConfig,
    /// Horizontal limits for vessels
    pub border: WorldBorder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_vessel_size: 15_000,
            connectivity: Connectivity::default(),
            bounding_margin: 1.6,
            parallel_threshold: 300,
            alignment_tolerance_degrees: 0.5,
            observer_lerp: DEFAULT_OBSERVER_LERP,
            tick_seconds: 0.05,
            worker_threads: 2,
            excluded_blocks: Vec::new(),
            claims: ClaimConfig::default(),
            border: WorldBorder::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Rejects values that would break the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_vessel_size == 0 {
            return Err(ConfigError::Invalid("max_vessel_size must be at least 1".into()));
        }
        if !(self.bounding_margin.is_finite() && self.bounding_margin >= 0.0) {
            return Err(ConfigError::Invalid("bounding_margin must be a non-negative number".into()));
        }
        if !(self.alignment_tolerance_degrees > 0.0 && self.alignment_tolerance_degrees < 180.0) {
            return Err(ConfigError::Invalid(
                "alignment_tolerance_degrees must be in (0, 180)".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.observer_lerp) {
            return Err(ConfigError::Invalid("observer_lerp must be in [0, 1]".into()));
        }
        if !(self.tick_seconds.is_finite() && self.tick_seconds > 0.0) {
            return Err(ConfigError::Invalid("tick_seconds must be positive".into()));
        }
        if self.claims.radius < 0 || self.claims.gap < 0 || self.claims.max_claims == 0 {
            return Err(ConfigError::Invalid(
                "claims need a non-negative radius and gap and at least one slot".into(),
            ));
        }
        if self.border.min_x > self.border.max_x || self.border.min_z > self.border.max_z {
            return Err(ConfigError::Invalid("border minimum exceeds maximum".into()));
        }
        Ok(())
    }

    /// The classifier implied by `excluded_blocks`.
    pub fn classifier(&self) -> BlockClassifier {
        BlockClassifier::new(self.excluded_blocks.iter().copied())
    }
}
