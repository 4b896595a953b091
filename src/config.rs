//! Tracker tuning parameters.
//!
//! Defaults: Q = 0.001·I, R = 0.1·I,
//! P₀ = 10·I, weighted circular initialiser, simple covariance update.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
pub use crate::filters::CovarianceUpdate;
use crate::positioning::InitialiserMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Diagonal of Q [m²]
    pub process_noise: f64,
    /// Diagonal of R [m²]
    pub measurement_noise: f64,
    /// Diagonal of P₀ [m²]
    pub initial_covariance: f64,
    pub initialiser: InitialiserMethod,
    pub covariance_update: CovarianceUpdate,
    /// Off-diagonal mismatch of P above which it is re-symmetrised
    pub symmetry_tolerance: f64,
    /// Largest accepted ‖Δx‖ per update [m]
    pub divergence_bound: f64,
    /// Reciprocal condition floor for the closed-form initialisers
    pub min_condition: f64,
    /// Consecutive divergent ticks before re-initialising
    pub max_consecutive_divergences: u32,
    /// Run an EKF update on the batch that initialised the session
    pub update_on_first_tick: bool,
    /// Keep the previous tick's anchors while they are all still heard
    pub stabilise_anchor_set: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.001,
            measurement_noise: 0.1,
            initial_covariance: 10.0,
            initialiser: InitialiserMethod::WeightedCircular,
            covariance_update: CovarianceUpdate::Simple,
            symmetry_tolerance: 1e-9,
            divergence_bound: 1e6,
            min_condition: 1e-8,
            max_consecutive_divergences: 3,
            update_on_first_tick: true,
            stabilise_anchor_set: false,
        }
    }
}

impl TrackerConfig {
    /// Loads and validates a JSON config. Missing fields take their defaults.
    pub fn from_json(path: &Path) -> TrackerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Storage(format!("reading {}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&contents)
            .map_err(|e| TrackerError::invalid_config("(file)", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self, path: &Path) -> TrackerResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if !(self.process_noise >= 0.0) || !self.process_noise.is_finite() {
            return Err(TrackerError::invalid_config("process_noise", "must be finite and >= 0"));
        }
        if !(self.measurement_noise > 0.0) || !self.measurement_noise.is_finite() {
            return Err(TrackerError::invalid_config(
                "measurement_noise",
                "must be finite and > 0",
            ));
        }
        if !(self.initial_covariance > 0.0) || !self.initial_covariance.is_finite() {
            return Err(TrackerError::invalid_config(
                "initial_covariance",
                "must be finite and > 0",
            ));
        }
        if !(self.symmetry_tolerance >= 0.0) {
            return Err(TrackerError::invalid_config("symmetry_tolerance", "must be >= 0"));
        }
        if !(self.divergence_bound > 0.0) {
            return Err(TrackerError::invalid_config("divergence_bound", "must be > 0"));
        }
        if !(self.min_condition >= 0.0 && self.min_condition < 1.0) {
            return Err(TrackerError::invalid_config("min_condition", "must be in [0, 1)"));
        }
        if self.max_consecutive_divergences == 0 {
            return Err(TrackerError::invalid_config(
                "max_consecutive_divergences",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}
