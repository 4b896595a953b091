//! 2D position EKF driven by four anchor ranges per tick.
//!
//! State: x = [px, py], random-walk process model (F = I).
//! Measurement: h_i(x) = ‖x − a_i‖ for the four reduced anchors, with the
//! Jacobian rows (x − a_i)ᵀ / h_i evaluated at the prior mean.
//!
//! `RangeEkf` holds only tuning; the state is a plain value passed in and
//! returned, so a failed update leaves the caller's state untouched.

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::reducer::ObservationSet;
use crate::types::{
    KalmanGainRange, Position, RangeJacobian, RangeNoise, RangeVec, StateMat, StateVec,
};

/// Below this predicted range the Jacobian row is undefined and zeroed.
const MIN_PREDICTED_RANGE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceUpdate {
    /// P ← P − K·H·P
    #[default]
    Simple,
    /// P ← (I − KH)·P·(I − KH)ᵀ + K·R·Kᵀ
    Joseph,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub mean: StateVec,
    pub covariance: StateMat,
}

impl FilterState {
    /// State seeded by an initialiser with P₀ = diag(p0, p0).
    pub fn from_position(position: Position, initial_covariance: f64) -> Self {
        Self {
            mean: position.to_vector(),
            covariance: StateMat::identity() * initial_covariance,
        }
    }

    pub fn position(&self) -> Position {
        Position::from_vector(&self.mean)
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    /// 1-sigma horizontal uncertainty.
    pub fn uncertainty(&self) -> f64 {
        self.covariance_trace().max(0.0).sqrt()
    }

    pub fn asymmetry(&self) -> f64 {
        (self.covariance[(0, 1)] - self.covariance[(1, 0)]).abs()
    }

    pub fn min_eigenvalue(&self) -> f64 {
        self.covariance.symmetric_eigenvalues().min()
    }
}

#[derive(Clone, Debug)]
pub struct RangeEkf {
    transition: StateMat,
    process_noise: StateMat,
    measurement_noise: RangeNoise,
    covariance_update: CovarianceUpdate,
    symmetry_tolerance: f64,
    divergence_bound: f64,
}

impl RangeEkf {
    /// Filter with isotropic noise: Q = q·I₂, R = r·I₄.
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            transition: StateMat::identity(),
            process_noise: StateMat::identity() * process_noise,
            measurement_noise: RangeNoise::identity() * measurement_noise,
            covariance_update: CovarianceUpdate::Simple,
            symmetry_tolerance: 1e-9,
            divergence_bound: 1e6,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.process_noise, config.measurement_noise)
            .with_covariance_update(config.covariance_update)
            .with_symmetry_tolerance(config.symmetry_tolerance)
            .with_divergence_bound(config.divergence_bound)
    }

    pub fn with_covariance_update(mut self, mode: CovarianceUpdate) -> Self {
        self.covariance_update = mode;
        self
    }

    pub fn with_symmetry_tolerance(mut self, tolerance: f64) -> Self {
        self.symmetry_tolerance = tolerance;
        self
    }

    pub fn with_divergence_bound(mut self, bound: f64) -> Self {
        self.divergence_bound = bound;
        self
    }

    /// x ← F·x, P ← F·P·Fᵀ + Q
    pub fn predict(&self, state: &FilterState) -> FilterState {
        let f = self.transition;
        let covariance = f * state.covariance * f.transpose() + self.process_noise;
        FilterState {
            mean: f * state.mean,
            covariance: self.enforce_symmetry(covariance),
        }
    }

    /// Range update linearised at `prior.mean`.
    ///
    /// # Errors
    /// `FilterDivergence` when the innovation covariance is not SPD, the
    /// correction is non-finite, or it exceeds the divergence bound.
    pub fn update(
        &self,
        prior: &FilterState,
        observations: &ObservationSet,
    ) -> TrackerResult<FilterState> {
        let Innovation {
            h,
            hp,
            gain,
            residual: innovation,
        } = self.innovate(prior, observations)?;

        let correction = gain * innovation;
        let step_norm = correction.norm();
        if !step_norm.is_finite() {
            return Err(TrackerError::FilterDivergence {
                reason: "non-finite state correction".to_string(),
            });
        }
        if step_norm > self.divergence_bound {
            return Err(TrackerError::FilterDivergence {
                reason: format!(
                    "state correction {:.3e} exceeds bound {:.3e}",
                    step_norm, self.divergence_bound
                ),
            });
        }

        let covariance = match self.covariance_update {
            CovarianceUpdate::Simple => prior.covariance - gain * hp,
            CovarianceUpdate::Joseph => {
                let i_kh = StateMat::identity() - gain * h;
                i_kh * prior.covariance * i_kh.transpose()
                    + gain * self.measurement_noise * gain.transpose()
            }
        };
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(TrackerError::FilterDivergence {
                reason: "non-finite posterior covariance".to_string(),
            });
        }

        log::debug!(
            "EKF update: innovation {:?}, correction ({:.4}, {:.4})",
            innovation.as_slice(),
            correction[0],
            correction[1]
        );

        Ok(FilterState {
            mean: prior.mean + correction,
            covariance: self.enforce_symmetry(covariance),
        })
    }

    /// Predict then update.
    pub fn step(
        &self,
        state: &FilterState,
        observations: &ObservationSet,
    ) -> TrackerResult<FilterState> {
        let prior = self.predict(state);
        self.update(&prior, observations)
    }

    fn innovate(
        &self,
        prior: &FilterState,
        observations: &ObservationSet,
    ) -> TrackerResult<Innovation> {
        let (predicted, h) = linearise(&prior.mean, observations);
        let measured = RangeVec::from_fn(|i, _| observations[i].estimated_distance);

        // S = H·P·Hᵀ + R
        let hp = h * prior.covariance;
        let s = hp * h.transpose() + self.measurement_noise;
        let chol = s.cholesky().ok_or_else(|| TrackerError::FilterDivergence {
            reason: "innovation covariance is not positive definite".to_string(),
        })?;

        // K = P·Hᵀ·S⁻¹, solved as Kᵀ = S⁻¹·(H·P)
        let gain: KalmanGainRange = chol.solve(&hp).transpose();

        Ok(Innovation {
            h,
            hp,
            gain,
            residual: measured - predicted,
        })
    }

    fn enforce_symmetry(&self, p: StateMat) -> StateMat {
        let asymmetry = (p[(0, 1)] - p[(1, 0)]).abs();
        if asymmetry > self.symmetry_tolerance {
            log::debug!("Re-symmetrising covariance (asymmetry {:.3e})", asymmetry);
            (p + p.transpose()) * 0.5
        } else {
            p
        }
    }
}

/// Linearised measurement terms of one update.
struct Innovation {
    h: RangeJacobian,
    /// H·P
    hp: RangeJacobian,
    gain: KalmanGainRange,
    /// z − ĥ(x)
    residual: RangeVec,
}

/// Predicted ranges ĥ(x) and Jacobian H at `mean`.
fn linearise(mean: &StateVec, observations: &ObservationSet) -> (RangeVec, RangeJacobian) {
    let mut predicted = RangeVec::zeros();
    let mut h = RangeJacobian::zeros();

    for (i, obs) in observations.iter().enumerate() {
        let dx = mean[0] - obs.anchor_position.x;
        let dy = mean[1] - obs.anchor_position.y;
        let range = (dx * dx + dy * dy).sqrt();
        predicted[i] = range;

        if range < MIN_PREDICTED_RANGE {
            log::debug!("Estimate sits on anchor {}; range row skipped", obs.anchor_id);
            continue;
        }
        h[(i, 0)] = dx / range;
        h[(i, 1)] = dy / range;
    }

    (predicted, h)
}
