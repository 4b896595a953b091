//! Empirical cubic path-loss model: distance = a + b·rss + c·rss² + d·rss³
//!
//! The fit is an ordinary least-squares problem on the design matrix
//! `X[i] = [1, rss_i, rss_i², rss_i³]`. The column of ones is the only
//! intercept. Columns are equilibrated before the SVD solve because the
//! cubic column is ~10⁵ times larger than the constant one for typical
//! indoor RSS values; coefficients are rescaled afterwards.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{CalibrationSample, POLY_TERMS};

/// Reciprocal condition of the equilibrated design below which the fit is rejected.
const SINGULAR_RCOND: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    /// [a, b, c, d]
    pub coefficients: [f64; POLY_TERMS],
}

impl PathLossModel {
    pub fn new(coefficients: [f64; POLY_TERMS]) -> Self {
        Self { coefficients }
    }

    /// Fits the cubic to labelled samples. Needs at least four samples with
    /// four distinct RSS values.
    pub fn fit(samples: &[CalibrationSample]) -> TrackerResult<Self> {
        let n = samples.len();
        if n < POLY_TERMS {
            return Err(TrackerError::InsufficientSamples { count: n });
        }

        let mut design = DMatrix::<f64>::zeros(n, POLY_TERMS);
        let mut target = DVector::<f64>::zeros(n);
        for (i, sample) in samples.iter().enumerate() {
            let mut power = 1.0;
            for j in 0..POLY_TERMS {
                design[(i, j)] = power;
                power *= sample.rss;
            }
            target[i] = sample.distance;
        }

        // Equilibrate columns
        let mut scales = [0.0; POLY_TERMS];
        for (j, scale) in scales.iter_mut().enumerate() {
            let norm = design.column(j).norm();
            if !(norm > 0.0) || !norm.is_finite() {
                return Err(TrackerError::SingularDesign {
                    reciprocal_condition: 0.0,
                });
            }
            *scale = norm;
            design.column_mut(j).unscale_mut(norm);
        }

        let svd = design.svd(true, true);
        let sv_max = svd.singular_values.max();
        let sv_min = svd.singular_values.min();
        let rcond = if sv_max > 0.0 { sv_min / sv_max } else { 0.0 };
        if !(rcond > SINGULAR_RCOND) {
            return Err(TrackerError::SingularDesign {
                reciprocal_condition: rcond,
            });
        }

        let scaled = svd
            .solve(&target, sv_max * SINGULAR_RCOND)
            .map_err(|_| TrackerError::SingularDesign {
                reciprocal_condition: rcond,
            })?;

        let mut coefficients = [0.0; POLY_TERMS];
        for ((coefficient, value), scale) in coefficients.iter_mut().zip(scaled.iter()).zip(scales) {
            *coefficient = value / scale;
        }

        log::debug!(
            "Path-loss fit over {} samples: {:?} (rcond {:.3e})",
            n,
            coefficients,
            rcond
        );

        Ok(Self { coefficients })
    }

    /// Evaluates the polynomial directly (may be negative outside the
    /// calibrated range).
    pub fn distance(&self, rss: f64) -> f64 {
        let [a, b, c, d] = self.coefficients;
        a + rss * (b + rss * (c + rss * d))
    }

    /// Sum of squared residuals over `samples`.
    pub fn residual_sum_of_squares(&self, samples: &[CalibrationSample]) -> f64 {
        samples
            .iter()
            .map(|s| (s.distance - self.distance(s.rss)).powi(2))
            .sum()
    }
}
