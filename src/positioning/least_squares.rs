//! Closed-form trilateration from four ranged anchors.
//!
//! All methods linearise against the strongest anchor (anchor 1). The circular
//! family solves for the offset from anchor 1; the hyperbolic family solves
//! for `[x, y, r1]` in absolute coordinates.
//!
//! Variance weighting uses `S[i][j] = r1⁴ + δij·r(i+1)⁴` (Var(r²) grows with r⁴).
//! `WeightedCircular` / `WeightedHyperbolic` pre-multiply both sides by `S⁻¹`
//! and then run ordinary least squares; `WeightedCircularGls` is the textbook
//! estimator `(AᵀS⁻¹A)⁻¹AᵀS⁻¹b`, computed by whitening with the Cholesky factor.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::reducer::ObservationSet;
use crate::types::{CircularDesign, HyperbolicDesign, LsRhs, LsWeight, Position, LS_ROWS};

/// Reciprocal condition at or below which the system counts as rank deficient.
const RANK_DEFICIENT: f64 = LS_ROWS as f64 * f64::EPSILON;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialiserMethod {
    Circular,
    #[default]
    WeightedCircular,
    WeightedCircularGls,
    Hyperbolic,
    WeightedHyperbolic,
}

impl InitialiserMethod {
    pub const ALL: [InitialiserMethod; 5] = [
        InitialiserMethod::Circular,
        InitialiserMethod::WeightedCircular,
        InitialiserMethod::WeightedCircularGls,
        InitialiserMethod::Hyperbolic,
        InitialiserMethod::WeightedHyperbolic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InitialiserMethod::Circular => "circular",
            InitialiserMethod::WeightedCircular => "weighted_circular",
            InitialiserMethod::WeightedCircularGls => "weighted_circular_gls",
            InitialiserMethod::Hyperbolic => "hyperbolic",
            InitialiserMethod::WeightedHyperbolic => "weighted_hyperbolic",
        }
    }
}

impl fmt::Display for InitialiserMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InitialiserMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('-', "_");
        InitialiserMethod::ALL
            .into_iter()
            .find(|m| m.name() == normalised)
            .ok_or_else(|| {
                format!(
                    "unknown initialiser '{}' (expected one of: {})",
                    s,
                    InitialiserMethod::ALL.map(|m| m.name()).join(", ")
                )
            })
    }
}

/// Single-shot position from four observations ordered strongest first.
///
/// # Arguments
/// * `observations` - reducer output; entry 0 is the reference anchor
/// * `method` - linearisation and weighting variant
/// * `min_condition` - reciprocal condition floor; at or below it the solve
///   fails with `IllConditioned`
pub fn initial_position(
    observations: &ObservationSet,
    method: InitialiserMethod,
    min_condition: f64,
) -> TrackerResult<Position> {
    let position = match method {
        InitialiserMethod::Circular => {
            let (a, b) = circular_system(observations);
            offset_from_reference(observations, solve_ols(a, b, min_condition)?)
        }
        InitialiserMethod::WeightedCircular => {
            let (a, b) = circular_system(observations);
            let s_inv = inverse_weights(observations)?;
            offset_from_reference(observations, solve_ols(s_inv * a, s_inv * b, min_condition)?)
        }
        InitialiserMethod::WeightedCircularGls => {
            let (a, b) = circular_system(observations);
            let l = variance_weights(observations)
                .cholesky()
                .ok_or(TrackerError::SingularSystem)?
                .l();
            let a_w = l
                .solve_lower_triangular(&a)
                .ok_or(TrackerError::SingularSystem)?;
            let b_w = l
                .solve_lower_triangular(&b)
                .ok_or(TrackerError::SingularSystem)?;
            offset_from_reference(observations, solve_ols(a_w, b_w, min_condition)?)
        }
        InitialiserMethod::Hyperbolic => {
            let (a, b) = hyperbolic_system(observations);
            absolute(solve_ols(a, b, min_condition)?)
        }
        InitialiserMethod::WeightedHyperbolic => {
            let (a, b) = hyperbolic_system(observations);
            let s_inv = inverse_weights(observations)?;
            absolute(solve_ols(s_inv * a, s_inv * b, min_condition)?)
        }
    };

    log::debug!(
        "{} initialiser -> ({:.3}, {:.3})",
        method,
        position.x,
        position.y
    );
    Ok(position)
}

/// `A = [xi−x1, yi−y1]`, `b = ½(r1² − ri² + di1)` for i = 2..4.
fn circular_system(obs: &ObservationSet) -> (CircularDesign, LsRhs) {
    let p1 = obs[0].anchor_position;
    let r1 = obs[0].estimated_distance;

    let mut a = CircularDesign::zeros();
    let mut b = LsRhs::zeros();
    for (row, o) in obs[1..].iter().enumerate() {
        let dx = o.anchor_position.x - p1.x;
        let dy = o.anchor_position.y - p1.y;
        let ri = o.estimated_distance;
        a[(row, 0)] = dx;
        a[(row, 1)] = dy;
        b[row] = 0.5 * (r1 * r1 - ri * ri + dx * dx + dy * dy);
    }
    (a, b)
}

/// `A = −[xi−x1, yi−y1, ri−r1]`, `b = ½((ri−r1)² − Ki + K1)`.
fn hyperbolic_system(obs: &ObservationSet) -> (HyperbolicDesign, LsRhs) {
    let p1 = obs[0].anchor_position;
    let r1 = obs[0].estimated_distance;
    let k1 = p1.x * p1.x + p1.y * p1.y;

    let mut a = HyperbolicDesign::zeros();
    let mut b = LsRhs::zeros();
    for (row, o) in obs[1..].iter().enumerate() {
        let p = o.anchor_position;
        let ri1 = o.estimated_distance - r1;
        let ki = p.x * p.x + p.y * p.y;
        a[(row, 0)] = -(p.x - p1.x);
        a[(row, 1)] = -(p.y - p1.y);
        a[(row, 2)] = -ri1;
        b[row] = 0.5 * (ri1 * ri1 - ki + k1);
    }
    (a, b)
}

fn variance_weights(obs: &ObservationSet) -> LsWeight {
    let r1_4 = obs[0].estimated_distance.powi(4);
    let mut s = LsWeight::from_element(r1_4);
    for (i, o) in obs[1..].iter().enumerate() {
        s[(i, i)] += o.estimated_distance.powi(4);
    }
    s
}

fn inverse_weights(obs: &ObservationSet) -> TrackerResult<LsWeight> {
    let s = variance_weights(obs);
    match s.cholesky() {
        Some(chol) => Ok(chol.inverse()),
        None => {
            log::debug!("Range variance matrix is not positive definite: {:?}", s);
            Err(TrackerError::SingularSystem)
        }
    }
}

/// Ordinary least squares through an SVD; the reciprocal condition number
/// doubles as the quality estimate.
fn solve_ols<const C: usize>(
    a: nalgebra::SMatrix<f64, LS_ROWS, C>,
    b: LsRhs,
    min_condition: f64,
) -> TrackerResult<DVector<f64>> {
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(TrackerError::SingularSystem);
    }

    let a = DMatrix::from_column_slice(LS_ROWS, C, a.as_slice());
    let b = DVector::from_column_slice(b.as_slice());

    let svd = a.svd(true, true);
    let sv_max = svd.singular_values.max();
    let sv_min = svd.singular_values.min();
    let quality = if sv_max > 0.0 { sv_min / sv_max } else { 0.0 };

    if quality <= RANK_DEFICIENT {
        return Err(TrackerError::SingularSystem);
    }
    if quality <= min_condition {
        log::debug!("Least-squares quality {:.3e} below floor {:.1e}", quality, min_condition);
        return Err(TrackerError::IllConditioned { quality });
    }

    svd.solve(&b, sv_max * f64::EPSILON)
        .map_err(|_| TrackerError::SingularSystem)
}

fn offset_from_reference(obs: &ObservationSet, x: DVector<f64>) -> Position {
    let p1 = obs[0].anchor_position;
    Position::new(x[0] + p1.x, x[1] + p1.y)
}

fn absolute(x: DVector<f64>) -> Position {
    Position::new(x[0], x[1])
}
