//! Linear algebra type system for the indoor tracker
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the initialisers and the range EKF.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 2; // (x, y)

// ===== Measurement Dimensions =====
pub const RANGE_COUNT: usize = 4; // four anchor ranges per tick
pub const POLY_TERMS: usize = 4; // a + b·r + c·r² + d·r³

// ===== Range EKF Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

pub type RangeVec = SVector<f64, RANGE_COUNT>;
pub type RangeNoise = SMatrix<f64, RANGE_COUNT, RANGE_COUNT>;

// Jacobian / gain types
pub type RangeJacobian = SMatrix<f64, RANGE_COUNT, STATE_DIM>; // 4×2
pub type KalmanGainRange = SMatrix<f64, STATE_DIM, RANGE_COUNT>; // 2×4

// ===== Least-Squares Initialiser Types =====
// Rows are anchors 2..4 linearised against anchor 1.
pub const LS_ROWS: usize = RANGE_COUNT - 1;

pub type CircularDesign = SMatrix<f64, LS_ROWS, STATE_DIM>; // 3×2
pub type HyperbolicDesign = SMatrix<f64, LS_ROWS, 3>; // 3×3, unknowns (x, y, r1)
pub type LsRhs = SVector<f64, LS_ROWS>;
pub type LsWeight = SMatrix<f64, LS_ROWS, LS_ROWS>;
