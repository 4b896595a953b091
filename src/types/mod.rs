pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// A point on the floor plan. x grows to the right, y downward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn to_vector(self) -> StateVec {
        StateVec::new(self.x, self.y)
    }

    pub fn from_vector(v: &StateVec) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

/// Fixed Wi-Fi access point with a surveyed position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: u32,
    /// BSSID shared by all virtual SSIDs of the AP (last character dropped)
    pub label: String,
    pub position: Position,
}

impl Anchor {
    pub fn new(id: u32, label: &str, x: f64, y: f64) -> Self {
        Self {
            id,
            label: label.to_string(),
            position: Position::new(x, y),
        }
    }
}

/// One entry of a platform Wi-Fi scan
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawScanSample {
    /// Full BSSID as reported by the platform
    pub anchor_label: String,
    /// Received signal strength [dBm]
    pub rss: f64,
}

impl RawScanSample {
    pub fn new(anchor_label: &str, rss: f64) -> Self {
        Self {
            anchor_label: anchor_label.to_string(),
            rss,
        }
    }
}

/// Reducer output consumed by the initialisers and the EKF
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorObservation {
    pub anchor_id: u32,
    pub anchor_position: Position,
    pub rss: f64,
    /// Range derived from the path-loss model, never negative [m]
    pub estimated_distance: f64,
}

/// Labelled (RSS, distance) pair used to fit a path-loss curve
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub rss: f64,
    pub distance: f64,
}

impl CalibrationSample {
    pub fn new(rss: f64, distance: f64) -> Self {
        Self { rss, distance }
    }
}

/// Drops the trailing character that distinguishes virtual SSIDs of one AP.
pub fn strip_virtual_ssid(label: &str) -> &str {
    match label.char_indices().last() {
        Some((idx, _)) => &label[..idx],
        None => label,
    }
}
