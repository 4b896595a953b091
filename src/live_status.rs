use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::filters::FilterState;
use crate::tracker::{SessionStats, TickOutcome, TickReport};
use crate::types::Position;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub session_anchor_id: u32,
    pub initialised: bool,
    // Latest estimate
    pub position: Option<Position>,
    pub covariance_trace: Option<f64>,
    pub uncertainty_m: Option<f64>,
    pub last_anchors: Vec<u32>,
    pub last_outcome: String,
    // Counters
    pub ticks: u64,
    pub updates: u64,
    pub skipped_ticks: u64,
    pub initialiser_failures: u64,
    pub divergences: u64,
    pub reinitialisations: u64,
    // Scans discarded by the host while a tick was running
    pub scans_dropped: u64,
    pub uptime_seconds: u64,
}

impl LiveStatus {
    pub fn new(session_anchor_id: u32) -> Self {
        Self {
            timestamp: current_timestamp(),
            session_anchor_id,
            initialised: false,
            position: None,
            covariance_trace: None,
            uncertainty_m: None,
            last_anchors: Vec::new(),
            last_outcome: "waiting".to_string(),
            ticks: 0,
            updates: 0,
            skipped_ticks: 0,
            initialiser_failures: 0,
            divergences: 0,
            reinitialisations: 0,
            scans_dropped: 0,
            uptime_seconds: 0,
        }
    }

    /// Refreshes the snapshot after a tick.
    pub fn record(&mut self, report: &TickReport, state: Option<&FilterState>, stats: &SessionStats) {
        self.timestamp = current_timestamp();
        self.initialised = state.is_some();
        if let Some(state) = state {
            self.position = Some(state.position());
            self.covariance_trace = Some(state.covariance_trace());
            self.uncertainty_m = Some(state.uncertainty());
        }
        if !report.anchors.is_empty() {
            self.last_anchors = report.anchors.clone();
        }
        self.last_outcome = describe(&report.outcome);

        self.ticks = stats.ticks;
        self.updates = stats.updates;
        self.skipped_ticks = stats.skipped;
        self.initialiser_failures = stats.failures;
        self.divergences = stats.divergences;
        self.reinitialisations = stats.reinitialisations;
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn describe(outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::Initialised => "initialised".to_string(),
        TickOutcome::Reinitialised => "reinitialised".to_string(),
        TickOutcome::Updated => "updated".to_string(),
        TickOutcome::Skipped(err) => format!("skipped: {}", err),
        TickOutcome::Failed(err) => format!("failed: {}", err),
        TickOutcome::Diverged(err) => format!("diverged: {}", err),
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;

    #[test]
    fn test_record_and_save() {
        let state = FilterState::from_position(Position::new(2.0, 3.0), 10.0);
        let stats = SessionStats {
            ticks: 4,
            updates: 2,
            skipped: 1,
            ..SessionStats::default()
        };
        let report = TickReport {
            tick: 4,
            outcome: TickOutcome::Updated,
            position: Some(state.position()),
            covariance_trace: Some(20.0),
            anchors: vec![3, 1, 2, 4],
        };

        let mut status = LiveStatus::new(1);
        status.record(&report, Some(&state), &stats);
        assert!(status.initialised);
        assert_eq!(status.covariance_trace, Some(20.0));
        assert_eq!(status.skipped_ticks, 1);

        let skipped = TickReport {
            tick: 5,
            outcome: TickOutcome::Skipped(TrackerError::InsufficientAnchors(2)),
            position: None,
            covariance_trace: None,
            anchors: Vec::new(),
        };
        status.record(&skipped, Some(&state), &stats);
        assert_eq!(status.last_anchors, vec![3, 1, 2, 4]);
        assert!(status.last_outcome.starts_with("skipped"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_status.json");
        status.save(&path).unwrap();
        let loaded: LiveStatus =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.last_anchors, status.last_anchors);
        assert_eq!(loaded.position, Some(Position::new(2.0, 3.0)));
        assert_eq!(loaded.ticks, 4);
        assert_eq!(loaded.last_outcome, status.last_outcome);
    }
}
