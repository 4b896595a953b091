//! Tracking session: owns the filter state across ticks.
//!
//! First usable tick seeds the EKF from the closed-form initialiser; every
//! later tick is reduce -> predict -> update. Skipped, failed, and divergent
//! ticks leave the state exactly as it was.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationStore;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::filters::{FilterState, RangeEkf};
use crate::positioning::initial_position;
use crate::reducer::{ObservationSet, ScanReducer};
use crate::registry::AnchorRegistry;
use crate::types::{Position, RawScanSample, RANGE_COUNT};

/// One emitted position estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub tick: u64,
    pub position: Position,
    pub covariance_trace: f64,
    pub anchors: Vec<u32>,
}

/// Receives every successful fix of a session.
pub trait PositionSink {
    fn publish(&mut self, fix: &PositionFix);
}

impl PositionSink for Vec<PositionFix> {
    fn publish(&mut self, fix: &PositionFix) {
        self.push(fix.clone());
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Initialised,
    Reinitialised,
    Updated,
    /// Not enough usable data; state untouched
    Skipped(TrackerError),
    /// Closed-form initialiser failed; state untouched
    Failed(TrackerError),
    /// EKF update rejected; state untouched
    Diverged(TrackerError),
}

impl TickOutcome {
    pub fn produced_fix(&self) -> bool {
        matches!(
            self,
            TickOutcome::Initialised | TickOutcome::Reinitialised | TickOutcome::Updated
        )
    }

    pub fn error(&self) -> Option<&TrackerError> {
        match self {
            TickOutcome::Skipped(err) | TickOutcome::Failed(err) | TickOutcome::Diverged(err) => {
                Some(err)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TickReport {
    pub tick: u64,
    pub outcome: TickOutcome,
    /// Set only when the tick produced a fix
    pub position: Option<Position>,
    pub covariance_trace: Option<f64>,
    /// Anchors used by this tick, strongest first; empty when skipped
    pub anchors: Vec<u32>,
}

impl TickReport {
    pub fn fix(&self) -> Option<PositionFix> {
        Some(PositionFix {
            tick: self.tick,
            position: self.position?,
            covariance_trace: self.covariance_trace?,
            anchors: self.anchors.clone(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub updates: u64,
    pub skipped: u64,
    pub failures: u64,
    pub divergences: u64,
    pub reinitialisations: u64,
}

pub struct TrackingSession<R: AnchorRegistry, C: CalibrationStore> {
    registry: R,
    store: C,
    config: TrackerConfig,
    reducer: ScanReducer,
    ekf: RangeEkf,
    state: Option<FilterState>,
    last_anchors: Option<[u32; RANGE_COUNT]>,
    consecutive_divergences: u32,
    stats: SessionStats,
}

impl<R: AnchorRegistry, C: CalibrationStore> TrackingSession<R, C> {
    /// # Errors
    /// `UnknownAnchor` if the session anchor is not registered, or
    /// `InvalidConfig` if `config` fails validation.
    pub fn new(
        registry: R,
        store: C,
        session_anchor_id: u32,
        config: TrackerConfig,
    ) -> TrackerResult<Self> {
        config.validate()?;
        if registry.get(session_anchor_id).is_none() {
            return Err(TrackerError::UnknownAnchor {
                anchor_id: session_anchor_id,
            });
        }
        if store.get(session_anchor_id).is_none() {
            log::warn!(
                "Session anchor {} has no path-loss model yet; ticks will be skipped",
                session_anchor_id
            );
        }

        let reducer =
            ScanReducer::new(session_anchor_id).with_stabilisation(config.stabilise_anchor_set);
        let ekf = RangeEkf::from_config(&config);

        Ok(Self {
            registry,
            store,
            config,
            reducer,
            ekf,
            state: None,
            last_anchors: None,
            consecutive_divergences: 0,
            stats: SessionStats::default(),
        })
    }

    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn session_anchor_id(&self) -> u32 {
        self.reducer.session_anchor_id()
    }

    pub fn is_initialised(&self) -> bool {
        self.state.is_some()
    }

    /// Drops the filter state; the next usable tick initialises again.
    pub fn reset(&mut self) {
        self.state = None;
        self.last_anchors = None;
        self.consecutive_divergences = 0;
    }

    /// Runs one tick and forwards a produced fix to `sink`.
    pub fn process_into(&mut self, scan: &[RawScanSample], sink: &mut dyn PositionSink) -> TickReport {
        let report = self.process(scan);
        if let Some(fix) = report.fix() {
            sink.publish(&fix);
        }
        report
    }

    pub fn process(&mut self, scan: &[RawScanSample]) -> TickReport {
        self.stats.ticks += 1;
        let tick = self.stats.ticks;

        let previous = self.last_anchors.as_ref().map(|ids| ids.as_slice());
        let observations = match self
            .reducer
            .reduce(scan, &self.registry, &self.store, previous)
        {
            Ok(observations) => observations,
            Err(err) => {
                log::warn!("Tick {} skipped: {}", tick, err);
                self.stats.skipped += 1;
                return TickReport {
                    tick,
                    outcome: TickOutcome::Skipped(err),
                    position: None,
                    covariance_trace: None,
                    anchors: Vec::new(),
                };
            }
        };

        let outcome = match self.state {
            None => self.initialise(&observations, false),
            Some(state) => self.advance(&state, &observations),
        };

        let (position, covariance_trace) = match (&outcome, &self.state) {
            (o, Some(state)) if o.produced_fix() => {
                (Some(state.position()), Some(state.covariance_trace()))
            }
            _ => (None, None),
        };

        TickReport {
            tick,
            outcome,
            position,
            covariance_trace,
            anchors: observations.iter().map(|o| o.anchor_id).collect(),
        }
    }

    fn initialise(&mut self, observations: &ObservationSet, reinitialising: bool) -> TickOutcome {
        let position =
            match initial_position(observations, self.config.initialiser, self.config.min_condition)
            {
                Ok(position) => position,
                Err(err) => {
                    log::warn!("{} initialiser failed: {}", self.config.initialiser, err);
                    self.stats.failures += 1;
                    return TickOutcome::Failed(err);
                }
            };

        let mut state = FilterState::from_position(position, self.config.initial_covariance);
        if self.config.update_on_first_tick {
            match self.ekf.step(&state, observations) {
                Ok(next) => state = next,
                Err(err) => log::warn!("Update on initialising batch rejected: {}", err),
            }
        }

        log::info!(
            "Tracking {} at ({:.2}, {:.2}) with {} initialiser",
            if reinitialising { "re-initialised" } else { "initialised" },
            state.mean[0],
            state.mean[1],
            self.config.initialiser
        );

        self.accept(state, observations);
        if reinitialising {
            self.stats.reinitialisations += 1;
            TickOutcome::Reinitialised
        } else {
            TickOutcome::Initialised
        }
    }

    fn advance(&mut self, state: &FilterState, observations: &ObservationSet) -> TickOutcome {
        match self.ekf.step(state, observations) {
            Ok(next) => {
                self.stats.updates += 1;
                self.accept(next, observations);
                TickOutcome::Updated
            }
            Err(err) => {
                self.consecutive_divergences += 1;
                self.stats.divergences += 1;
                log::warn!(
                    "EKF update rejected ({} in a row): {}",
                    self.consecutive_divergences,
                    err
                );

                if self.consecutive_divergences >= self.config.max_consecutive_divergences {
                    match self.initialise(observations, true) {
                        TickOutcome::Failed(_) => TickOutcome::Diverged(err),
                        outcome => outcome,
                    }
                } else {
                    TickOutcome::Diverged(err)
                }
            }
        }
    }

    fn accept(&mut self, state: FilterState, observations: &ObservationSet) {
        self.state = Some(state);
        self.last_anchors = Some(std::array::from_fn(|i| observations[i].anchor_id));
        self.consecutive_divergences = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::InMemoryCalibrationStore;
    use crate::registry::InMemoryRegistry;
    use crate::types::Anchor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const SESSION_ANCHOR: u32 = 1;
    // distance = -4 - 0.1·rss  <=>  rss = -10·(distance + 4)
    const MODEL: [f64; 4] = [-4.0, -0.1, 0.0, 0.0];

    fn anchors() -> Vec<Anchor> {
        vec![
            Anchor::new(1, "AP:01:", 0.0, 0.0),
            Anchor::new(2, "AP:02:", 10.0, 0.0),
            Anchor::new(3, "AP:03:", 10.0, 10.0),
            Anchor::new(4, "AP:04:", 0.0, 10.0),
        ]
    }

    fn session(config: TrackerConfig) -> TrackingSession<InMemoryRegistry, InMemoryCalibrationStore> {
        let mut store = InMemoryCalibrationStore::new();
        store.put(SESSION_ANCHOR, MODEL).unwrap();
        TrackingSession::new(InMemoryRegistry::new(anchors()), store, SESSION_ANCHOR, config)
            .unwrap()
    }

    fn rss_for(distance: f64) -> f64 {
        -10.0 * (distance + 4.0)
    }

    fn scan_at(truth: Position, noise: [f64; 4]) -> Vec<RawScanSample> {
        anchors()
            .iter()
            .zip(noise)
            .map(|(anchor, n)| {
                let label = format!("{}a", anchor.label);
                RawScanSample::new(&label, rss_for(truth.distance_to(&anchor.position) + n))
            })
            .collect()
    }

    #[test]
    fn test_noisy_square_converges() {
        let truth = Position::new(3.0, 7.0);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let mut session = session(TrackerConfig::default());

        let mut fixes: Vec<PositionFix> = Vec::new();
        for _ in 0..20 {
            let n = [
                noise.sample(&mut rng),
                noise.sample(&mut rng),
                noise.sample(&mut rng),
                noise.sample(&mut rng),
            ];
            let report = session.process_into(&scan_at(truth, n), &mut fixes);
            assert!(report.outcome.produced_fix(), "{:?}", report.outcome);
        }

        assert_eq!(fixes.len(), 20);
        assert_eq!(fixes[0].tick, 1);
        let last = fixes.last().unwrap();
        assert!(last.position.distance_to(&truth) < 0.3);
        assert_eq!(session.stats().updates, 19);

        let state = session.state().unwrap();
        assert!(state.asymmetry() <= 1e-9);
        assert!(state.min_eigenvalue() >= -1e-9);
    }

    #[test]
    fn test_first_tick_initialises_then_updates() {
        let truth = Position::new(5.0, 5.0);
        let mut session = session(TrackerConfig::default());

        let first = session.process(&scan_at(truth, [0.0; 4]));
        assert_eq!(first.outcome, TickOutcome::Initialised);
        let p = first.position.unwrap();
        assert!(p.distance_to(&truth) < 1e-6);
        // Initialised with P₀ = 10·I then updated on the same batch
        assert!(first.covariance_trace.unwrap() < 20.0);

        let second = session.process(&scan_at(truth, [0.0; 4]));
        assert_eq!(second.outcome, TickOutcome::Updated);
        assert!(second.covariance_trace.unwrap() < first.covariance_trace.unwrap());
    }

    #[test]
    fn test_first_tick_without_update_keeps_initial_covariance() {
        let config = TrackerConfig {
            update_on_first_tick: false,
            ..TrackerConfig::default()
        };
        let mut session = session(config);

        let report = session.process(&scan_at(Position::new(5.0, 5.0), [0.0; 4]));
        assert_eq!(report.covariance_trace, Some(20.0));
    }

    #[test]
    fn test_three_anchors_skip_and_preserve_state() {
        let truth = Position::new(3.0, 7.0);
        let mut session = session(TrackerConfig::default());
        session.process(&scan_at(truth, [0.0; 4]));
        let before = *session.state().unwrap();

        let mut partial = scan_at(truth, [0.0; 4]);
        partial.pop();
        let report = session.process(&partial);

        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(TrackerError::InsufficientAnchors(3))
        );
        assert!(report.position.is_none());
        assert!(report.anchors.is_empty());
        assert_eq!(*session.state().unwrap(), before);
        assert_eq!(session.stats().skipped, 1);
    }

    #[test]
    fn test_duplicate_ssids_skip() {
        let mut session = session(TrackerConfig::default());
        let scan: Vec<RawScanSample> = ["AP:01:1", "AP:01:2", "AP:01:3", "AP:01:4"]
            .iter()
            .map(|label| RawScanSample::new(label, -60.0))
            .collect();

        let report = session.process(&scan);
        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(TrackerError::InsufficientAnchors(1))
        );
        assert!(!session.is_initialised());
    }

    #[test]
    fn test_missing_model_skips() {
        let mut session = TrackingSession::new(
            InMemoryRegistry::new(anchors()),
            InMemoryCalibrationStore::new(),
            SESSION_ANCHOR,
            TrackerConfig::default(),
        )
        .unwrap();

        let report = session.process(&scan_at(Position::new(5.0, 5.0), [0.0; 4]));
        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(TrackerError::ModelUnavailable { anchor_id: 1 })
        );
        assert!(report.outcome.error().unwrap().is_skippable());
    }

    #[test]
    fn test_unknown_session_anchor_rejected() {
        let result = TrackingSession::new(
            InMemoryRegistry::new(anchors()),
            InMemoryCalibrationStore::new(),
            99,
            TrackerConfig::default(),
        );
        assert!(matches!(
            result,
            Err(TrackerError::UnknownAnchor { anchor_id: 99 })
        ));
    }

    #[test]
    fn test_repeated_divergence_reinitialises() {
        let config = TrackerConfig {
            divergence_bound: 1e-6,
            max_consecutive_divergences: 3,
            ..TrackerConfig::default()
        };
        let mut session = session(config);

        session.process(&scan_at(Position::new(3.0, 7.0), [0.0; 4]));
        let initial = *session.state().unwrap();

        let moved = Position::new(6.0, 4.0);
        for _ in 0..2 {
            let report = session.process(&scan_at(moved, [0.0; 4]));
            assert!(matches!(
                report.outcome,
                TickOutcome::Diverged(TrackerError::FilterDivergence { .. })
            ));
            assert_eq!(*session.state().unwrap(), initial);
        }

        let report = session.process(&scan_at(moved, [0.0; 4]));
        assert_eq!(report.outcome, TickOutcome::Reinitialised);
        assert!(report.position.unwrap().distance_to(&moved) < 1e-6);
        assert_eq!(session.stats().divergences, 3);
        assert_eq!(session.stats().reinitialisations, 1);
    }

    #[test]
    fn test_initialiser_failure_leaves_session_uninitialised() {
        let collinear = vec![
            Anchor::new(1, "AP:01:", 0.0, 0.0),
            Anchor::new(2, "AP:02:", 1.0, 1.0),
            Anchor::new(3, "AP:03:", 2.0, 2.0),
            Anchor::new(4, "AP:04:", 3.0, 3.0),
        ];
        let mut store = InMemoryCalibrationStore::new();
        store.put(SESSION_ANCHOR, MODEL).unwrap();
        let mut session = TrackingSession::new(
            InMemoryRegistry::new(collinear),
            store,
            SESSION_ANCHOR,
            TrackerConfig::default(),
        )
        .unwrap();

        let scan: Vec<RawScanSample> = [
            ("AP:01:x", -50.0),
            ("AP:02:x", -55.0),
            ("AP:03:x", -60.0),
            ("AP:04:x", -65.0),
        ]
        .iter()
        .map(|(label, rss)| RawScanSample::new(label, *rss))
        .collect();
        let report = session.process(&scan);

        assert!(matches!(report.outcome, TickOutcome::Failed(ref e) if e.is_numerical()));
        assert!(!session.is_initialised());
        assert_eq!(report.anchors, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_reset_forces_initialisation() {
        let mut session = session(TrackerConfig::default());
        let scan = scan_at(Position::new(5.0, 5.0), [0.0; 4]);
        session.process(&scan);
        session.reset();

        assert_eq!(session.process(&scan).outcome, TickOutcome::Initialised);
    }
}
