//! Indoor positioning from Wi-Fi RSS.
//!
//! Pipeline: a per-anchor cubic path-loss curve turns RSS into range, the
//! scan reducer picks the four strongest known anchors, a closed-form
//! least-squares solve seeds the position, and a range EKF refines it tick
//! by tick.

pub mod calibration;
pub mod config;
pub mod error;
pub mod filters;
pub mod live_status;
pub mod positioning;
pub mod reducer;
pub mod registry;
pub mod scan_log;
pub mod scan_source;
pub mod tracker;
pub mod types;

pub use calibration::{
    CalibrationRecorder, CalibrationStore, InMemoryCalibrationStore, JsonCalibrationStore,
    PathLossModel,
};
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use filters::{CovarianceUpdate, FilterState, RangeEkf};
pub use positioning::InitialiserMethod;
pub use reducer::{ObservationSet, ScanReducer};
pub use registry::{AnchorRegistry, InMemoryRegistry};
pub use tracker::{PositionFix, PositionSink, TickOutcome, TickReport, TrackingSession};
pub use types::{Anchor, AnchorObservation, CalibrationSample, Position, RawScanSample};

/// Fits the cubic path-loss curve for `anchor_id` and stores it.
pub fn fit_path_loss(
    store: &mut dyn CalibrationStore,
    anchor_id: u32,
    samples: &[CalibrationSample],
) -> TrackerResult<[f64; 4]> {
    let model = PathLossModel::fit(samples)?;
    store.put(anchor_id, model.coefficients)?;
    log::info!(
        "Anchor {} path-loss fitted from {} samples: {:?}",
        anchor_id,
        samples.len(),
        model.coefficients
    );
    Ok(model.coefficients)
}

/// Manual override: replaces whatever is stored for `anchor_id`.
pub fn set_coefficients(
    store: &mut dyn CalibrationStore,
    anchor_id: u32,
    coefficients: [f64; 4],
) -> TrackerResult<()> {
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(TrackerError::invalid_config(
            "coefficients",
            "must all be finite",
        ));
    }
    store.put(anchor_id, coefficients)?;
    log::info!("Anchor {} coefficients set to {:?}", anchor_id, coefficients);
    Ok(())
}

/// Reduces `scan` and seeds a filter state from the configured initialiser.
pub fn initialise(
    scan: &[RawScanSample],
    session_anchor_id: u32,
    registry: &dyn AnchorRegistry,
    store: &dyn CalibrationStore,
    config: &TrackerConfig,
) -> TrackerResult<FilterState> {
    let observations = ScanReducer::new(session_anchor_id).reduce(scan, registry, store, None)?;
    let position = positioning::initial_position(
        &observations,
        config.initialiser,
        config.min_condition,
    )?;
    Ok(FilterState::from_position(position, config.initial_covariance))
}

/// One tick: reduce, predict, update. `state` is never modified; on error the
/// caller keeps using it.
pub fn step(
    state: &FilterState,
    scan: &[RawScanSample],
    session_anchor_id: u32,
    registry: &dyn AnchorRegistry,
    store: &dyn CalibrationStore,
    config: &TrackerConfig,
) -> TrackerResult<(FilterState, Position)> {
    let observations = ScanReducer::new(session_anchor_id).reduce(scan, registry, store, None)?;
    let next = RangeEkf::from_config(config).step(state, &observations)?;
    Ok((next, next.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SESSION_ANCHOR: u32 = 1;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new(vec![
            Anchor::new(1, "00:0a:00:", 0.0, 0.0),
            Anchor::new(2, "00:0b:00:", 10.0, 0.0),
            Anchor::new(3, "00:0c:00:", 10.0, 10.0),
            Anchor::new(4, "00:0d:00:", 0.0, 10.0),
        ])
    }

    /// Calibration walk along anchor 1 with distance = -4 - 0.1·rss.
    fn calibrated_store() -> InMemoryCalibrationStore {
        let samples: Vec<CalibrationSample> = (1..=6)
            .map(|i| {
                let distance = i as f64 * 1.5;
                CalibrationSample::new(-10.0 * (distance + 4.0), distance)
            })
            .collect();
        let mut store = InMemoryCalibrationStore::new();
        fit_path_loss(&mut store, SESSION_ANCHOR, &samples).unwrap();
        store
    }

    fn scan_at(truth: Position) -> Vec<RawScanSample> {
        registry()
            .all()
            .iter()
            .map(|anchor| {
                let d = truth.distance_to(&anchor.position);
                RawScanSample::new(&format!("{}7", anchor.label), -10.0 * (d + 4.0))
            })
            .collect()
    }

    #[test]
    fn test_fit_path_loss_stores_coefficients() {
        let samples = vec![
            CalibrationSample::new(-40.0, 1.0),
            CalibrationSample::new(-50.0, 2.0),
            CalibrationSample::new(-60.0, 3.0),
            CalibrationSample::new(-70.0, 4.0),
            CalibrationSample::new(-80.0, 5.0),
        ];
        let mut store = InMemoryCalibrationStore::new();
        let coefficients = fit_path_loss(&mut store, 3, &samples).unwrap();

        let stored = store.get(3).unwrap();
        assert_eq!(stored.coefficients, coefficients);
        for s in &samples {
            assert!((stored.distance(s.rss) - s.distance).abs() < 1e-8);
        }
    }

    #[test]
    fn test_fit_failure_leaves_store_untouched() {
        let mut store = InMemoryCalibrationStore::new();
        let err = fit_path_loss(&mut store, 3, &[CalibrationSample::new(-40.0, 1.0)]).unwrap_err();
        assert_eq!(err, TrackerError::InsufficientSamples { count: 1 });
        assert!(store.is_empty());
    }

    #[test]
    fn test_manual_override_replaces_fit() {
        let mut store = calibrated_store();
        set_coefficients(&mut store, SESSION_ANCHOR, [1.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(store.get(SESSION_ANCHOR).unwrap().distance(-70.0), 1.0);

        assert!(set_coefficients(&mut store, SESSION_ANCHOR, [f64::NAN, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_trivial_square_pipeline() {
        let config = TrackerConfig::default();
        let registry = registry();
        let store = calibrated_store();
        let scan = scan_at(Position::new(5.0, 5.0));

        let state = initialise(&scan, SESSION_ANCHOR, &registry, &store, &config).unwrap();
        assert_abs_diff_eq!(state.mean[0], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(state.mean[1], 5.0, epsilon = 1e-6);
        assert_eq!(state.covariance, types::StateMat::identity() * 10.0);

        let (next, position) =
            step(&state, &scan, SESSION_ANCHOR, &registry, &store, &config).unwrap();
        assert_abs_diff_eq!(position.x, 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(position.y, 5.0, epsilon = 1e-6);
        assert!(next.covariance_trace() < state.covariance_trace());
    }

    #[test]
    fn test_step_with_three_anchors_is_rejected() {
        let config = TrackerConfig::default();
        let registry = registry();
        let store = calibrated_store();
        let mut scan = scan_at(Position::new(3.0, 7.0));

        let state = initialise(&scan, SESSION_ANCHOR, &registry, &store, &config).unwrap();
        let before = state;
        scan.remove(0);

        let err = step(&state, &scan, SESSION_ANCHOR, &registry, &store, &config).unwrap_err();
        assert_eq!(err, TrackerError::InsufficientAnchors(3));
        assert_eq!(err.exit_code(), 10);
        assert_eq!(state, before);
    }

    #[test]
    fn test_corrupt_rss_does_not_produce_a_fix() {
        let config = TrackerConfig::default();
        let mut scan = scan_at(Position::new(3.0, 7.0));
        scan[1].rss = f64::NAN;

        let err = initialise(&scan, SESSION_ANCHOR, &registry(), &calibrated_store(), &config)
            .unwrap_err();
        assert_eq!(err, TrackerError::InsufficientAnchors(3));
    }

    #[test]
    fn test_initialise_without_model() {
        let err = initialise(
            &scan_at(Position::new(3.0, 7.0)),
            SESSION_ANCHOR,
            &registry(),
            &InMemoryCalibrationStore::new(),
            &TrackerConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 11);
    }

    #[test]
    fn test_step_is_repeatable() {
        let config = TrackerConfig::default();
        let registry = registry();
        let store = calibrated_store();
        let state = FilterState::from_position(Position::new(4.0, 6.0), 10.0);
        let scan = scan_at(Position::new(3.0, 7.0));

        let a = step(&state, &scan, SESSION_ANCHOR, &registry, &store, &config).unwrap();
        let b = step(&state, &scan, SESSION_ANCHOR, &registry, &store, &config).unwrap();
        assert_eq!(a, b);
    }
}
