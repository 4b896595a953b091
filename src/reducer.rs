//! Scan reducer: raw platform scan -> four ranged anchor observations.
//!
//! Pipeline order matters and is fixed:
//! 1. strip the virtual-SSID suffix, drop unknown anchors and unreadable RSS
//! 2. keep the first sample per stripped label
//! 3. reject batches with fewer than four anchors
//! 4. stable sort by RSS, strongest first, and take four
//! 5. convert every RSS with the session anchor's path-loss curve

use std::collections::HashSet;

use crate::calibration::CalibrationStore;
use crate::error::{TrackerError, TrackerResult};
use crate::registry::AnchorRegistry;
use crate::types::{strip_virtual_ssid, Anchor, AnchorObservation, RawScanSample, RANGE_COUNT};

/// Exactly four observations, strongest RSS first.
pub type ObservationSet = [AnchorObservation; RANGE_COUNT];

#[derive(Clone, Copy, Debug)]
struct Candidate<'a> {
    anchor: &'a Anchor,
    rss: f64,
}

#[derive(Clone, Debug)]
pub struct ScanReducer {
    session_anchor_id: u32,
    stabilise_anchor_set: bool,
}

impl ScanReducer {
    pub fn new(session_anchor_id: u32) -> Self {
        Self {
            session_anchor_id,
            stabilise_anchor_set: false,
        }
    }

    /// Keep the previous tick's four anchors while all of them are still heard.
    pub fn with_stabilisation(mut self, enabled: bool) -> Self {
        self.stabilise_anchor_set = enabled;
        self
    }

    pub fn session_anchor_id(&self) -> u32 {
        self.session_anchor_id
    }

    /// Runs the full reduction. `previous` is only consulted when
    /// stabilisation is enabled.
    pub fn reduce(
        &self,
        scan: &[RawScanSample],
        registry: &dyn AnchorRegistry,
        store: &dyn CalibrationStore,
        previous: Option<&[u32]>,
    ) -> TrackerResult<ObservationSet> {
        let candidates = known_unique(scan, registry);
        if candidates.len() < RANGE_COUNT {
            log::debug!(
                "Scan of {} entries reduced to {} known anchors",
                scan.len(),
                candidates.len()
            );
            return Err(TrackerError::InsufficientAnchors(candidates.len()));
        }

        let selected = match previous.filter(|_| self.stabilise_anchor_set) {
            Some(ids) => {
                select_previous(&candidates, ids).unwrap_or_else(|| strongest(candidates))
            }
            None => strongest(candidates),
        };

        if registry.get(self.session_anchor_id).is_none() {
            return Err(TrackerError::UnknownAnchor {
                anchor_id: self.session_anchor_id,
            });
        }
        let model = store
            .get(self.session_anchor_id)
            .ok_or(TrackerError::ModelUnavailable {
                anchor_id: self.session_anchor_id,
            })?;

        let distances: [f64; RANGE_COUNT] =
            std::array::from_fn(|i| model.distance(selected[i].rss));
        if let Some(i) = distances.iter().position(|d| !d.is_finite()) {
            log::warn!(
                "Path-loss model of anchor {} gives {} at rss {}",
                self.session_anchor_id,
                distances[i],
                selected[i].rss
            );
            return Err(TrackerError::ModelUnavailable {
                anchor_id: self.session_anchor_id,
            });
        }

        let observations: ObservationSet = std::array::from_fn(|i| {
            let candidate = selected[i];
            AnchorObservation {
                anchor_id: candidate.anchor.id,
                anchor_position: candidate.anchor.position,
                rss: candidate.rss,
                estimated_distance: distances[i].max(0.0),
            }
        });

        log::debug!(
            "Selected anchors {:?} (rss {:?})",
            observations.iter().map(|o| o.anchor_id).collect::<Vec<_>>(),
            observations.iter().map(|o| o.rss).collect::<Vec<_>>()
        );

        Ok(observations)
    }
}

/// Steps 1 and 2: registered anchors with a finite RSS, first sample per
/// stripped label.
fn known_unique<'a>(scan: &[RawScanSample], registry: &'a dyn AnchorRegistry) -> Vec<Candidate<'a>> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for sample in scan {
        if !sample.rss.is_finite() {
            log::debug!("Dropping {} with rss {}", sample.anchor_label, sample.rss);
            continue;
        }
        let label = strip_virtual_ssid(&sample.anchor_label);
        let Some(anchor) = registry.lookup(label) else {
            continue;
        };
        if seen.insert(label) {
            candidates.push(Candidate {
                anchor,
                rss: sample.rss,
            });
        }
    }

    candidates
}

/// Step 4. `sort_by` is stable so equal RSS keeps first-seen order.
fn strongest(mut candidates: Vec<Candidate<'_>>) -> Vec<Candidate<'_>> {
    candidates.sort_by(|a, b| b.rss.total_cmp(&a.rss));
    candidates.truncate(RANGE_COUNT);
    candidates
}

fn select_previous<'a>(candidates: &[Candidate<'a>], ids: &[u32]) -> Option<Vec<Candidate<'a>>> {
    if ids.len() != RANGE_COUNT {
        return None;
    }
    let kept: Vec<Candidate<'a>> = candidates
        .iter()
        .filter(|c| ids.contains(&c.anchor.id))
        .copied()
        .collect();
    if kept.len() != RANGE_COUNT {
        return None;
    }
    Some(strongest(kept))
}
