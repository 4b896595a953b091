//! Calibration measuring flow: the operator stands at known distances from
//! one anchor and the recorder averages that anchor's RSS per distance step.

use crate::types::{strip_virtual_ssid, CalibrationSample, RawScanSample};

#[derive(Clone, Debug)]
struct ActiveStep {
    distance: f64,
    rss_sum: f64,
    scans: usize,
}

#[derive(Clone, Debug)]
pub struct CalibrationRecorder {
    anchor_label: String,
    active: Option<ActiveStep>,
    samples: Vec<CalibrationSample>,
}

impl CalibrationRecorder {
    /// `anchor_label` is the registered (already stripped) label.
    pub fn new(anchor_label: &str) -> Self {
        Self {
            anchor_label: anchor_label.to_string(),
            active: None,
            samples: Vec::new(),
        }
    }

    pub fn anchor_label(&self) -> &str {
        &self.anchor_label
    }

    /// Starts a step at `distance`. An unfinished step is discarded.
    pub fn begin_step(&mut self, distance: f64) {
        if let Some(step) = self.active.take() {
            log::warn!(
                "Discarding unfinished calibration step at {:.2} ({} scans)",
                step.distance,
                step.scans
            );
        }
        self.active = Some(ActiveStep {
            distance,
            rss_sum: 0.0,
            scans: 0,
        });
    }

    /// Feeds one scan batch. Only the first entry matching the anchor counts.
    /// Returns whether the scan contributed to the active step.
    pub fn record_scan(&mut self, scan: &[RawScanSample]) -> bool {
        let Some(step) = self.active.as_mut() else {
            return false;
        };

        let hit = scan
            .iter()
            .find(|s| strip_virtual_ssid(&s.anchor_label) == self.anchor_label);

        match hit {
            Some(sample) => {
                step.rss_sum += sample.rss;
                step.scans += 1;
                true
            }
            None => false,
        }
    }

    /// Closes the active step. Yields the mean-RSS sample, or `None` if no
    /// scan in the step saw the anchor.
    pub fn finish_step(&mut self) -> Option<CalibrationSample> {
        let step = self.active.take()?;
        if step.scans == 0 {
            log::warn!(
                "No scans of {} at distance {:.2}; step dropped",
                self.anchor_label,
                step.distance
            );
            return None;
        }

        let sample = CalibrationSample::new(step.rss_sum / step.scans as f64, step.distance);
        log::debug!(
            "Calibration step: distance {:.2}, mean RSS {:.2} over {} scans",
            sample.distance,
            sample.rss,
            step.scans
        );
        self.samples.push(sample);
        Some(sample)
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<CalibrationSample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(entries: &[(&str, f64)]) -> Vec<RawScanSample> {
        entries
            .iter()
            .map(|(label, rss)| RawScanSample::new(label, *rss))
            .collect()
    }

    #[test]
    fn test_step_averages_matching_rss() {
        let mut recorder = CalibrationRecorder::new("AA:BB:CC:");
        recorder.begin_step(2.0);

        assert!(recorder.record_scan(&scan(&[("AA:BB:CC:1", -50.0), ("DD:EE:FF:1", -30.0)])));
        // Second virtual SSID of the same AP is ignored in favour of the first
        assert!(recorder.record_scan(&scan(&[("AA:BB:CC:2", -54.0), ("AA:BB:CC:3", -90.0)])));
        assert!(!recorder.record_scan(&scan(&[("DD:EE:FF:1", -30.0)])));

        let sample = recorder.finish_step().unwrap();
        assert_eq!(sample.distance, 2.0);
        assert!((sample.rss - (-52.0)).abs() < 1e-12);
        assert_eq!(recorder.samples().len(), 1);
    }

    #[test]
    fn test_empty_step_yields_nothing() {
        let mut recorder = CalibrationRecorder::new("AA:BB:CC:");
        recorder.begin_step(4.0);
        recorder.record_scan(&scan(&[("11:22:33:1", -60.0)]));

        assert!(recorder.finish_step().is_none());
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn test_scans_outside_step_are_ignored() {
        let mut recorder = CalibrationRecorder::new("AA:BB:CC:");
        assert!(!recorder.record_scan(&scan(&[("AA:BB:CC:1", -50.0)])));
        assert!(recorder.finish_step().is_none());

        recorder.begin_step(1.0);
        recorder.record_scan(&scan(&[("AA:BB:CC:1", -40.0)]));
        recorder.begin_step(2.0);
        recorder.record_scan(&scan(&[("AA:BB:CC:1", -48.0)]));
        recorder.finish_step();

        let samples = recorder.into_samples();
        assert_eq!(samples, vec![CalibrationSample::new(-48.0, 2.0)]);
    }
}
