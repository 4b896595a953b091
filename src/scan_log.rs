//! Recorded scan logs (`.json` or `.json.gz`).
//!
//! A tracking log is a sequence of timestamped scan batches, optionally with
//! the surveyed ground-truth position of each batch. A calibration log holds
//! the scans captured at each known distance from one anchor.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationRecorder;
use crate::error::{TrackerError, TrackerResult};
use crate::types::{CalibrationSample, Position, RawScanSample};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanTick {
    /// Seconds since the UNIX epoch
    pub timestamp: f64,
    pub samples: Vec<RawScanSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth: Option<Position>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanLog {
    pub ticks: Vec<ScanTick>,
}

impl ScanLog {
    pub fn load(path: &Path) -> TrackerResult<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> TrackerResult<()> {
        save_json(path, self)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStep {
    pub distance: f64,
    pub scans: Vec<Vec<RawScanSample>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLog {
    pub anchor_id: u32,
    /// Registered (stripped) label of the anchor being calibrated
    pub anchor_label: String,
    pub steps: Vec<CalibrationStep>,
}

impl CalibrationLog {
    pub fn load(path: &Path) -> TrackerResult<Self> {
        load_json(path)
    }

    /// Replays the steps through a recorder; steps that never saw the
    /// anchor produce no sample.
    pub fn samples(&self) -> Vec<CalibrationSample> {
        let mut recorder = CalibrationRecorder::new(&self.anchor_label);
        for step in &self.steps {
            recorder.begin_step(step.distance);
            for scan in &step.scans {
                recorder.record_scan(scan);
            }
            recorder.finish_step();
        }
        recorder.into_samples()
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// Reads JSON, transparently gunzipping `*.gz` paths.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> TrackerResult<T> {
    let file = File::open(path)
        .map_err(|e| TrackerError::Storage(format!("opening {}: {}", path.display(), e)))?;
    let value = if is_gzip(path) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    Ok(value)
}

/// Writes pretty JSON, gzip-compressed for `*.gz` paths.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> TrackerResult<()> {
    let file = File::create(path)
        .map_err(|e| TrackerError::Storage(format!("creating {}: {}", path.display(), e)))?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, value)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    Ok(())
}
