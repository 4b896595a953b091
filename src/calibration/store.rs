//! Path-loss coefficient storage keyed by anchor id.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PathLossModel;
use crate::error::{TrackerError, TrackerResult};

pub trait CalibrationStore {
    fn get(&self, anchor_id: u32) -> Option<PathLossModel>;

    /// Replaces any coefficients previously stored for `anchor_id`.
    fn put(&mut self, anchor_id: u32, coefficients: [f64; 4]) -> TrackerResult<()>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCalibrationStore {
    models: HashMap<u32, PathLossModel>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn get(&self, anchor_id: u32) -> Option<PathLossModel> {
        self.models.get(&anchor_id).copied()
    }

    fn put(&mut self, anchor_id: u32, coefficients: [f64; 4]) -> TrackerResult<()> {
        self.models
            .insert(anchor_id, PathLossModel::new(coefficients));
        Ok(())
    }
}

/// One row per anchor, four named coefficient fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRecord {
    pub anchor_id: u32,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl CoefficientRecord {
    fn model(&self) -> PathLossModel {
        PathLossModel::new([self.a, self.b, self.c, self.d])
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CalibrationFile {
    records: Vec<CoefficientRecord>,
}

/// JSON-file backed store. Every `put` rewrites the file.
#[derive(Debug)]
pub struct JsonCalibrationStore {
    path: PathBuf,
    records: BTreeMap<u32, CoefficientRecord>,
}

impl JsonCalibrationStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> TrackerResult<Self> {
        let records = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                TrackerError::Storage(format!("reading {}: {}", path.display(), e))
            })?;
            let file: CalibrationFile = serde_json::from_str(&contents)?;
            file.records
                .into_iter()
                .map(|r| (r.anchor_id, r))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &CoefficientRecord> {
        self.records.values()
    }

    fn write(&self, records: &BTreeMap<u32, CoefficientRecord>) -> TrackerResult<()> {
        let file = CalibrationFile {
            records: records.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, json).map_err(|e| {
            TrackerError::Storage(format!("writing {}: {}", self.path.display(), e))
        })
    }
}

impl CalibrationStore for JsonCalibrationStore {
    fn get(&self, anchor_id: u32) -> Option<PathLossModel> {
        self.records.get(&anchor_id).map(CoefficientRecord::model)
    }

    fn put(&mut self, anchor_id: u32, coefficients: [f64; 4]) -> TrackerResult<()> {
        let [a, b, c, d] = coefficients;
        let record = CoefficientRecord {
            anchor_id,
            a,
            b,
            c,
            d,
        };

        // Memory only changes once the file holds the new record
        let mut staged = self.records.clone();
        staged.insert(anchor_id, record);
        self.write(&staged)?;
        self.records = staged;
        Ok(())
    }
}
