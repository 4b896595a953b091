pub mod path_loss;
pub mod recorder;
pub mod store;

pub use path_loss::PathLossModel;
pub use recorder::CalibrationRecorder;
pub use store::{CalibrationStore, CoefficientRecord, InMemoryCalibrationStore, JsonCalibrationStore};
