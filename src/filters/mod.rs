pub mod range_ekf;

pub use range_ekf::{CovarianceUpdate, FilterState, RangeEkf};
