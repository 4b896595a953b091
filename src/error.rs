use thiserror::Error;

/// Indoor tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Insufficient calibration samples: {count} provided, at least 4 required")]
    InsufficientSamples { count: usize },

    #[error("Singular path-loss design matrix (reciprocal condition {reciprocal_condition:.3e})")]
    SingularDesign { reciprocal_condition: f64 },

    #[error("Insufficient anchors: only {0} known APs acquired")]
    InsufficientAnchors(usize),

    #[error("No path-loss model stored for anchor {anchor_id}")]
    ModelUnavailable { anchor_id: u32 },

    #[error("Anchor {anchor_id} is not registered")]
    UnknownAnchor { anchor_id: u32 },

    #[error("Singular matrix in least-squares system")]
    SingularSystem,

    #[error("Nearly singular matrix in least-squares system (quality {quality:.3e})")]
    IllConditioned { quality: f64 },

    #[error("Filter divergence: {reason}")]
    FilterDivergence { reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    /// Process exit code for CLI wrappers.
    pub fn exit_code(&self) -> i32 {
        match self {
            TrackerError::InsufficientAnchors(_) => 10,
            TrackerError::ModelUnavailable { .. } => 11,
            TrackerError::InsufficientSamples { .. } => 12,
            TrackerError::UnknownAnchor { .. } => 13,
            TrackerError::SingularSystem => 20,
            TrackerError::IllConditioned { .. } => 21,
            TrackerError::SingularDesign { .. } => 22,
            TrackerError::FilterDivergence { .. } => 30,
            TrackerError::Storage(_) => 40,
            TrackerError::InvalidConfig { .. } => 41,
        }
    }

    /// Data-insufficiency errors: the caller skips the tick and keeps going.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TrackerError::InsufficientSamples { .. }
                | TrackerError::InsufficientAnchors(_)
                | TrackerError::ModelUnavailable { .. }
        )
    }

    /// Numerical failures of the closed-form solvers.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            TrackerError::SingularDesign { .. }
                | TrackerError::SingularSystem
                | TrackerError::IllConditioned { .. }
        )
    }
}

impl TrackerError {
    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        TrackerError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}
