//! Error types for the scriptvox pipeline.

/// Result type alias for scriptvox operations
pub type ScriptvoxResult<T> = Result<T, ScriptvoxError>;

/// A script line failed validation.
///
/// Raised before any backend work starts. Every variant names the offending
/// line (zero-based) so callers can point at it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The line sets both `voice` and `blend_components`, or neither
    #[error("line {line}: exactly one of `voice` or `blend_components` must be set")]
    AmbiguousOrMissingVoice {
        /// Index of the offending line
        line: usize,
    },

    /// A blend component weight is outside [0, 1]
    #[error("line {line}: blend component {component} has weight {weight}, expected 0.0..=1.0")]
    WeightOutOfRange {
        /// Index of the offending line
        line: usize,
        /// Index of the component inside the blend
        component: usize,
        /// The rejected weight
        weight: f32,
    },

    /// Speed is outside [0.25, 2.0]
    #[error("line {line}: speed {speed} is outside 0.25..=2.0")]
    SpeedOutOfRange {
        /// Index of the offending line
        line: usize,
        /// The rejected speed
        speed: f32,
    },

    /// Delay is negative, not a finite number or too long
    #[error(
        "line {line}: delay {delay} must be between 0 and {} seconds",
        crate::script::MAX_DELAY_SECONDS
    )]
    DelayOutOfRange {
        /// Index of the offending line
        line: usize,
        /// The rejected delay
        delay: f32,
    },
}

impl ValidationError {
    /// Index of the line that failed validation
    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::AmbiguousOrMissingVoice { line }
            | Self::WeightOutOfRange { line, .. }
            | Self::SpeedOutOfRange { line, .. }
            | Self::DelayOutOfRange { line, .. } => *line,
        }
    }
}

/// Main error type for scriptvox operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ScriptvoxError {
    /// Script rejected before synthesis
    #[error("Script validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Phonemization or inference failed for one request
    #[error("Inference failed: {message}")]
    InferenceError {
        /// Error message describing the failure
        message: String,
    },

    /// A backend could not be loaded
    #[error("Failed to load backend '{backend_id}': {message}")]
    ModelLoadError {
        /// Catalogue id of the backend
        backend_id: String,
        /// Error message describing the load failure
        message: String,
    },

    /// A downloaded artifact does not match its declared size or digest
    #[error("Download integrity check failed for '{file}': {message}")]
    DownloadIntegrityError {
        /// File name of the artifact
        file: String,
        /// Error message describing the mismatch
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Error message describing the configuration issue
        message: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    FileError {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Network or download error
    #[error("Network error: {message}")]
    NetworkError {
        /// Error message describing the network issue
        message: String,
    },

    /// Task or lock error
    #[error("Concurrency error: {message}")]
    ConcurrencyError {
        /// Error message describing the concurrency issue
        message: String,
    },
}

impl ScriptvoxError {
    /// Create a new inference error
    #[must_use]
    pub fn inference<S: Into<String>>(message: S) -> Self {
        Self::InferenceError {
            message: message.into(),
        }
    }

    /// Create a new model load error
    #[must_use]
    pub fn model_load<I: Into<String>, S: Into<String>>(backend_id: I, message: S) -> Self {
        Self::ModelLoadError {
            backend_id: backend_id.into(),
            message: message.into(),
        }
    }

    /// Create a new model-not-found error
    #[must_use]
    pub fn backend_not_found<S: Into<String>>(backend_id: S) -> Self {
        Self::ModelLoadError {
            backend_id: backend_id.into(),
            message: "no such backend in the model catalogue".to_string(),
        }
    }

    /// Create a new download integrity error
    #[must_use]
    pub fn download_integrity<F: Into<String>, S: Into<String>>(file: F, message: S) -> Self {
        Self::DownloadIntegrityError {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    /// Create a new network error
    #[must_use]
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Create a new concurrency error
    #[must_use]
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Inference errors are never retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::NetworkError { .. })
    }

    /// Check if this error is due to invalid user input
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::ConfigurationError { .. }
        )
    }

    /// Check if this error must abort service startup
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::ModelLoadError { .. }
                | Self::DownloadIntegrityError { .. }
                | Self::ConfigurationError { .. }
        )
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InferenceError { .. } => "inference",
            Self::ModelLoadError { .. } => "model_load",
            Self::DownloadIntegrityError { .. } => "download_integrity",
            Self::ConfigurationError { .. } => "configuration",
            Self::FileError { .. } => "file",
            Self::NetworkError { .. } => "network",
            Self::ConcurrencyError { .. } => "concurrency",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for ScriptvoxError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<serde_json::Error> for ScriptvoxError {
    fn from(err: serde_json::Error) -> Self {
        Self::file(format!("JSON serialization error: {err}"))
    }
}

impl From<toml::de::Error> for ScriptvoxError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid TOML: {err}"))
    }
}

impl From<reqwest::Error> for ScriptvoxError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ScriptvoxError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::concurrency(format!("Blocking task failed: {err}"))
    }
}

impl From<anyhow::Error> for ScriptvoxError {
    fn from(err: anyhow::Error) -> Self {
        Self::inference(format!("{err:#}"))
    }
}
