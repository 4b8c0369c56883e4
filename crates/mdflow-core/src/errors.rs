//! Error types for mdflow.
//!
//! One enum covers the whole workspace. Configuration and installation
//! problems are fatal, lock contention never surfaces here (the arbiter
//! retries it), and anything raised while a device lease is held comes
//! back wrapped in [`MdError::SimulationFailed`].

use thiserror::Error;

/// Unified error type for all mdflow operations.
#[derive(Error, Debug)]
pub enum MdError {
    /// Invalid or contradictory job configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An explicitly requested back-end cannot be instantiated
    #[error("The selected platform is not supported: {platform}: {message}")]
    UnsupportedPlatform { platform: String, message: String },

    /// A precision mode could not be set on a GPU-class back-end
    #[error("Unable to set {precision} precision for the {platform} platform")]
    PrecisionUnavailable { platform: String, precision: String },

    /// No back-end at all could be instantiated (broken installation)
    #[error("No compute platform available: {0}")]
    NoPlatform(String),

    /// Atom selection could not be parsed or resolved
    #[error("Selection error in '{selector}': {message}")]
    SelectionError { selector: String, message: String },

    /// Input validation errors (missing box, mismatched array sizes, ...)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Device lock could not be taken for a non-transient reason
    #[error("Device lock error on {device}: {message}")]
    LockError { device: String, message: String },

    /// Integration or minimization blew up
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Failure raised while a job was running, wrapped at the lease boundary
    #[error("Simulation failed for job {job}: {source}")]
    SimulationFailed {
        job: String,
        #[source]
        source: Box<MdError>,
    },

    /// I/O errors (reporters, snapshots, lock files)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic errors (fallback)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MdError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        MdError::ConfigError(message.into())
    }

    /// Creates an unsupported-platform error.
    pub fn unsupported_platform(platform: impl Into<String>, message: impl Into<String>) -> Self {
        MdError::UnsupportedPlatform {
            platform: platform.into(),
            message: message.into(),
        }
    }

    /// Creates a precision error.
    pub fn precision(platform: impl Into<String>, precision: impl Into<String>) -> Self {
        MdError::PrecisionUnavailable {
            platform: platform.into(),
            precision: precision.into(),
        }
    }

    /// Creates a selection error.
    pub fn selection(selector: impl Into<String>, message: impl Into<String>) -> Self {
        MdError::SelectionError {
            selector: selector.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        MdError::ValidationError(message.into())
    }

    /// Creates a lock error.
    pub fn lock(device: impl Into<String>, message: impl Into<String>) -> Self {
        MdError::LockError {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a numerical error.
    pub fn numerical(message: impl Into<String>) -> Self {
        MdError::NumericalError(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        MdError::Internal(message.into())
    }

    /// Wraps an error raised while `job` was running.
    pub fn simulation_failed(job: impl Into<String>, source: MdError) -> Self {
        MdError::SimulationFailed {
            job: job.into(),
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably resubmit the whole job.
    ///
    /// Configuration and installation problems will fail the same way
    /// again; numerical blow-ups and I/O hiccups might not.
    pub fn is_retriable(&self) -> bool {
        match self {
            MdError::NumericalError(_) | MdError::IoError(_) => true,
            MdError::SimulationFailed { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Returns a user-friendly error message with actionable guidance.
    pub fn user_message(&self) -> String {
        match self {
            MdError::UnsupportedPlatform { platform, message } => format!(
                "The selected platform is not supported: {}: {}\n\
                 → Use platform = \"Auto\" to fall back through CUDA, OpenCL, CPU and Reference.",
                platform, message
            ),
            MdError::PrecisionUnavailable { platform, precision } => format!(
                "Unable to set {} precision for the {} platform\n\
                 → Choose one of mixed, single or double that the device supports.",
                precision, platform
            ),
            MdError::NoPlatform(msg) => format!(
                "No compute platform available: {}\n\
                 → Even the Reference platform failed; check the installation.",
                msg
            ),
            MdError::ConfigError(msg) => format!(
                "Configuration error: {}\n\
                 → Review the job file; numeric values must be within valid ranges.",
                msg
            ),
            MdError::SimulationFailed { job, source } => {
                format!("Simulation failed for job {}:\n{}", job, source.user_message())
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for mdflow operations.
pub type Result<T> = std::result::Result<T, MdError>;
