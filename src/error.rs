//! Error types for the sound server
//!
//! Internal failures are modeled as nested enums so handlers can log them
//! with context and keep the caller-visible surface narrow.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the daemon
#[derive(Debug, Error)]
pub enum Error {
    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog loading or resolution errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Registry bookkeeping errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Audio pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session bus errors
    #[error("Bus error: {0}")]
    Bus(#[from] zbus::Error),

    /// Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors related to the live-sound registry
///
/// These never reach a client; the orchestrator logs them and aborts the
/// offending operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The uuid is not assigned to any live sound
    #[error("Sound {uuid} is not in the registry")]
    NotInRegistry { uuid: Uuid },

    /// The sender never referenced this sound
    #[error("Sound {uuid} is not refcounted by bus name '{bus_name}'")]
    NotRefcountedByBusName { uuid: Uuid, bus_name: String },

    /// Refcount would go negative
    #[error("Refcount for sound {uuid} is already 0")]
    RefcountAlreadyZero { uuid: Uuid },
}

/// Errors related to catalog loading and per-play resolution
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Metadata file could not be read
    #[error("Cannot read metadata file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// Metadata file is not valid JSON
    #[error("Cannot decode metadata file at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    /// Entry has no sound files to choose from
    #[error("Sound event '{sound_event_id}' has no sound files")]
    NoSoundFiles { sound_event_id: String },

    /// Entry carries an unrecognized overlap-behavior value
    #[error("'{value}' is not a valid option for 'overlap-behavior'")]
    UnknownOverlapBehavior { value: String },
}

/// A failure reported by the audio pipeline driver
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub detail: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Broad classification of pipeline failures
///
/// The kind doubles as the error domain reported on the bus `Error` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Sound file could not be opened
    OpenFailed,
    /// Sound file could not be decoded
    DecodeFailed,
    /// Audio output device failure
    OutputFailed,
    /// Seek request rejected by the source
    SeekFailed,
}

impl PipelineErrorKind {
    /// Stable domain string for bus-facing error reports
    pub fn domain(&self) -> &'static str {
        match self {
            PipelineErrorKind::OpenFailed => "open-failed",
            PipelineErrorKind::DecodeFailed => "decode-failed",
            PipelineErrorKind::OutputFailed => "output-failed",
            PipelineErrorKind::SeekFailed => "seek-failed",
        }
    }

    /// Numeric code for bus-facing error reports
    pub fn code(&self) -> i32 {
        match self {
            PipelineErrorKind::OpenFailed => 1,
            PipelineErrorKind::DecodeFailed => 2,
            PipelineErrorKind::OutputFailed => 3,
            PipelineErrorKind::SeekFailed => 4,
        }
    }
}

impl std::fmt::Display for PipelineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.domain())
    }
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
