//! Error types for the sensor relay.
//!
//! Errors are split by how the pipeline reacts to them:
//!
//! - [`SamplerError`] is fatal. The device could not produce a sample and the
//!   pipeline stops; restarting it is left to whatever supervises the process.
//! - [`ExtractionError`] and [`AnnotationError`] are recoverable. The event is
//!   logged and dropped, and sampling carries on.
//! - [`DispatchError`] is recoverable and never leaves the dispatcher, which
//!   retries with backoff until the payload is delivered.
//!
//! [`RelayError`] is the crate-level error returned by the pipeline and the
//! binary.

use std::error::Error;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failure to acquire a sample from the sensor device.
#[derive(Error, Debug)]
pub enum SamplerError {
    /// The device could not be opened.
    ///
    /// This error occurs when:
    /// - The serial port does not exist or is held by another process
    /// - The frame directory is missing or unreadable
    #[error("Failed to open device {device}: {reason}")]
    Open { device: String, reason: String },

    /// A read from an open device failed.
    #[error("Failed to read from device: {0}")]
    Io(#[from] io::Error),

    /// A frame file could not be decoded as an image.
    #[error("Failed to decode frame {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Reasons a raw scale response did not produce a weight.
///
/// These are steady-state noise from a polled line-protocol device, not
/// exceptional conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeightParseError {
    /// The response did not contain the framing marker byte.
    #[error("no framing marker in response")]
    NoMarker,

    /// No digits remained after the marker.
    #[error("no digits after framing marker")]
    NoDigits,

    /// The digits did not fit the numeric type.
    #[error("invalid weight value '{0}'")]
    Invalid(String),
}

/// Why an event did not produce a payload.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The annotation service could not be reached or returned an error.
    #[error("Annotation failed: {0}")]
    Annotation(#[from] AnnotationError),

    /// No annotation matched the recognised categories.
    #[error("No recognised item in sample")]
    NothingRecognized,

    /// More than one distinct category was recognised in a single sample.
    ///
    /// The device expects exactly one kind of item to be present, so the
    /// sample is rejected instead of picking one of the labels.
    #[error("Ambiguous sample, several items recognised: {}", labels.join(", "))]
    Ambiguous { labels: Vec<String> },

    /// The raw response could not be parsed as a weight.
    #[error("Unparseable scale response: {0}")]
    Weight(#[from] WeightParseError),

    /// The extractor was handed a sample of the wrong kind.
    #[error("Unsupported sample: {0}")]
    UnsupportedSample(&'static str),
}

/// Transport failures inside the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The connection attempt failed.
    #[error("Failed to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    /// Sending a message over an established connection failed.
    #[error("Failed to send message: {0}")]
    Send(String),

    /// The payload could not be encoded.
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The dispatcher task has stopped and no longer accepts payloads.
    #[error("Dispatcher is closed")]
    Closed,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level error for the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(io::Error),
}

/// Errors from talking to an annotation backend.
#[derive(Debug)]
pub enum AnnotationError {
    Server {
        status_code: u16,
        message: String,
    },
    Config(String),
    Network(reqwest::Error),
    Json(serde_json::Error),
    Header(reqwest::header::InvalidHeaderValue),
    Image(image::ImageError),
    Io(io::Error),
    Backend(String),
}

impl fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationError::Server {
                status_code,
                message,
            } => {
                write!(f, "Server error {}: {}", status_code, message)
            }
            AnnotationError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AnnotationError::Network(e) => write!(f, "Network error: {}", e),
            AnnotationError::Json(e) => write!(f, "JSON error: {}", e),
            AnnotationError::Header(e) => write!(f, "Header error: {}", e),
            AnnotationError::Image(e) => write!(f, "Image encoding error: {}", e),
            AnnotationError::Io(e) => write!(f, "IO error: {}", e),
            AnnotationError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl Error for AnnotationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AnnotationError::Network(e) => Some(e),
            AnnotationError::Json(e) => Some(e),
            AnnotationError::Header(e) => Some(e),
            AnnotationError::Image(e) => Some(e),
            AnnotationError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AnnotationError {
    fn from(err: reqwest::Error) -> Self {
        AnnotationError::Network(err)
    }
}

impl From<serde_json::Error> for AnnotationError {
    fn from(err: serde_json::Error) -> Self {
        AnnotationError::Json(err)
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AnnotationError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        AnnotationError::Header(err)
    }
}

impl From<image::ImageError> for AnnotationError {
    fn from(err: image::ImageError) -> Self {
        AnnotationError::Image(err)
    }
}

impl From<io::Error> for AnnotationError {
    fn from(err: io::Error) -> Self {
        AnnotationError::Io(err)
    }
}
