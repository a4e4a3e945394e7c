//! Error types for the classification pipeline

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ArtifactKind;

/// Fetching or writing one artifact failed.
#[derive(Debug, Error)]
#[error("failed to provision {artifact} artifact: {reason}")]
pub struct ProvisioningError {
    pub artifact: ArtifactKind,
    #[source]
    pub reason: ProvisioningFailure,
}

impl ProvisioningError {
    pub fn new(artifact: ArtifactKind, reason: impl Into<ProvisioningFailure>) -> Self {
        Self {
            artifact,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisioningFailure {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("remote file not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {code} from {url}")]
    Status { url: String, code: u16 },

    /// The remote answered with a page instead of the file (e.g. a Drive
    /// quota or sign-in interstitial).
    #[error("unexpected content type '{content_type}' from {url}")]
    UnexpectedContent { url: String, content_type: String },

    #[error("local write failed: {0}")]
    Write(#[from] io::Error),

    #[error("could not read cached file: {0}")]
    Unreadable(#[source] io::Error),

    #[error("remote returned an empty body")]
    Empty,

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Failure reported by a [`crate::provision::Fetch`] implementation.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("unexpected content type '{0}'")]
    UnexpectedContent(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl FetchError {
    pub(crate) fn into_failure(self, url: &str) -> ProvisioningFailure {
        let url = url.to_string();
        match self {
            FetchError::NotFound => ProvisioningFailure::NotFound { url },
            FetchError::Status(code) => ProvisioningFailure::Status { url, code },
            FetchError::UnexpectedContent(content_type) => {
                ProvisioningFailure::UnexpectedContent { url, content_type }
            }
            FetchError::Transport(message) => ProvisioningFailure::Network { url, message },
        }
    }
}

/// The classifier could not be brought up.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Artifact present but unusable (truncated, corrupt, wrong format).
    #[error("{artifact} artifact at {} is unusable: {reason}", .path.display())]
    Corrupt {
        artifact: ArtifactKind,
        path: PathBuf,
        reason: String,
    },

    /// The configured artifact paths cannot work together. Raised before
    /// anything is fetched; the cached files are left alone.
    #[error("invalid artifact layout: {0}")]
    Layout(String),

    /// The model graph does not name the configured weights file as its
    /// external data.
    #[error("model {} does not reference weights file '{file_name}'", .model.display())]
    UnreferencedWeights { file_name: String, model: PathBuf },

    #[error("model input {actual:?} does not accept tensors of shape {expected:?}")]
    IncompatibleInput { expected: [usize; 4], actual: Vec<i64> },

    #[error("inference runtime error: {0}")]
    Runtime(String),
}

impl ModelLoadError {
    pub fn corrupt(artifact: ArtifactKind, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            artifact,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// The forward pass produced nothing usable for a valid input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error("model produced no output")]
    EmptyOutput,

    #[error("expected {expected} class scores, model produced {actual}")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("model produced non-finite scores: {0:?}")]
    NonFinite(Vec<f32>),

    #[error("forward pass failed: {0}")]
    Runtime(String),

    #[error("forward pass exceeded {0:?} and was terminated")]
    Timeout(Duration),
}

/// The supplied image cannot be turned into a model input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("unsupported image type '{0}', expected jpg, jpeg or png")]
    UnsupportedFormat(String),

    #[error("uploaded file {} is empty", .0.display())]
    EmptyFile(PathBuf),

    #[error("uploaded image is empty")]
    EmptyUpload,

    #[error("image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("failed to read image: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to resize image: {0}")]
    Resize(String),
}

/// Outcome of a failed classification; exactly one kind per failed call.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Load(#[from] ModelLoadError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

impl From<ProvisioningError> for ClassifyError {
    fn from(err: ProvisioningError) -> Self {
        Self::Load(ModelLoadError::Provisioning(err))
    }
}
