pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod provision;
pub mod source;

pub use crate::cli::Args;
pub use crate::config::{ArtifactKind, ArtifactSpec, Locator, ProvisionerConfig};
pub use crate::engine::InferenceEngine;
pub use crate::error::{ClassifyError, InputError, ModelLoadError, PredictionError, ProvisioningError};
pub use crate::model::{Classifier, ClassifierFactory, ClassifierHandle, OnnxModel};
pub use crate::postprocess::Label;
pub use crate::preprocess::{PreprocessConfig, Processor};
pub use crate::provision::{ArtifactPaths, Fetch, HttpFetcher, Provisioner};
