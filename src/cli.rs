use std::path::PathBuf;

use clap::Parser;

use crate::config::{DEFAULT_MODEL_PATH, DEFAULT_WEIGHTS_PATH, Locator};

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Classify a brain MRI image as Tumor / No Tumor", long_about = None)]
pub struct Args {
    /// MRI image to classify (jpg, jpeg or png)
    #[arg(long, required_unless_present = "provision_only")]
    pub source: Option<PathBuf>,

    /// Model definition locator: http(s) URL or gdrive:<file id>
    #[arg(long, env = "BRAIN_TUMOR_MODEL_URL")]
    pub model_url: Locator,

    /// Weights locator: http(s) URL or gdrive:<file id>
    #[arg(long, env = "BRAIN_TUMOR_WEIGHTS_URL")]
    pub weights_url: Locator,

    /// Local cache path of the model definition
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Local cache path of the weights. Must sit in the model file's
    /// directory, and its file name must be the external-data location
    /// recorded in the model graph
    #[arg(long, default_value = DEFAULT_WEIGHTS_PATH)]
    pub weights_path: PathBuf,

    /// Expected SHA-256 of the model definition
    #[arg(long)]
    pub model_sha256: Option<String>,

    /// Expected SHA-256 of the weights
    #[arg(long)]
    pub weights_sha256: Option<String>,

    /// Timeout for each artifact download, in seconds
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,

    /// Terminate a forward pass that runs longer than this, in seconds
    #[arg(long)]
    pub run_timeout_secs: Option<u64>,

    /// Use the CUDA execution provider
    #[arg(long)]
    pub cuda: bool,

    /// Only make sure the artifacts are cached, then exit
    #[arg(long)]
    pub provision_only: bool,
}
