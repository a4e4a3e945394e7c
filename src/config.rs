//! Where the model artifacts come from and where they are cached.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cli::Args;

/// Default cache file for the serialized network graph.
pub const DEFAULT_MODEL_PATH: &str = "brain_tumor_vgg19.onnx";
/// Default cache file for the external weights blob referenced by the graph.
pub const DEFAULT_WEIGHTS_PATH: &str = "brain_tumor_vgg19.onnx.data";
/// Default bound on a single artifact download.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

const DRIVE_PREFIX: &str = "gdrive:";

/// Identity of an artifact, carried in every provisioning and load error.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactKind {
    Model,
    Weights,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Model => f.write_str("model definition"),
            ArtifactKind::Weights => f.write_str("weights"),
        }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("invalid artifact locator '{0}': expected http(s)://... or gdrive:<file id>")]
pub struct LocatorParseError(String);

/// Remote location of an artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Locator {
    /// Plain http(s) URL, fetched with a single GET.
    Url(String),
    /// Google Drive file id.
    GoogleDrive { file_id: String },
}

impl Locator {
    /// URL to issue the GET against.
    ///
    /// Drive ids go through the direct-download endpoint with the virus-scan
    /// interstitial pre-confirmed, otherwise large files come back as HTML.
    pub fn url(&self) -> String {
        match self {
            Locator::Url(url) => url.clone(),
            Locator::GoogleDrive { file_id } => format!(
                "https://drive.google.com/uc?export=download&confirm=t&id={file_id}"
            ),
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(id) = s.strip_prefix(DRIVE_PREFIX) {
            let valid = !id.is_empty()
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            return if valid {
                Ok(Locator::GoogleDrive { file_id: id.to_string() })
            } else {
                Err(LocatorParseError(s.to_string()))
            };
        }
        let has_host = s
            .strip_prefix("https://")
            .or_else(|| s.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty());
        if has_host {
            Ok(Locator::Url(s.to_string()))
        } else {
            Err(LocatorParseError(s.to_string()))
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Url(url) => f.write_str(url),
            Locator::GoogleDrive { file_id } => write!(f, "{DRIVE_PREFIX}{file_id}"),
        }
    }
}

/// One artifact: where to fetch it, where to keep it, and how to recognise a
/// good local copy.
#[derive(Clone, Debug)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    pub locator: Locator,
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the expected content.
    pub sha256: Option<String>,
    /// Expected content length in bytes.
    pub size: Option<u64>,
}

impl ArtifactSpec {
    pub fn new(kind: ArtifactKind, locator: Locator, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            locator,
            path: path.into(),
            sha256: None,
            size: None,
        }
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Everything the provisioner needs; no locations are baked into its logic.
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    pub model: ArtifactSpec,
    pub weights: ArtifactSpec,
    pub timeout: Duration,
}

impl ProvisionerConfig {
    /// Both artifacts cached under the default file names in the working directory.
    pub fn new(model: Locator, weights: Locator) -> Self {
        Self {
            model: ArtifactSpec::new(ArtifactKind::Model, model, DEFAULT_MODEL_PATH),
            weights: ArtifactSpec::new(ArtifactKind::Weights, weights, DEFAULT_WEIGHTS_PATH),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, spec: ArtifactSpec) -> Self {
        self.model = spec;
        self
    }

    pub fn with_weights(mut self, spec: ArtifactSpec) -> Self {
        self.weights = spec;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_args(args: &Args) -> Self {
        let mut model = ArtifactSpec::new(ArtifactKind::Model, args.model_url.clone(), &args.model_path);
        if let Some(digest) = &args.model_sha256 {
            model = model.with_sha256(digest);
        }
        let mut weights =
            ArtifactSpec::new(ArtifactKind::Weights, args.weights_url.clone(), &args.weights_path);
        if let Some(digest) = &args.weights_sha256 {
            weights = weights.with_sha256(digest);
        }
        Self {
            model,
            weights,
            timeout: Duration::from_secs(args.timeout_secs),
        }
    }

    /// Artifacts in provisioning order.
    pub fn artifacts(&self) -> [&ArtifactSpec; 2] {
        [&self.model, &self.weights]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_drive_ids() {
        let locator: Locator = "gdrive:1zpTMgXiAgvlH8c7mJy_LAn69c2eOdACb".parse().unwrap();
        assert_eq!(
            locator,
            Locator::GoogleDrive { file_id: "1zpTMgXiAgvlH8c7mJy_LAn69c2eOdACb".into() }
        );
        assert_eq!(
            locator.url(),
            "https://drive.google.com/uc?export=download&confirm=t&id=1zpTMgXiAgvlH8c7mJy_LAn69c2eOdACb"
        );
        assert_eq!(locator.to_string(), "gdrive:1zpTMgXiAgvlH8c7mJy_LAn69c2eOdACb");
    }

    #[test]
    fn parses_plain_urls() {
        let locator: Locator = " https://models.example.org/vgg19.onnx ".parse().unwrap();
        assert_eq!(locator.url(), "https://models.example.org/vgg19.onnx");
        assert!("http://localhost:8080/w.data".parse::<Locator>().is_ok());
    }

    #[test]
    fn rejects_garbage_locators() {
        for bad in ["", "gdrive:", "gdrive:a/b", "ftp://host/file", "https://", "vgg19.onnx"] {
            assert!(bad.parse::<Locator>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn new_config_uses_default_paths() {
        let cfg = ProvisionerConfig::new(
            Locator::Url("https://a.example/m".into()),
            Locator::Url("https://a.example/w".into()),
        );
        assert_eq!(cfg.model.path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(cfg.weights.path, PathBuf::from(DEFAULT_WEIGHTS_PATH));
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        let kinds: Vec<_> = cfg.artifacts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::Model, ArtifactKind::Weights]);
    }

    #[test]
    fn sha256_is_normalised_to_lowercase() {
        let spec = ArtifactSpec::new(
            ArtifactKind::Weights,
            Locator::Url("https://a.example/w".into()),
            "w.data",
        )
        .with_sha256("ABCDEF");
        assert_eq!(spec.sha256.as_deref(), Some("abcdef"));
    }
}
