//! Artifact provisioning: make sure the model definition and weights are on
//! local disk, downloading whatever is missing or fails verification.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{ArtifactSpec, ProvisionerConfig};
use crate::error::{FetchError, ProvisioningError, ProvisioningFailure};

const CHUNK: usize = 64 * 1024;

/// Local paths of both artifacts once provisioned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub weights: PathBuf,
}

/// Byte source for remote artifacts.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// Plain GET over HTTP(S).
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(config: &ProvisionerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout.min(std::time::Duration::from_secs(30)))
            .timeout(config.timeout)
            .build();
        Self { agent }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let response = check_response(self.agent.get(url).call())?;
        Ok(Box::new(response.into_reader()))
    }
}

/// Map a finished request onto what the provisioner cares about. An HTML page
/// in place of a binary artifact is a sign-in or quota interstitial.
fn check_response(result: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response, FetchError> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(404, _)) => return Err(FetchError::NotFound),
        Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
        Err(ureq::Error::Transport(t)) => return Err(FetchError::Transport(t.to_string())),
    };
    let content_type = response.content_type().trim();
    if content_type.eq_ignore_ascii_case("text/html") {
        return Err(FetchError::UnexpectedContent(content_type.to_string()));
    }
    Ok(response)
}

/// Why a local copy was not trusted.
#[derive(Debug)]
enum LocalState {
    Missing,
    Valid,
    Invalid(String),
}

pub struct Provisioner {
    config: ProvisionerConfig,
    fetcher: Box<dyn Fetch>,
}

impl Provisioner {
    /// Provisioner fetching over HTTP with the configured timeout.
    pub fn new(config: ProvisionerConfig) -> Self {
        let fetcher = HttpFetcher::new(&config);
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: ProvisionerConfig, fetcher: impl Fetch + 'static) -> Self {
        Self {
            config,
            fetcher: Box::new(fetcher),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Where the artifacts live once provisioned. Touches nothing on disk.
    pub fn paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            model: self.config.model.path.clone(),
            weights: self.config.weights.path.clone(),
        }
    }

    /// Ensure both artifacts exist locally and pass verification.
    ///
    /// Valid local copies are never re-fetched, so a second call after a
    /// successful one performs no network access.
    pub fn ensure_artifacts(&self) -> Result<ArtifactPaths, ProvisioningError> {
        let model = self.ensure(&self.config.model)?;
        let weights = self.ensure(&self.config.weights)?;
        Ok(ArtifactPaths { model, weights })
    }

    /// Remove both local copies so the next `ensure_artifacts` fetches again.
    pub fn invalidate(&self) -> io::Result<()> {
        for spec in self.config.artifacts() {
            match fs::remove_file(&spec.path) {
                Ok(()) => warn!(artifact = %spec.kind, path = %spec.path.display(), "evicted cached artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn ensure(&self, spec: &ArtifactSpec) -> Result<PathBuf, ProvisioningError> {
        let fail = |reason: ProvisioningFailure| ProvisioningError::new(spec.kind, reason);

        match inspect(spec).map_err(|e| fail(e.into()))? {
            LocalState::Valid => {
                debug!(artifact = %spec.kind, path = %spec.path.display(), "artifact already cached");
                return Ok(spec.path.clone());
            }
            LocalState::Invalid(why) => {
                warn!(artifact = %spec.kind, path = %spec.path.display(), reason = %why, "cached artifact failed verification, fetching again");
            }
            LocalState::Missing => {}
        }

        let url = spec.locator.url();
        info!(artifact = %spec.kind, url = %url, path = %spec.path.display(), "fetching artifact");
        let t = Instant::now();
        let reader = self.fetcher.fetch(&url).map_err(|e| fail(e.into_failure(&url)))?;
        let bytes = download(spec, reader).map_err(fail)?;
        info!(
            artifact = %spec.kind,
            bytes,
            elapsed_ms = t.elapsed().as_millis() as u64,
            "artifact saved"
        );
        Ok(spec.path.clone())
    }
}

/// Stream `reader` into a temp file next to the destination, verify it, then
/// move it into place. Nothing is left at the destination on failure.
fn download(spec: &ArtifactSpec, mut reader: Box<dyn Read + Send>) -> Result<u64, ProvisioningFailure> {
    let dir = match spec.path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ProvisioningFailure::Network {
                    url: spec.locator.url(),
                    message: e.to_string(),
                });
            }
        };
        hasher.update(&buf[..n]);
        tmp.write_all(&buf[..n])?;
        total += n as u64;
    }
    tmp.as_file_mut().sync_all()?;

    verify(spec, total, || Ok(hex::encode(hasher.finalize())))?;
    tmp.persist(&spec.path).map_err(|e| ProvisioningFailure::Write(e.error))?;
    Ok(total)
}

/// Check length and digest against the spec. The digest is only computed when
/// a checksum is configured.
fn verify(
    spec: &ArtifactSpec,
    len: u64,
    digest: impl FnOnce() -> io::Result<String>,
) -> Result<(), ProvisioningFailure> {
    if len == 0 {
        return Err(ProvisioningFailure::Empty);
    }
    if let Some(expected) = spec.size {
        if expected != len {
            return Err(ProvisioningFailure::SizeMismatch { expected, actual: len });
        }
    }
    if let Some(expected) = &spec.sha256 {
        let actual = digest().map_err(ProvisioningFailure::Unreadable)?;
        if *expected != actual {
            return Err(ProvisioningFailure::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

fn inspect(spec: &ArtifactSpec) -> io::Result<LocalState> {
    let meta = match fs::metadata(&spec.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalState::Missing),
        Err(e) => return Err(e),
    };
    if !meta.is_file() {
        return Ok(LocalState::Invalid("not a regular file".into()));
    }
    Ok(judge(spec, meta.len(), || hash_file(&spec.path)))
}

fn judge(spec: &ArtifactSpec, len: u64, digest: impl FnOnce() -> io::Result<String>) -> LocalState {
    match verify(spec, len, digest) {
        Ok(()) => LocalState::Valid,
        Err(why) => LocalState::Invalid(why.to_string()),
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
