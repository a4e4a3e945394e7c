use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ndarray::{ArrayView4, CowArray};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch};
use ort::session::{RunOptions, Session};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::ValueType;
use tracing::{debug, info, warn};

use crate::config::ArtifactKind;
use crate::error::{ModelLoadError, PredictionError};
use crate::preprocess::PreprocessConfig;
use crate::provision::ArtifactPaths;

/// A loaded network: model definition with its weights applied.
pub trait Classifier: Send + Sync {
    /// One forward pass over a `(1, H, W, 3)` tensor. `Ok(None)` means the
    /// model produced no output at all.
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Option<Vec<f32>>, PredictionError>;
}

/// Shared, read-only handle to the process's classifier.
pub type ClassifierHandle = Arc<dyn Classifier>;

/// Turns provisioned artifacts into a classifier.
pub trait ClassifierFactory: Send + Sync {
    /// Reject artifact locations the backend can never load from. Runs before
    /// anything is fetched.
    fn check_layout(&self, _paths: &ArtifactPaths) -> Result<(), ModelLoadError> {
        Ok(())
    }

    fn load(&self, paths: &ArtifactPaths) -> Result<ClassifierHandle, ModelLoadError>;
}

/// ONNX Runtime backend.
///
/// The weights artifact is the external-data file the graph references, so
/// ONNX Runtime resolves it relative to the model file's directory. Its file
/// name must be the one recorded in the graph.
pub struct OnnxModel {
    provider: [ExecutionProviderDispatch; 1],
    input: PreprocessConfig,
    run_timeout: Option<Duration>,
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        let provider = if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        };
        Self {
            provider,
            input: PreprocessConfig::default(),
            run_timeout: None,
        }
    }

    pub fn with_input(mut self, input: PreprocessConfig) -> Self {
        self.input = input;
        self
    }

    /// Terminate any forward pass that runs longer than `timeout`.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    fn check_input(&self, session: &Session) -> Result<(), ModelLoadError> {
        let expected = self.input.input_shape();
        let input = session
            .inputs
            .first()
            .ok_or_else(|| ModelLoadError::Runtime("model declares no inputs".into()))?;
        let ValueType::Tensor { dimensions, .. } = &input.input_type else {
            return Err(ModelLoadError::Runtime(format!(
                "model input '{}' is not a tensor",
                input.name
            )));
        };
        if input_compatible(dimensions, expected) {
            Ok(())
        } else {
            Err(ModelLoadError::IncompatibleInput {
                expected,
                actual: dimensions.clone(),
            })
        }
    }
}

/// Dynamic axes are reported as -1 and accept anything.
pub(crate) fn input_compatible(dimensions: &[i64], expected: [usize; 4]) -> bool {
    dimensions.len() == expected.len()
        && dimensions
            .iter()
            .zip(expected.iter())
            .all(|(&d, &e)| d < 0 || d as usize == e)
}

/// Whether the serialized graph names `file_name` as an external-data
/// location. Locations are stored verbatim as the value (field 2) of a
/// `StringStringEntryProto`, so the tag, length and name appear contiguously.
pub(crate) fn references_external_data(graph: &[u8], file_name: &str) -> bool {
    if file_name.is_empty() {
        return false;
    }
    let mut needle = vec![0x12];
    let mut len = file_name.len();
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            needle.push(byte);
            break;
        }
        needle.push(byte | 0x80);
    }
    needle.extend_from_slice(file_name.as_bytes());
    graph.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Run `work` on the calling thread. If it is still going after `timeout`,
/// `cancel` is called once from a watchdog thread. Returns the work's result
/// and whether the deadline fired.
pub(crate) fn run_with_deadline<R>(
    timeout: Option<Duration>,
    cancel: impl Fn() + Sync,
    work: impl FnOnce() -> R,
) -> (R, bool) {
    let Some(timeout) = timeout else {
        return (work(), false);
    };
    let fired = AtomicBool::new(false);
    let (done, finished) = mpsc::channel::<()>();
    let out = thread::scope(|s| {
        let (fired, cancel) = (&fired, &cancel);
        s.spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(timeout) {
                fired.store(true, Ordering::SeqCst);
                cancel();
            }
        });
        let out = work();
        drop(done);
        out
    });
    (out, fired.load(Ordering::SeqCst))
}

fn non_empty(kind: ArtifactKind, path: &Path) -> Result<(), ModelLoadError> {
    let len = fs::metadata(path)
        .map_err(|e| ModelLoadError::corrupt(kind, path, e))?
        .len();
    if len == 0 {
        return Err(ModelLoadError::corrupt(kind, path, "file is empty"));
    }
    Ok(())
}

impl ClassifierFactory for OnnxModel {
    fn check_layout(&self, paths: &ArtifactPaths) -> Result<(), ModelLoadError> {
        if paths.model.parent() != paths.weights.parent() {
            return Err(ModelLoadError::Layout(format!(
                "weights {} must sit in the same directory as the model definition {}",
                paths.weights.display(),
                paths.model.display()
            )));
        }
        if paths.weights.file_name().is_none() {
            return Err(ModelLoadError::Layout(format!(
                "weights path {} has no file name",
                paths.weights.display()
            )));
        }
        Ok(())
    }

    fn load(&self, paths: &ArtifactPaths) -> Result<ClassifierHandle, ModelLoadError> {
        let t = Instant::now();
        self.check_layout(paths)?;
        non_empty(ArtifactKind::Model, &paths.model)?;
        non_empty(ArtifactKind::Weights, &paths.weights)?;

        let graph = fs::read(&paths.model)
            .map_err(|e| ModelLoadError::corrupt(ArtifactKind::Model, &paths.model, e))?;
        let file_name = paths
            .weights
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !references_external_data(&graph, &file_name) {
            return Err(ModelLoadError::UnreferencedWeights {
                file_name,
                model: paths.model.clone(),
            });
        }

        let session = SessionBuilder::new()
            .and_then(|b| b.with_execution_providers(self.provider.clone()))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?
            .commit_from_file(&paths.model)
            .map_err(|e| ModelLoadError::corrupt(ArtifactKind::Model, &paths.model, e))?;
        self.check_input(&session)?;

        info!(
            model = %paths.model.display(),
            weights = %paths.weights.display(),
            run_timeout = ?self.run_timeout,
            elapsed_ms = t.elapsed().as_millis() as u64,
            "model and weights loaded"
        );
        Ok(Arc::new(OnnxClassifier {
            session,
            run_timeout: self.run_timeout,
        }))
    }
}

struct OnnxClassifier {
    session: Session,
    run_timeout: Option<Duration>,
}

impl Classifier for OnnxClassifier {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Option<Vec<f32>>, PredictionError> {
        let runtime = |e: ort::Error| PredictionError::Runtime(e.to_string());
        let t = Instant::now();
        let xs = CowArray::from(input.into_dyn());
        let input_data = ort::inputs![xs.view()].map_err(runtime)?;
        let run_options = RunOptions::new().map_err(runtime)?;

        let (result, fired) = run_with_deadline(
            self.run_timeout,
            || {
                if let Err(e) = run_options.terminate() {
                    warn!(error = %e, "could not terminate forward pass");
                }
            },
            || -> ort::Result<Option<Vec<f32>>> {
                let ys = self.session.run_with_options(input_data, &run_options)?;
                let Some((_, scores)) = ys.iter().next() else {
                    return Ok(None);
                };
                let scores = scores.try_extract_tensor::<f32>()?;
                debug!(shape = ?scores.shape(), "output tensor");
                Ok(Some(scores.iter().copied().collect()))
            },
        );

        let scores = match (result, self.run_timeout) {
            (Err(_), Some(timeout)) if fired => return Err(PredictionError::Timeout(timeout)),
            (result, _) => result.map_err(runtime)?,
        };
        debug!(elapsed_ms = t.elapsed().as_millis() as u64, "forward pass");
        Ok(scores)
    }
}
