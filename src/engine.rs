//! The classification pipeline: provision once, load once, classify many.

use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::error::{ClassifyError, ModelLoadError, PredictionError};
use crate::model::{ClassifierFactory, ClassifierHandle};
use crate::postprocess::Label;
use crate::preprocess::Processor;
use crate::provision::Provisioner;
use crate::source;

pub struct InferenceEngine {
    provisioner: Provisioner,
    factory: Box<dyn ClassifierFactory>,
    processor: Processor,
    handle: OnceLock<ClassifierHandle>,
    init: Mutex<()>,
}

impl InferenceEngine {
    pub fn new(provisioner: Provisioner, factory: impl ClassifierFactory + 'static) -> Self {
        Self {
            provisioner,
            factory: Box::new(factory),
            processor: Processor::default(),
            handle: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn with_processor(mut self, processor: Processor) -> Self {
        self.processor = processor;
        self
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// The process's classifier, initialized on first use.
    ///
    /// Initialization runs under a lock and at most one caller performs it;
    /// once published the handle is returned without locking. A failed load
    /// caches nothing. Artifacts the backend found corrupt are evicted so the
    /// next call fetches them again; any other failure leaves them in place.
    pub fn get_classifier(&self) -> Result<ClassifierHandle, ModelLoadError> {
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        let t = Instant::now();
        self.factory.check_layout(&self.provisioner.paths())?;
        let paths = self.provisioner.ensure_artifacts()?;
        let handle = match self.factory.load(&paths) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "classifier failed to load");
                if matches!(err, ModelLoadError::Corrupt { .. }) {
                    if let Err(e) = self.provisioner.invalidate() {
                        warn!(error = %e, "could not evict cached artifacts");
                    }
                }
                return Err(err);
            }
        };
        info!(elapsed_ms = t.elapsed().as_millis() as u64, "classifier ready");
        Ok(self.handle.get_or_init(|| handle).clone())
    }

    /// Classify one image with an already obtained handle.
    pub fn classify(&self, handle: &ClassifierHandle, image: &DynamicImage) -> Result<Label, ClassifyError> {
        let t = Instant::now();
        let xs = self.processor.preprocess(image)?;
        debug!(shape = ?xs.shape(), "image array");

        let scores = handle
            .forward(xs.view())?
            .filter(|scores| !scores.is_empty())
            .ok_or(PredictionError::EmptyOutput)?;
        let label = Label::from_scores(&scores)?;

        info!(
            %label,
            scores = ?scores,
            elapsed_ms = t.elapsed().as_millis() as u64,
            "prediction"
        );
        Ok(label)
    }

    pub fn classify_image(&self, image: &DynamicImage) -> Result<Label, ClassifyError> {
        let handle = self.get_classifier()?;
        self.classify(&handle, image)
    }

    /// Classify an upload the caller has already written to `path`.
    pub fn classify_file(&self, path: &Path) -> Result<Label, ClassifyError> {
        let image = source::load_image(path)?;
        self.classify_image(&image)
    }

    /// Classify an in-memory upload.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Label, ClassifyError> {
        let image = source::decode_image(bytes)?;
        self.classify_image(&image)
    }
}
