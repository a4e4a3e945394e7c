#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use brain_tumor_rs::error::FetchError;
use brain_tumor_rs::{
    ArtifactKind, ArtifactPaths, ArtifactSpec, Classifier, ClassifierFactory, ClassifierHandle,
    Fetch, Locator, ModelLoadError, PredictionError, ProvisionerConfig,
};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::ArrayView4;

pub const MODEL_URL: &str = "https://store.example/brain_tumor_vgg19.onnx";
pub const WEIGHTS_URL: &str = "https://store.example/brain_tumor_vgg19.onnx.data";
pub const MODEL_BYTES: &[u8] = b"onnx-graph";
pub const WEIGHTS_BYTES: &[u8] = b"vgg19-weights-0123456789";

/// In-memory remote store that records every fetch.
#[derive(Clone, Default)]
pub struct FakeStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeStore {
    pub fn with_artifacts() -> Self {
        let store = Self::default();
        store.put(MODEL_URL, MODEL_BYTES);
        store.put(WEIGHTS_URL, WEIGHTS_BYTES);
        store
    }

    pub fn put(&self, url: &str, body: &[u8]) {
        self.files.lock().unwrap().insert(url.into(), body.to_vec());
    }

    pub fn remove(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetch for FakeStore {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.files.lock().unwrap().get(url) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(FetchError::Transport("connection refused".into())),
        }
    }
}

/// Fixed scores for every forward pass.
pub struct FixedScores(pub Option<Vec<f32>>);

impl Classifier for FixedScores {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Option<Vec<f32>>, PredictionError> {
        assert_eq!(input.shape(), &[1, 240, 240, 3]);
        Ok(self.0.clone())
    }
}

/// Loads a [`FixedScores`] classifier after checking the weights are intact.
#[derive(Clone)]
pub struct FakeFactory {
    pub loads: Arc<AtomicUsize>,
    pub scores: Option<Vec<f32>>,
    pub runtime_failure: bool,
    pub bad_layout: bool,
}

impl FakeFactory {
    pub fn returning(scores: Option<Vec<f32>>) -> Self {
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            scores,
            runtime_failure: false,
            bad_layout: false,
        }
    }

    /// Every load fails inside the runtime, after the files were read.
    pub fn failing_at_runtime(mut self) -> Self {
        self.runtime_failure = true;
        self
    }

    pub fn rejecting_layout(mut self) -> Self {
        self.bad_layout = true;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ClassifierFactory for FakeFactory {
    fn check_layout(&self, _paths: &ArtifactPaths) -> Result<(), ModelLoadError> {
        if self.bad_layout {
            return Err(ModelLoadError::Layout("weights outside the model directory".into()));
        }
        Ok(())
    }

    fn load(&self, paths: &ArtifactPaths) -> Result<ClassifierHandle, ModelLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let model = fs::read(&paths.model).map_err(|e| ModelLoadError::corrupt(ArtifactKind::Model, &paths.model, e))?;
        if model != MODEL_BYTES {
            return Err(ModelLoadError::corrupt(ArtifactKind::Model, &paths.model, "bad graph"));
        }
        let weights = fs::read(&paths.weights)
            .map_err(|e| ModelLoadError::corrupt(ArtifactKind::Weights, &paths.weights, e))?;
        if weights.len() != WEIGHTS_BYTES.len() {
            return Err(ModelLoadError::corrupt(
                ArtifactKind::Weights,
                &paths.weights,
                format!("expected {} bytes, found {}", WEIGHTS_BYTES.len(), weights.len()),
            ));
        }
        if self.runtime_failure {
            return Err(ModelLoadError::Runtime("CUDA device unavailable".into()));
        }
        Ok(Arc::new(FixedScores(self.scores.clone())))
    }
}

pub fn config(dir: &Path) -> ProvisionerConfig {
    ProvisionerConfig::new(
        Locator::Url(MODEL_URL.into()),
        Locator::Url(WEIGHTS_URL.into()),
    )
    .with_model(ArtifactSpec::new(
        ArtifactKind::Model,
        Locator::Url(MODEL_URL.into()),
        dir.join("brain_tumor_vgg19.onnx"),
    ))
    .with_weights(ArtifactSpec::new(
        ArtifactKind::Weights,
        Locator::Url(WEIGHTS_URL.into()),
        dir.join("brain_tumor_vgg19.onnx.data"),
    ))
}

pub fn scan(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 7 + y * 3) % 256) as u8;
        Rgb([v, v, v])
    }))
}
