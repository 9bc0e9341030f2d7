//! Shared, at-most-once model loading.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::classifier::{Classifier, FrameClassifier, DEFAULT_TOP_K};
use crate::error::{MlError, MlResult};
use crate::model::{OrtModel, DEFAULT_OUTPUT_NAME};
use crate::preprocess::DEFAULT_INPUT_SIZE;

/// Where and how to load the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// ONNX model file
    pub model_path: PathBuf,
    /// Optional JSON label file
    pub labels_path: Option<PathBuf>,
    /// Square model input size
    pub input_size: u32,
    /// Name of the logits output tensor
    pub output_name: String,
    /// Labels reported per prediction
    pub top_k: usize,
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_labels(mut self, labels_path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(labels_path.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

type Factory = dyn Fn(&ModelConfig) -> MlResult<Arc<dyn Classifier>> + Send + Sync;

/// Loads a classifier once and hands out shared references.
///
/// Concurrent first callers of [`ModelLoader::load`] wait for a single
/// initializer. A failed load leaves the loader empty so a later call can
/// retry.
pub struct ModelLoader {
    config: ModelConfig,
    cell: OnceCell<Arc<dyn Classifier>>,
    factory: Arc<Factory>,
}

impl ModelLoader {
    /// Loader backed by ONNX Runtime.
    pub fn new(config: ModelConfig) -> Self {
        Self::with_factory(config, |config| {
            let model = OrtModel::load(
                &config.model_path,
                config.labels_path.as_deref(),
                config.input_size,
                &config.output_name,
            )?;
            let classifier = FrameClassifier::new(Arc::new(model), None, config.top_k)?;
            Ok(Arc::new(classifier) as Arc<dyn Classifier>)
        })
    }

    /// Loader with a custom construction function.
    pub fn with_factory<F>(config: ModelConfig, factory: F) -> Self
    where
        F: Fn(&ModelConfig) -> MlResult<Arc<dyn Classifier>> + Send + Sync + 'static,
    {
        Self {
            config,
            cell: OnceCell::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Load the classifier if needed and return it.
    pub async fn load(&self) -> MlResult<Arc<dyn Classifier>> {
        let classifier = self
            .cell
            .get_or_try_init(|| async {
                let config = self.config.clone();
                let factory = Arc::clone(&self.factory);
                let start = Instant::now();

                info!(model_path = %config.model_path.display(), "Loading classifier model");

                let result = tokio::task::spawn_blocking(move || (*factory)(&config))
                    .await
                    .map_err(|e| MlError::model_load(format!("load task failed: {}", e)))?;

                match &result {
                    Ok(classifier) => info!(
                        labels = classifier.labels().len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Classifier ready"
                    ),
                    Err(e) => warn!(error = %e, "Classifier load failed"),
                }
                result
            })
            .await?;

        Ok(Arc::clone(classifier))
    }

    /// The loaded classifier, or [`MlError::NotLoaded`].
    pub fn get(&self) -> MlResult<Arc<dyn Classifier>> {
        self.cell.get().cloned().ok_or(MlError::NotLoaded)
    }
}
