//! Forward-pass models.
//!
//! An [`InferenceModel`] only maps an input tensor to raw scores. Everything
//! around it (preprocessing, softmax, label mapping) lives in the classifier.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use ndarray::{Array2, Array4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{BoxError, MlError, MlResult};

/// Output tensor name used by Hugging Face image classification exports.
pub const DEFAULT_OUTPUT_NAME: &str = "logits";

/// A model evaluated in a single forward pass.
///
/// Implementations must be safe to call from several pipelines at once.
pub trait InferenceModel: Send + Sync {
    /// Raw scores `[N, C]` for an input `[N, 3, S, S]`.
    fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>, BoxError>;

    /// Square input size `S`.
    fn input_size(&self) -> u32;

    /// Number of output classes `C`.
    fn num_classes(&self) -> usize;

    /// The model's own index-ordered label names, if it ships any.
    fn id2label(&self) -> Option<Vec<String>> {
        None
    }
}

/// ONNX Runtime image classification model.
///
/// Expects one f32 input `[N, 3, S, S]` and a named output of logits
/// `[N, C]`.
pub struct OrtModel {
    session: Mutex<Session>,
    output_name: String,
    input_size: u32,
    num_classes: usize,
    labels: Option<Vec<String>>,
}

impl OrtModel {
    /// Load a model and run one warm-up pass to discover the class count.
    ///
    /// `labels_path` optionally points at a JSON label file: either an array
    /// of names or an object with an `id2label` map.
    pub fn load(
        model_path: &Path,
        labels_path: Option<&Path>,
        input_size: u32,
        output_name: &str,
    ) -> MlResult<Self> {
        if !model_path.exists() {
            return Err(MlError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = create_session(model_path)?;
        let labels = labels_path.map(read_label_file).transpose()?;

        let mut model = Self {
            session: Mutex::new(session),
            output_name: output_name.to_string(),
            input_size,
            num_classes: 0,
            labels,
        };

        let warmup = model
            .forward(Array4::zeros((1, 3, input_size as usize, input_size as usize)))
            .map_err(|e| MlError::model_load(format!("warm-up pass failed: {}", e)))?;
        model.num_classes = warmup.ncols();

        info!(
            model_path = %model_path.display(),
            input_size,
            num_classes = model.num_classes,
            has_labels = model.labels.is_some(),
            "Classifier model loaded"
        );

        Ok(model)
    }
}

impl InferenceModel for OrtModel {
    fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>, BoxError> {
        let batch = input.shape()[0];
        let shape = input.shape().to_vec();
        let data = input.into_raw_vec();
        let tensor: Value = Tensor::from_array((shape, data.into_boxed_slice())).map(Value::from)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| "ORT session lock poisoned")?;

        let outputs = session.run(ort::inputs![tensor])?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| format!("missing output tensor {}", self.output_name))?;

        let (out_shape, scores) = output.try_extract_tensor::<f32>()?;
        let classes = match out_shape.len() {
            2 if out_shape[0] as usize == batch => out_shape[1] as usize,
            _ => {
                return Err(format!("unexpected output shape {:?} for batch {}", out_shape, batch).into())
            }
        };

        debug!(batch, classes, "ORT forward pass complete");

        Ok(Array2::from_shape_vec((batch, classes), scores.to_vec())?)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn id2label(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MlResult<Session> {
    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| MlError::model_load(format!("session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MlError::model_load(format!("optimization level: {}", e)))?;

    // Try CUDA on Linux with cuda feature
    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for classification");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MlError::model_load(format!("load ONNX model: {}", e)))
}

/// Label file formats.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelFile {
    List(Vec<String>),
    Config { id2label: BTreeMap<String, String> },
}

/// Read index-ordered label names from a JSON file.
pub fn read_label_file(path: &Path) -> MlResult<Vec<String>> {
    let raw = std::fs::read(path)?;
    parse_labels(&raw)
}

fn parse_labels(raw: &[u8]) -> MlResult<Vec<String>> {
    match serde_json::from_slice::<LabelFile>(raw)? {
        LabelFile::List(names) => Ok(names),
        LabelFile::Config { id2label } => {
            let mut indexed = Vec::with_capacity(id2label.len());
            for (key, name) in id2label {
                let index: usize = key.parse().map_err(|_| {
                    MlError::invalid_configuration(format!("id2label key {:?} is not an index", key))
                })?;
                indexed.push((index, name));
            }
            indexed.sort_by_key(|(index, _)| *index);

            if indexed.iter().enumerate().any(|(i, (index, _))| i != *index) {
                return Err(MlError::invalid_configuration(
                    "id2label indices must be contiguous from 0",
                ));
            }
            Ok(indexed.into_iter().map(|(_, name)| name).collect())
        }
    }
}
