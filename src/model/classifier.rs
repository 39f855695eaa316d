//! Classifier abstraction and the Burn-backed implementation
//!
//! The inference pipeline only sees [`Classifier`]: a function from an NHWC
//! image batch to a set of named output vectors. Which output holds the
//! class probabilities is decided by the caller through an output key.
//!
//! A model artifact directory contains:
//!
//! ```text
//! model_dir/
//! ├── config.json   # SpeciesNetConfig
//! ├── model.mpk     # weights (CompactRecorder)
//! └── labels.json   # species mapping, see registry
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor, TensorData},
};
use tracing::info;

use crate::backend::{default_device, InferenceBackend};
use crate::model::cnn::{SpeciesNet, SpeciesNetConfig};
use crate::model::registry::{SpeciesRegistry, LABELS_FILE_NAME};
use crate::utils::error::{Result, SpeciesError};

/// Model configuration file inside a model directory
pub const MODEL_CONFIG_FILE: &str = "config.json";

/// Weights file stem inside a model directory (the recorder adds `.mpk`)
pub const MODEL_WEIGHTS_FILE: &str = "model";

/// Name of the single output produced by [`BurnClassifier`]
pub const PROBABILITIES_OUTPUT: &str = "probabilities";

/// Image batch in NHWC layout: [batch, height, width, channels]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl ImageTensor {
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(SpeciesError::InvalidInput(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }
}

/// Named output vectors of a classifier, in the order the model emits them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierOutput {
    outputs: Vec<(String, Vec<f32>)>,
}

impl ClassifierOutput {
    /// Output with a single named vector
    pub fn single(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self::default().with_output(name, values)
    }

    pub fn with_output(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.outputs.push((name.into(), values));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Take the probability vector out of the output
    ///
    /// With a key, the output of that name is returned. Without one the
    /// classifier must have produced exactly one output.
    pub fn select(self, key: Option<&str>) -> Result<Vec<f32>> {
        match key {
            Some(key) => {
                let available: Vec<String> = self.names().map(str::to_string).collect();
                self.outputs
                    .into_iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, values)| values)
                    .ok_or_else(|| {
                        SpeciesError::Inference(format!(
                            "classifier has no output '{}' (available: {:?})",
                            key, available
                        ))
                    })
            }
            None => {
                if self.outputs.len() != 1 {
                    let available: Vec<&str> = self.names().collect();
                    return Err(SpeciesError::Inference(format!(
                        "classifier produced {} outputs {:?}; configure an output key",
                        available.len(),
                        available
                    )));
                }
                Ok(self.outputs.into_iter().next().map(|(_, v)| v).unwrap_or_default())
            }
        }
    }
}

/// Opaque scoring function over species classes
pub trait Classifier: Send + Sync {
    /// Number of classes in the probability output
    fn num_classes(&self) -> usize;

    /// Square input size the classifier was built for, if it has a fixed one
    fn input_size(&self) -> Option<u32> {
        None
    }

    /// Score one image batch
    fn score(&self, input: &ImageTensor) -> Result<ClassifierOutput>;
}

/// [`Classifier`] running a [`SpeciesNet`] on a Burn backend
pub struct BurnClassifier<B: Backend> {
    model: Mutex<SpeciesNet<B>>,
    config: SpeciesNetConfig,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(model: SpeciesNet<B>, config: SpeciesNetConfig, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            config,
            device,
        }
    }

    /// Load a classifier from a model artifact directory
    pub fn load(model_dir: &Path, device: &B::Device) -> Result<Self> {
        let config_path = model_dir.join(MODEL_CONFIG_FILE);
        let weights_path = model_dir.join(MODEL_WEIGHTS_FILE);

        if !config_path.exists() {
            return Err(SpeciesError::PathNotFound(config_path));
        }
        if !weights_path.with_extension("mpk").exists() {
            return Err(SpeciesError::PathNotFound(weights_path.with_extension("mpk")));
        }

        let config = SpeciesNetConfig::load(&config_path).map_err(|e| {
            SpeciesError::Model(format!("Failed to read {:?}: {:?}", config_path, e))
        })?;

        let model = SpeciesNet::<B>::new(&config, device)
            .load_file(weights_path.clone(), &CompactRecorder::new(), device)
            .map_err(|e| {
                SpeciesError::Model(format!("Failed to load weights {:?}: {:?}", weights_path, e))
            })?;

        info!(
            "Loaded model from {:?} ({} classes, input {}x{})",
            model_dir, config.num_classes, config.input_size, config.input_size
        );

        Ok(Self::new(model, config, device.clone()))
    }

    /// Write config and weights into `model_dir`
    pub fn save(&self, model_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(model_dir)?;
        self.config.save(model_dir.join(MODEL_CONFIG_FILE))?;

        let model = self
            .model
            .lock()
            .map_err(|_| SpeciesError::Model("model lock poisoned".to_string()))?
            .clone();
        model
            .save_file(model_dir.join(MODEL_WEIGHTS_FILE), &CompactRecorder::new())
            .map_err(|e| SpeciesError::Model(format!("Failed to save weights: {:?}", e)))?;

        Ok(())
    }

    pub fn config(&self) -> &SpeciesNetConfig {
        &self.config
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn input_size(&self) -> Option<u32> {
        Some(self.config.input_size as u32)
    }

    fn score(&self, input: &ImageTensor) -> Result<ClassifierOutput> {
        let [batch, height, width, channels] = input.shape();
        if batch != 1 || channels != 3 {
            return Err(SpeciesError::InvalidInput(format!(
                "expected a single RGB image, got shape {:?}",
                input.shape()
            )));
        }

        // NHWC -> NCHW
        let tensor = Tensor::<B, 4>::from_data(
            TensorData::new(input.data().to_vec(), [batch, height, width, channels]),
            &self.device,
        )
        .permute([0, 3, 1, 2]);

        let probabilities = {
            let model = self
                .model
                .lock()
                .map_err(|_| SpeciesError::Model("model lock poisoned".to_string()))?;
            model.forward_softmax(tensor)
        };

        let values = probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| SpeciesError::Model(format!("Failed to read model output: {:?}", e)))?;

        Ok(ClassifierOutput::single(PROBABILITIES_OUTPUT, values))
    }
}

/// Load the classifier in `model_dir` on the inference backend
pub fn load_classifier(model_dir: &Path) -> Result<Arc<dyn Classifier>> {
    let classifier = BurnClassifier::<InferenceBackend>::load(model_dir, &default_device())?;
    Ok(Arc::new(classifier))
}

/// Write a freshly initialized model artifact sized to `registry`
///
/// The weights are untrained; the artifact exercises the serving path end to end.
pub fn init_model_artifact(
    model_dir: &Path,
    registry: &SpeciesRegistry,
    config: SpeciesNetConfig,
) -> Result<()> {
    if config.num_classes != registry.len() {
        return Err(SpeciesError::Config(format!(
            "model has {} classes but the registry lists {} species",
            config.num_classes,
            registry.len()
        )));
    }

    let device = default_device();
    let model = SpeciesNet::<InferenceBackend>::new(&config, &device);
    BurnClassifier::new(model, config, device).save(model_dir)?;
    registry.write_mapping(&model_dir.join(LABELS_FILE_NAME))?;

    info!("Initialized model artifact in {:?}", model_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config(num_classes: usize) -> SpeciesNetConfig {
        SpeciesNetConfig::new(num_classes)
            .with_input_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(16)
    }

    #[test]
    fn test_image_tensor_shape_checked() {
        assert!(ImageTensor::new(vec![0.0; 12], [1, 2, 2, 3]).is_ok());
        assert!(ImageTensor::new(vec![0.0; 11], [1, 2, 2, 3]).is_err());
    }

    #[test]
    fn test_select_single_output_without_key() {
        let output = ClassifierOutput::single("dense_1", vec![0.25, 0.75]);
        assert_eq!(output.select(None).unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn test_select_named_output() {
        let output = ClassifierOutput::single("logits", vec![1.0, 2.0])
            .with_output("probabilities", vec![0.3, 0.7]);
        assert_eq!(output.get("logits"), Some(&[1.0, 2.0][..]));
        assert_eq!(output.select(Some("probabilities")).unwrap(), vec![0.3, 0.7]);
    }

    #[test]
    fn test_select_ambiguous_without_key_fails() {
        let output = ClassifierOutput::single("a", vec![1.0]).with_output("b", vec![1.0]);
        let err = output.select(None).unwrap_err();
        assert!(err.to_string().contains("configure an output key"));
    }

    #[test]
    fn test_select_missing_key_fails() {
        let output = ClassifierOutput::single("a", vec![1.0]);
        assert!(output.select(Some("b")).is_err());
        assert!(ClassifierOutput::default().select(None).is_err());
    }

    #[test]
    fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SpeciesRegistry::from_names(["Anas_andium", "Puma_concolor", "Tipula"]).unwrap();

        init_model_artifact(dir.path(), &registry, tiny_config(3)).unwrap();
        assert!(dir.path().join("model.mpk").exists());
        assert!(dir.path().join(LABELS_FILE_NAME).exists());

        let classifier = load_classifier(dir.path()).unwrap();
        assert_eq!(classifier.num_classes(), 3);
        assert_eq!(classifier.input_size(), Some(32));

        let input = ImageTensor::new(vec![0.5; 32 * 32 * 3], [1, 32, 32, 3]).unwrap();
        let probs = classifier.score(&input).unwrap().select(None).unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_classifier(dir.path()).err().unwrap();
        assert!(matches!(err, SpeciesError::PathNotFound(_)));
    }

    #[test]
    fn test_init_rejects_class_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SpeciesRegistry::from_names(["a", "b"]).unwrap();
        assert!(init_model_artifact(dir.path(), &registry, tiny_config(3)).is_err());
    }

    #[test]
    fn test_score_rejects_batches() {
        let device = Default::default();
        let config = tiny_config(2);
        let model = SpeciesNet::<InferenceBackend>::new(&config, &device);
        let classifier = BurnClassifier::new(model, config, device);

        let input = ImageTensor::new(vec![0.0; 2 * 8 * 8 * 3], [2, 8, 8, 3]).unwrap();
        assert!(classifier.score(&input).is_err());
    }
}
