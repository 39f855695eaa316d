//! Prediction pipeline
//!
//! Ties together upload validation, temporary storage, preprocessing, the
//! classifier and the species registry. The same pipeline backs both the
//! HTTP service and the `predict` CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::inference::preprocess::load_image_tensor;
use crate::inference::upload::{upload_extension, TempUpload};
use crate::model::{Classifier, SpeciesRegistry};
use crate::utils::error::{Result, SpeciesError};
use crate::IMAGE_SIZE;

/// Message for a request without a file field
pub const MSG_NO_FILE_PART: &str = "No file part";

/// Message for a file field with an empty file name
pub const MSG_NO_SELECTED_FILE: &str = "No selected file";

/// Result of classifying one image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Index of the most probable class
    pub predicted_index: usize,

    /// Species name at that index
    pub species_name: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability vector, index-aligned with the registry
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Build a prediction from a probability vector
    ///
    /// Ties resolve to the lowest index.
    pub fn from_probabilities(probabilities: Vec<f32>, registry: &SpeciesRegistry) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(SpeciesError::Inference(
                "classifier returned an empty probability vector".to_string(),
            ));
        }
        if let Some(bad) = probabilities.iter().position(|p| !p.is_finite()) {
            return Err(SpeciesError::Inference(format!(
                "classifier returned a non-finite probability at index {}",
                bad
            )));
        }

        let mut predicted_index = 0;
        for (i, &p) in probabilities.iter().enumerate() {
            if p > probabilities[predicted_index] {
                predicted_index = i;
            }
        }
        let confidence = probabilities[predicted_index];

        let species_name = registry
            .name(predicted_index)
            .ok_or_else(|| {
                SpeciesError::Registry(format!(
                    "predicted index {} is outside the registry ({} species)",
                    predicted_index,
                    registry.len()
                ))
            })?
            .to_string();

        Ok(Self {
            predicted_index,
            species_name,
            confidence,
            probabilities,
        })
    }

    /// The `k` most probable classes as (index, probability), best first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> =
            self.probabilities.iter().copied().enumerate().collect();
        // stable sort keeps lower indices first on ties
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }

    /// Pretty print the prediction
    pub fn display(&self) -> String {
        format!(
            "Prediction: {} (class {})\nConfidence: {:.2}%\n",
            self.species_name,
            self.predicted_index,
            self.confidence * 100.0
        )
    }
}

/// Failure of the prediction pipeline, split by who is at fault
#[derive(Error, Debug)]
pub enum PredictError {
    /// The request itself is malformed
    #[error("{0}")]
    Validation(String),

    /// No classifier was loaded at startup
    #[error("model not loaded")]
    ModelUnavailable,

    /// Storing, decoding or scoring the image failed
    #[error("prediction failed: {0}")]
    InferenceFailure(#[from] SpeciesError),
}

/// A file received from a client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// File name as sent by the client, if any
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Predictor settings
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Square input size used when the classifier does not declare one
    pub image_size: u32,

    /// Name of the classifier output holding the probabilities
    pub output_key: Option<String>,

    /// Directory for temporary upload files
    pub temp_dir: PathBuf,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            output_key: None,
            temp_dir: std::env::temp_dir().join("species_uploads"),
        }
    }
}

/// Runs classification against a shared classifier and registry
pub struct Predictor {
    classifier: Option<Arc<dyn Classifier>>,
    registry: Arc<SpeciesRegistry>,
    config: PredictorConfig,
}

impl Predictor {
    /// Create a predictor; `classifier` is `None` when the model failed to load
    pub fn new(
        classifier: Option<Arc<dyn Classifier>>,
        registry: Arc<SpeciesRegistry>,
        config: PredictorConfig,
    ) -> Self {
        Self {
            classifier,
            registry,
            config,
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn species_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &SpeciesRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Classify an uploaded file
    ///
    /// Validation happens before anything touches the disk or the model.
    /// The temporary copy of the upload is gone when this returns.
    pub fn predict_upload(
        &self,
        upload: Option<UploadedFile>,
    ) -> std::result::Result<Prediction, PredictError> {
        let upload = upload.ok_or_else(|| PredictError::Validation(MSG_NO_FILE_PART.to_string()))?;
        let file_name = match upload.file_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(PredictError::Validation(MSG_NO_SELECTED_FILE.to_string())),
        };

        if self.classifier.is_none() {
            return Err(PredictError::ModelUnavailable);
        }

        let temp = TempUpload::persist(
            &self.config.temp_dir,
            &upload.bytes,
            &upload_extension(&file_name),
        )
        .map_err(|e| {
            error!("Failed to store upload '{}': {}", file_name, e);
            PredictError::InferenceFailure(e)
        })?;

        let prediction = self.classify_path(temp.path()).map_err(|e| {
            error!("Failed to classify upload '{}': {}", file_name, e);
            e
        })?;

        debug!(
            "Classified '{}' as {} ({:.4})",
            file_name, prediction.species_name, prediction.confidence
        );
        Ok(prediction)
    }

    /// Classify an image already on disk
    pub fn classify_path(&self, path: &Path) -> std::result::Result<Prediction, PredictError> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or(PredictError::ModelUnavailable)?;

        let image_size = classifier.input_size().unwrap_or(self.config.image_size);

        let start = Instant::now();
        let tensor = load_image_tensor(path, image_size)?;
        let probabilities = classifier
            .score(&tensor)?
            .select(self.config.output_key.as_deref())?;
        let prediction = Prediction::from_probabilities(probabilities, &self.registry)?;

        debug!(
            "Inference on {:?} took {:.2} ms",
            path,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassifierOutput, ImageTensor};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClassifier {
        probabilities: Vec<f32>,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn new(probabilities: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                probabilities,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Classifier for StubClassifier {
        fn num_classes(&self) -> usize {
            self.probabilities.len()
        }

        fn score(&self, input: &ImageTensor) -> Result<ClassifierOutput> {
            assert_eq!(input.shape(), [1, 224, 224, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassifierOutput::single("dense", self.probabilities.clone()))
        }
    }

    fn registry() -> Arc<SpeciesRegistry> {
        Arc::new(SpeciesRegistry::from_names(["Anas_andium", "Puma_concolor", "Tipula"]).unwrap())
    }

    fn png_bytes() -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        RgbImage::from_pixel(20, 20, Rgb([120, 200, 40]))
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn predictor(stub: &Arc<StubClassifier>, temp_dir: &Path) -> Predictor {
        let classifier: Arc<dyn Classifier> = stub.clone();
        Predictor::new(
            Some(classifier),
            registry(),
            PredictorConfig {
                temp_dir: temp_dir.to_path_buf(),
                ..Default::default()
            },
        )
    }

    fn dir_is_empty(dir: &Path) -> bool {
        !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_prediction_argmax() {
        let p = Prediction::from_probabilities(vec![0.1, 0.7, 0.2], &registry()).unwrap();
        assert_eq!(p.predicted_index, 1);
        assert_eq!(p.species_name, "Puma_concolor");
        assert_eq!(p.confidence, 0.7);
        assert_eq!(p.probabilities.len(), 3);
    }

    #[test]
    fn test_prediction_tie_takes_first() {
        let p = Prediction::from_probabilities(vec![0.4, 0.4, 0.2], &registry()).unwrap();
        assert_eq!(p.predicted_index, 0);
    }

    #[test]
    fn test_prediction_index_outside_registry() {
        let err = Prediction::from_probabilities(vec![0.1, 0.1, 0.1, 0.7], &registry()).unwrap_err();
        assert!(matches!(err, SpeciesError::Registry(_)));
    }

    #[test]
    fn test_prediction_rejects_bad_vectors() {
        assert!(Prediction::from_probabilities(vec![], &registry()).is_err());
        assert!(Prediction::from_probabilities(vec![0.1, f32::NAN, 0.2], &registry()).is_err());
    }

    #[test]
    fn test_top_k() {
        let p = Prediction::from_probabilities(vec![0.2, 0.5, 0.3], &registry()).unwrap();
        assert_eq!(p.top_k(2), vec![(1, 0.5), (2, 0.3)]);
        assert_eq!(p.top_k(10).len(), 3);
        assert!(p.display().contains("Puma_concolor"));
    }

    #[test]
    fn test_missing_file_part() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubClassifier::new(vec![0.2, 0.5, 0.3]);
        let err = predictor(&stub, dir.path()).predict_upload(None).unwrap_err();

        assert!(matches!(err, PredictError::Validation(ref m) if m == MSG_NO_FILE_PART));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubClassifier::new(vec![0.2, 0.5, 0.3]);
        let predictor = predictor(&stub, dir.path());

        for file_name in [None, Some(String::new())] {
            let err = predictor
                .predict_upload(Some(UploadedFile {
                    file_name,
                    bytes: png_bytes(),
                }))
                .unwrap_err();
            assert!(matches!(err, PredictError::Validation(ref m) if m == MSG_NO_SELECTED_FILE));
        }
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_successful_upload_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubClassifier::new(vec![0.2, 0.5, 0.3]);
        let prediction = predictor(&stub, dir.path())
            .predict_upload(Some(UploadedFile {
                file_name: Some("oso.png".to_string()),
                bytes: png_bytes(),
            }))
            .unwrap();

        assert_eq!(prediction.predicted_index, 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_undecodable_upload_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubClassifier::new(vec![0.2, 0.5, 0.3]);
        let err = predictor(&stub, dir.path())
            .predict_upload(Some(UploadedFile {
                file_name: Some("oso.jpg".to_string()),
                bytes: b"not an image".to_vec(),
            }))
            .unwrap_err();

        assert!(matches!(err, PredictError::InferenceFailure(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::new(
            None,
            registry(),
            PredictorConfig {
                temp_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
        );

        assert!(!predictor.is_model_loaded());
        assert_eq!(predictor.species_count(), 3);
        let err = predictor
            .predict_upload(Some(UploadedFile {
                file_name: Some("a.png".to_string()),
                bytes: png_bytes(),
            }))
            .unwrap_err();
        assert!(matches!(err, PredictError::ModelUnavailable));

        // validation still comes first
        let err = predictor.predict_upload(None).unwrap_err();
        assert!(matches!(err, PredictError::Validation(_)));
    }

    #[test]
    fn test_classifier_input_size_wins() {
        struct SmallInput(AtomicUsize);
        impl Classifier for SmallInput {
            fn num_classes(&self) -> usize {
                3
            }
            fn input_size(&self) -> Option<u32> {
                Some(32)
            }
            fn score(&self, input: &ImageTensor) -> Result<ClassifierOutput> {
                assert_eq!(input.shape(), [1, 32, 32, 3]);
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ClassifierOutput::single("p", vec![0.1, 0.2, 0.7]))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("img.png");
        std::fs::write(&image_path, png_bytes()).unwrap();

        let classifier = Arc::new(SmallInput(AtomicUsize::new(0)));
        let loaded: Arc<dyn Classifier> = classifier.clone();
        let predictor = Predictor::new(Some(loaded), registry(), PredictorConfig::default());
        assert_eq!(predictor.classify_path(&image_path).unwrap().predicted_index, 2);
        assert_eq!(classifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_output_key_selects_named_output() {
        struct TwoOutputs;
        impl Classifier for TwoOutputs {
            fn num_classes(&self) -> usize {
                3
            }
            fn score(&self, _input: &ImageTensor) -> Result<ClassifierOutput> {
                Ok(ClassifierOutput::single("logits", vec![5.0, 1.0, 0.0])
                    .with_output("probs", vec![0.1, 0.1, 0.8]))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("img.png");
        std::fs::write(&image_path, png_bytes()).unwrap();

        let unkeyed = Predictor::new(Some(Arc::new(TwoOutputs)), registry(), PredictorConfig::default());
        assert!(matches!(
            unkeyed.classify_path(&image_path),
            Err(PredictError::InferenceFailure(_))
        ));

        let keyed = Predictor::new(
            Some(Arc::new(TwoOutputs)),
            registry(),
            PredictorConfig {
                output_key: Some("probs".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(keyed.classify_path(&image_path).unwrap().species_name, "Tipula");
    }
}
