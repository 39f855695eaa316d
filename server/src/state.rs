//! Application state for the species server
//!
//! The classifier and registry are loaded once at startup and shared
//! read-only across requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use species_classifier::inference::{Predictor, PredictorConfig};
use species_classifier::model::{load_classifier, Classifier, SpeciesRegistry};
use species_classifier::IMAGE_SIZE;

/// Server configuration
#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Model artifact directory (config.json, model.mpk, labels.json)
    pub model_dir: PathBuf,
    /// Training directory used when the model ships no labels.json
    pub train_dir: Option<PathBuf>,
    /// Directory for temporary upload files
    pub temp_dir: PathBuf,
    /// Classifier output holding the probabilities
    pub output_key: Option<String>,
    /// Maximum accepted request body size
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            model_dir: PathBuf::from("models/species"),
            train_dir: Some(PathBuf::from("data/processed/train")),
            temp_dir: std::env::temp_dir().join("species_uploads"),
            output_key: None,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            image_size: IMAGE_SIZE,
            output_key: self.output_key.clone(),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Prediction pipeline
    pub predictor: Arc<Predictor>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    /// Load the registry and classifier described by `config`
    ///
    /// A model that cannot be loaded leaves the server in degraded mode
    /// instead of failing startup.
    pub fn initialize(config: ServerConfig) -> Self {
        let registry =
            SpeciesRegistry::resolve(Some(&config.model_dir), config.train_dir.as_deref());

        let classifier = match load_classifier(&config.model_dir) {
            Ok(classifier) => {
                registry.matches_output_dimension(classifier.num_classes());
                Some(classifier)
            }
            Err(e) => {
                warn!(
                    "Model not loaded from {:?}: {}. Serving in degraded mode",
                    config.model_dir, e
                );
                None
            }
        };

        Self::with_parts(config, classifier, registry)
    }

    /// Assemble state from already constructed parts
    pub fn with_parts(
        config: ServerConfig,
        classifier: Option<Arc<dyn Classifier>>,
        registry: SpeciesRegistry,
    ) -> Self {
        info!(
            "{} species available ({}), model loaded: {}",
            registry.len(),
            registry.source(),
            classifier.is_some()
        );

        let predictor = Predictor::new(classifier, Arc::new(registry), config.predictor_config());

        Self {
            config,
            predictor: Arc::new(predictor),
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
