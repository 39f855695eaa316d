//! Supervised training of SpeciesNet
//!
//! A custom loop rather than burn's Learner: shuffle, batch, forward,
//! cross-entropy, backward, Adam step. The validation set is scored after
//! every epoch on the inner (non-autodiff) backend.
//!
//! Output directory layout matches what the server loads:
//!
//! ```text
//! output_dir/
//! ├── config.json
//! ├── model.mpk
//! └── labels.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor, TensorData,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{AugmentationConfig, Augmenter};
use crate::model::{
    BurnClassifier, SpeciesNet, SpeciesNetConfig, SpeciesRegistry, LABELS_FILE_NAME,
};
use crate::training::data::{BatchData, LabeledImages};
use crate::utils::error::{Result, SpeciesError};
use crate::utils::logging::ProgressLogger;
use crate::{DEFAULT_SEED, IMAGE_SIZE};

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed for shuffling and augmentation
    pub seed: u64,
    /// Square model input size
    pub input_size: usize,
    pub width_multiplier: f64,
    pub hidden_units: usize,
    /// Applied to training batches only
    pub augmentation: AugmentationConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: DEFAULT_SEED,
            input_size: IMAGE_SIZE as usize,
            width_multiplier: 1.0,
            hidden_units: 1024,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SpeciesError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SpeciesError::Config("batch size must be at least 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SpeciesError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.input_size == 0 {
            return Err(SpeciesError::Config("input size must be positive".to_string()));
        }
        Ok(())
    }

    /// Network configuration for `num_classes` species
    pub fn model_config(&self, num_classes: usize) -> SpeciesNetConfig {
        SpeciesNetConfig::new(num_classes)
            .with_input_size(self.input_size)
            .with_width_multiplier(self.width_multiplier)
            .with_hidden_units(self.hidden_units)
    }
}

/// Metrics of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    /// Percent
    pub train_accuracy: f64,
    /// Percent; `None` without validation images
    pub val_accuracy: Option<f64>,
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub num_classes: usize,
    pub train_samples: usize,
    pub val_samples: usize,
    pub history: Vec<EpochMetrics>,
    pub output_dir: PathBuf,
    pub duration_secs: f64,
}

impl TrainingSummary {
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.history
            .iter()
            .filter_map(|m| m.val_accuracy)
            .fold(None, |best, acc| Some(best.map_or(acc, |b: f64| b.max(acc))))
    }

    pub fn final_metrics(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

/// Train a fresh SpeciesNet on `train_dir` and write the model artifact
///
/// Class indices are the sorted subdirectory names of `train_dir`; images
/// under `val_dir` are matched to them by directory name.
pub fn run_training<B: AutodiffBackend>(
    train_dir: &Path,
    val_dir: Option<&Path>,
    output_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;
    let start = Instant::now();

    let registry = SpeciesRegistry::from_directory(train_dir)?;
    let image_size = config.input_size as u32;

    let train_data = LabeledImages::load(train_dir, &registry, image_size)?;
    if train_data.is_empty() {
        return Err(SpeciesError::Dataset(format!(
            "no training images found in {:?}",
            train_dir
        )));
    }
    let val_data = match val_dir {
        Some(dir) if dir.is_dir() => LabeledImages::load(dir, &registry, image_size)?,
        Some(dir) => {
            warn!("Validation directory {:?} not found; skipping validation", dir);
            LabeledImages::default()
        }
        None => LabeledImages::default(),
    };

    let empty_classes = train_data
        .class_counts(registry.len())
        .iter()
        .filter(|&&count| count == 0)
        .count();
    if empty_classes > 0 {
        warn!("{} species have no training images", empty_classes);
    }

    let model_config = config.model_config(registry.len());
    let mut model = SpeciesNet::<B>::new(&model_config, device);
    let mut optimizer = AdamConfig::new().init();
    let augmenter = Augmenter::new(config.augmentation.clone());

    info!(
        "Training on {} images ({} validation) over {} species for {} epochs",
        train_data.len(),
        val_data.len(),
        registry.len(),
        config.epochs
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let mut indices: Vec<usize> = (0..train_data.len()).collect();
        indices.shuffle(&mut rng);
        let num_batches = indices.len().div_ceil(config.batch_size);

        let mut progress =
            ProgressLogger::new(&format!("Epoch {}/{}", epoch, config.epochs), num_batches);
        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for batch_indices in indices.chunks(config.batch_size) {
            let batch = train_data.batch(batch_indices, Some(&augmenter), &mut rng);
            if batch.is_empty() {
                continue;
            }
            let (images, targets) = batch_tensors::<B>(batch, image_size as usize, device);

            let output = model.forward(images);
            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output.clone(), targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss += loss_value;
            correct += count_correct(output, targets.clone());
            seen += targets.dims()[0];

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);

            progress.increment();
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: epoch_loss / num_batches.max(1) as f64,
            train_accuracy: 100.0 * correct as f64 / seen.max(1) as f64,
            val_accuracy: (!val_data.is_empty()).then(|| {
                let device = <B::InnerBackend as Backend>::Device::default();
                evaluate(&model.valid(), &val_data, config.batch_size, &device)
            }),
        };

        match metrics.val_accuracy {
            Some(val) => info!(
                "Epoch {}/{}: loss {:.4}, train acc {:.2}%, val acc {:.2}%",
                epoch, config.epochs, metrics.train_loss, metrics.train_accuracy, val
            ),
            None => info!(
                "Epoch {}/{}: loss {:.4}, train acc {:.2}%",
                epoch, config.epochs, metrics.train_loss, metrics.train_accuracy
            ),
        }
        history.push(metrics);
    }

    let inner_device = <B::InnerBackend as Backend>::Device::default();
    BurnClassifier::new(model.valid(), model_config, inner_device).save(output_dir)?;
    registry.write_mapping(&output_dir.join(LABELS_FILE_NAME))?;
    info!("Saved model artifact to {:?}", output_dir);

    Ok(TrainingSummary {
        num_classes: registry.len(),
        train_samples: train_data.len(),
        val_samples: val_data.len(),
        history,
        output_dir: output_dir.to_path_buf(),
        duration_secs: start.elapsed().as_secs_f64(),
    })
}

/// NHWC pixels to an NCHW image tensor plus integer targets
fn batch_tensors<B: Backend>(
    batch: BatchData,
    image_size: usize,
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
    let n = batch.len();
    let images = Tensor::<B, 4>::from_data(
        TensorData::new(batch.pixels, [n, image_size, image_size, 3]),
        device,
    )
    .permute([0, 3, 1, 2]);
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(batch.targets, [n]), device);
    (images, targets)
}

/// Number of rows whose argmax matches the target
fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let n = targets.dims()[0];
    let predictions = logits.argmax(1).reshape([n]);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// Accuracy in percent over `data`, without augmentation
fn evaluate<B: Backend>(
    model: &SpeciesNet<B>,
    data: &LabeledImages,
    batch_size: usize,
    device: &B::Device,
) -> f64 {
    // unused: the batcher only draws from the rng when augmenting
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut correct = 0usize;
    let mut total = 0usize;

    for chunk in indices.chunks(batch_size) {
        let batch = data.batch(chunk, None, &mut rng);
        if batch.is_empty() {
            continue;
        }
        let (images, targets) = batch_tensors::<B>(batch, data.image_size() as usize, device);
        total += targets.dims()[0];
        correct += count_correct(model.forward(images), targets);
    }

    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}
