//! Species Classifier CLI
//!
//! Offline tooling around the inference service: dataset partitioning,
//! training, species mapping export, model artifact initialization and
//! local prediction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use species_classifier::backend::{backend_name, TrainingBackend};
use species_classifier::dataset::{
    partition_dataset, AugmentationConfig, ClassOutcome, PartitionConfig,
};
use species_classifier::inference::{Predictor, PredictorConfig};
use species_classifier::model::{
    init_model_artifact, load_classifier, SpeciesNetConfig, SpeciesRegistry, LABELS_FILE_NAME,
};
use species_classifier::training::{run_training, TrainingConfig};
use species_classifier::utils::logging::{init_logging, LogConfig};
use species_classifier::utils::{format_duration, format_progress_bar};
use species_classifier::{DEFAULT_SEED, IMAGE_SIZE};

/// Species classification from photographs
#[derive(Parser, Debug)]
#[command(name = "species_classifier")]
#[command(version)]
#[command(about = "Dataset partitioning and species prediction with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Partition a class-labeled image tree into train/val/test
    Partition {
        /// Directory with one subdirectory of images per class
        #[arg(short, long, default_value = "data/raw")]
        source_dir: PathBuf,

        /// Directory that receives train/, val/ and test/
        #[arg(short, long, default_value = "data/processed")]
        target_dir: PathBuf,

        /// Fraction of each class held out for testing
        #[arg(long, default_value = "0.2")]
        test_size: f64,

        /// Fraction of the remainder held out for validation
        #[arg(long, default_value = "0.2")]
        val_size: f64,

        /// Random seed for reproducibility
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Process classes in parallel
        #[arg(long, default_value = "false")]
        parallel: bool,
    },

    /// Train a model on a partitioned dataset
    Train {
        /// Training directory with one subdirectory per species
        #[arg(short, long, default_value = "data/processed/train")]
        train_dir: PathBuf,

        /// Validation directory with the same layout
        #[arg(long, default_value = "data/processed/val")]
        val_dir: PathBuf,

        /// Output model directory
        #[arg(short, long, default_value = "models/species")]
        output_dir: PathBuf,

        /// Number of training epochs
        #[arg(short, long, default_value = "20")]
        epochs: usize,

        /// Batch size
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Adam learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Channel width multiplier
        #[arg(long, default_value = "1.0")]
        width: f64,

        /// Random seed for shuffling and augmentation
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Train on unmodified images
        #[arg(long, default_value = "false")]
        no_augmentation: bool,
    },

    /// Write the species mapping (labels.json) for a training directory
    Labels {
        /// Training directory with one subdirectory per species
        #[arg(short, long, default_value = "data/processed/train")]
        train_dir: PathBuf,

        /// Output mapping file
        #[arg(short, long, default_value = "models/species/labels.json")]
        output: PathBuf,
    },

    /// Write a freshly initialized model artifact
    InitModel {
        /// Training directory used for the species list (built-in list if omitted)
        #[arg(short, long)]
        train_dir: Option<PathBuf>,

        /// Output model directory
        #[arg(short, long, default_value = "models/species")]
        output_dir: PathBuf,

        /// Channel width multiplier
        #[arg(long, default_value = "1.0")]
        width: f64,
    },

    /// Classify a single image
    Predict {
        /// Path to the image
        #[arg(short, long)]
        image: PathBuf,

        /// Model artifact directory
        #[arg(short, long, default_value = "models/species", env = "SPECIES_MODEL_DIR")]
        model_dir: PathBuf,

        /// Training directory used when the model has no labels.json
        #[arg(short, long, env = "SPECIES_TRAIN_DIR")]
        train_dir: Option<PathBuf>,

        /// Classifier output holding the probabilities
        #[arg(long, env = "SPECIES_OUTPUT_KEY")]
        output_key: Option<String>,

        /// Number of top predictions to show
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Partition {
            source_dir,
            target_dir,
            test_size,
            val_size,
            seed,
            parallel,
        } => cmd_partition(source_dir, target_dir, test_size, val_size, seed, parallel),
        Commands::Train {
            train_dir,
            val_dir,
            output_dir,
            epochs,
            batch_size,
            learning_rate,
            width,
            seed,
            no_augmentation,
        } => {
            let config = TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                seed,
                width_multiplier: width,
                augmentation: if no_augmentation {
                    AugmentationConfig::disabled()
                } else {
                    AugmentationConfig::default()
                },
                ..Default::default()
            };
            cmd_train(train_dir, val_dir, output_dir, config)
        }
        Commands::Labels { train_dir, output } => cmd_labels(train_dir, output),
        Commands::InitModel {
            train_dir,
            output_dir,
            width,
        } => cmd_init_model(train_dir, output_dir, width),
        Commands::Predict {
            image,
            model_dir,
            train_dir,
            output_key,
            top_k,
        } => cmd_predict(image, model_dir, train_dir, output_key, top_k),
    }
}

fn cmd_partition(
    source_dir: PathBuf,
    target_dir: PathBuf,
    test_size: f64,
    val_size: f64,
    seed: u64,
    parallel: bool,
) -> Result<()> {
    let config = PartitionConfig::new(test_size, val_size, seed)?.with_parallel(parallel);

    println!("{}", "Partition Configuration:".cyan().bold());
    println!("  📂 Source:    {:?}", source_dir);
    println!("  📁 Target:    {:?}", target_dir);
    println!("  🧪 Test size: {:.0}%", test_size * 100.0);
    println!("  📏 Val size:  {:.0}% of remainder", val_size * 100.0);
    println!("  🎲 Seed:      {}", seed);
    println!();

    let start = Instant::now();
    let report = partition_dataset(&source_dir, &target_dir, &config)?;
    let elapsed = start.elapsed().as_secs_f64();

    let (train, val, test) = report.totals();
    let split = report.count_outcome(|o| *o == ClassOutcome::Split);
    let small = report.count_outcome(|o| *o == ClassOutcome::TooFewImages);
    let skipped = report.count_outcome(|o| *o == ClassOutcome::Skipped);
    let fallback = report.count_outcome(|o| matches!(o, ClassOutcome::Fallback { .. }));

    println!("{}", "Partition Summary:".cyan().bold());
    println!("  Classes split:          {}", split);
    println!("  Classes train-only:     {}", small);
    if skipped > 0 {
        println!("  Classes skipped:        {}", skipped.to_string().yellow());
    }
    if fallback > 0 {
        println!("  Classes with fallback:  {}", fallback.to_string().red());
        for class in &report.classes {
            if let ClassOutcome::Fallback { reason } = &class.outcome {
                println!("    {} - {}", class.class_name, reason);
            }
        }
    }
    println!();
    println!("  Train: {:>7}", train);
    println!("  Val:   {:>7}", val);
    println!("  Test:  {:>7}", test);
    println!();
    println!(
        "{} Partitioned {} images in {}",
        "Done.".green().bold(),
        train + val + test,
        format_duration(elapsed)
    );

    Ok(())
}

fn cmd_train(
    train_dir: PathBuf,
    val_dir: PathBuf,
    output_dir: PathBuf,
    config: TrainingConfig,
) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  📂 Train:         {:?}", train_dir);
    println!("  ✅ Validation:    {:?}", val_dir);
    println!("  💾 Output:        {:?}", output_dir);
    println!("  🔄 Epochs:        {}", config.epochs);
    println!("  📦 Batch size:    {}", config.batch_size);
    println!("  📈 Learning rate: {}", config.learning_rate);
    println!(
        "  🎨 Augmentation:  {}",
        if config.augmentation.is_identity() { "off" } else { "on" }
    );
    println!("  🖥️  Backend:       {}", backend_name());
    println!();

    let device = Default::default();
    let summary = run_training::<TrainingBackend>(
        &train_dir,
        Some(&val_dir),
        &output_dir,
        &config,
        &device,
    )?;

    println!("{}", "Training Summary:".cyan().bold());
    println!("  Species:            {}", summary.num_classes);
    println!("  Training images:    {}", summary.train_samples);
    println!("  Validation images:  {}", summary.val_samples);
    if let Some(last) = summary.final_metrics() {
        println!("  Final loss:         {:.4}", last.train_loss);
        println!("  Final train acc:    {:.2}%", last.train_accuracy);
    }
    match summary.best_val_accuracy() {
        Some(acc) => println!("  Best val acc:       {}", format!("{:.2}%", acc).green()),
        None => println!("  Best val acc:       {}", "n/a".yellow()),
    }
    println!();
    println!(
        "{} Model written to {:?} in {}",
        "Done.".green().bold(),
        summary.output_dir,
        format_duration(summary.duration_secs)
    );

    Ok(())
}

fn cmd_labels(train_dir: PathBuf, output: PathBuf) -> Result<()> {
    let registry = SpeciesRegistry::from_directory(&train_dir)?;
    registry.write_mapping(&output)?;

    println!(
        "{} Wrote {} species to {:?}",
        "Done.".green().bold(),
        registry.len(),
        output
    );
    Ok(())
}

fn cmd_init_model(train_dir: Option<PathBuf>, output_dir: PathBuf, width: f64) -> Result<()> {
    let registry = match &train_dir {
        Some(dir) => SpeciesRegistry::from_directory(dir)?,
        None => SpeciesRegistry::fallback(),
    };

    let config = SpeciesNetConfig::new(registry.len())
        .with_input_size(IMAGE_SIZE as usize)
        .with_width_multiplier(width);

    info!(
        "Initializing model for {} species ({})",
        registry.len(),
        registry.source()
    );
    init_model_artifact(&output_dir, &registry, config)?;

    println!(
        "{} Model artifact written to {:?} (weights are untrained)",
        "Done.".green().bold(),
        output_dir
    );
    println!("  Species mapping: {:?}", output_dir.join(LABELS_FILE_NAME));
    Ok(())
}

fn cmd_predict(
    image: PathBuf,
    model_dir: PathBuf,
    train_dir: Option<PathBuf>,
    output_key: Option<String>,
    top_k: usize,
) -> Result<()> {
    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  📷 Image:   {:?}", image);
    println!("  🧠 Model:   {:?}", model_dir);
    println!("  🖥️  Backend: {}", backend_name());
    println!();

    if !image.exists() {
        anyhow::bail!("Image not found: {:?}", image);
    }

    let registry = SpeciesRegistry::resolve(Some(&model_dir), train_dir.as_deref());
    let classifier = load_classifier(&model_dir)?;
    registry.matches_output_dimension(classifier.num_classes());

    let predictor = Predictor::new(
        Some(classifier),
        Arc::new(registry),
        PredictorConfig {
            output_key,
            ..Default::default()
        },
    );

    let start = Instant::now();
    let prediction = predictor.classify_path(&image)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    print!("{}", prediction.display());
    println!("Time: {:.2} ms", elapsed_ms);
    println!();
    println!("{}", format!("Top-{}:", top_k).cyan().bold());
    for (rank, (idx, prob)) in prediction.top_k(top_k).into_iter().enumerate() {
        let name = predictor.registry().name(idx).unwrap_or("Unknown");
        println!(
            "  {}. {:40} {}",
            rank + 1,
            name,
            format_progress_bar(prob as f64, 20)
        );
    }

    Ok(())
}
