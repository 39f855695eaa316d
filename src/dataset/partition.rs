//! Train/validation/test partitioning of a class-labeled image tree
//!
//! Every class directory of the source tree is split independently:
//!
//! 1. Classes without images are skipped and produce no output.
//! 2. Classes with at most [`SMALL_CLASS_THRESHOLD`] images go to `train/` whole.
//! 3. Larger classes get two sequential seeded hold-out splits: first the
//!    test set (`ceil(test_size * n)` files), then the validation set
//!    (`ceil(val_size * m)` of the `m` remaining files). The rest is training.
//!
//! A class that fails to split is copied whole into `train/` and the run
//! continues with the next class. Files are copied, never moved, and keep
//! their names.
//!
//! Each hold-out split draws from a fresh RNG seeded with the configured
//! seed, so the assignment of one class never depends on the other classes
//! or on processing order.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::loader::{list_class_names, list_images};
use crate::utils::error::{Result, SpeciesError};
use crate::utils::logging::ProgressLogger;

/// Classes with this many images or fewer are not split
pub const SMALL_CLASS_THRESHOLD: usize = 3;

/// File name of the report written next to the partitioned subsets
pub const REPORT_FILE_NAME: &str = "partition_report.json";

/// One of the three output subsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Val,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Val, Subset::Test];

    /// Directory name of the subset under the target root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Val => "val",
            Subset::Test => "test",
        }
    }
}

/// Configuration for dataset partitioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Fraction of each class held out as the test set
    pub test_size: f64,
    /// Fraction of the remaining images held out as the validation set
    pub val_size: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Process classes in parallel
    pub parallel: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            val_size: 0.2,
            seed: crate::DEFAULT_SEED,
            parallel: false,
        }
    }
}

impl PartitionConfig {
    /// Create a validated configuration
    pub fn new(test_size: f64, val_size: f64, seed: u64) -> Result<Self> {
        for (name, value) in [("test_size", test_size), ("val_size", val_size)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(SpeciesError::Config(format!(
                    "{} must be strictly between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }

        Ok(Self {
            test_size,
            val_size,
            seed,
            parallel: false,
        })
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// The three disjoint file sets of one class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSplit {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
}

impl ClassSplit {
    pub fn files(&self, subset: Subset) -> &[PathBuf] {
        match subset {
            Subset::Train => &self.train,
            Subset::Val => &self.val,
            Subset::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hold out `ceil(fraction * n)` shuffled files, returning `(rest, held_out)`
///
/// Fails when either side would end up empty.
fn holdout_split(
    files: &[PathBuf],
    fraction: f64,
    seed: u64,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let n = files.len();
    let n_holdout = (n as f64 * fraction).ceil() as usize;

    if n_holdout == 0 || n_holdout >= n {
        return Err(SpeciesError::Dataset(format!(
            "holding out {:.2} of {} images leaves an empty subset",
            fraction, n
        )));
    }

    let mut shuffled = files.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let rest = shuffled.split_off(n_holdout);
    Ok((rest, shuffled))
}

/// Split one class's images into train/val/test
pub fn split_class(images: &[PathBuf], config: &PartitionConfig) -> Result<ClassSplit> {
    if images.len() <= SMALL_CLASS_THRESHOLD {
        return Ok(ClassSplit {
            train: images.to_vec(),
            ..Default::default()
        });
    }

    let (remaining, test) = holdout_split(images, config.test_size, config.seed)?;
    let (train, val) = holdout_split(&remaining, config.val_size, config.seed)?;

    Ok(ClassSplit { train, val, test })
}

/// What happened to a class during partitioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassOutcome {
    /// Split into train/val/test
    Split,
    /// Too few images to split; everything went to train
    TooFewImages,
    /// No images; nothing was written
    Skipped,
    /// Splitting failed; everything went to train
    Fallback { reason: String },
}

/// Per-class result of a partition run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassReport {
    pub class_name: String,
    pub outcome: ClassOutcome,
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl ClassReport {
    fn empty(class_name: &str, outcome: ClassOutcome) -> Self {
        Self {
            class_name: class_name.to_string(),
            outcome,
            train: 0,
            val: 0,
            test: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

/// Summary of a complete partition run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionReport {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub config: PartitionConfig,
    pub created_at: DateTime<Utc>,
    /// Per-class results in class name order
    pub classes: Vec<ClassReport>,
}

impl PartitionReport {
    /// Total image counts as (train, val, test)
    pub fn totals(&self) -> (usize, usize, usize) {
        self.classes.iter().fold((0, 0, 0), |(tr, va, te), c| {
            (tr + c.train, va + c.val, te + c.test)
        })
    }

    pub fn class(&self, class_name: &str) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.class_name == class_name)
    }

    pub fn count_outcome(&self, matches: impl Fn(&ClassOutcome) -> bool) -> usize {
        self.classes.iter().filter(|c| matches(&c.outcome)).count()
    }

    /// Save the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously saved report
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn copy_files(files: &[PathBuf], dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)?;

    for src in files {
        let file_name = src.file_name().ok_or_else(|| {
            SpeciesError::Dataset(format!("Image path has no file name: {:?}", src))
        })?;
        fs::copy(src, dest_dir.join(file_name))?;
    }

    Ok(())
}

fn remove_class_dirs(target: &Path, class_name: &str) -> Result<()> {
    for subset in Subset::ALL {
        let dir = target.join(subset.dir_name()).join(class_name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn materialize_class(
    class_name: &str,
    images: &[PathBuf],
    target: &Path,
    config: &PartitionConfig,
) -> Result<ClassReport> {
    let split = split_class(images, config)?;

    for subset in Subset::ALL {
        let files = split.files(subset);
        if files.is_empty() {
            continue;
        }
        copy_files(files, &target.join(subset.dir_name()).join(class_name))?;
    }

    let outcome = if images.len() <= SMALL_CLASS_THRESHOLD {
        warn!(
            "Class '{}' has only {} images, all go to train",
            class_name,
            images.len()
        );
        ClassOutcome::TooFewImages
    } else {
        ClassOutcome::Split
    };

    info!(
        "Class '{}': train={} val={} test={}",
        class_name,
        split.train.len(),
        split.val.len(),
        split.test.len()
    );

    Ok(ClassReport {
        class_name: class_name.to_string(),
        outcome,
        train: split.train.len(),
        val: split.val.len(),
        test: split.test.len(),
    })
}

/// Partition a single class directory into the target tree
///
/// Only an error in the all-to-train fallback is returned; every other
/// failure is recorded in the report.
pub fn partition_class(
    class_name: &str,
    source: &Path,
    target: &Path,
    config: &PartitionConfig,
) -> Result<ClassReport> {
    let images = list_images(&source.join(class_name))?;

    if images.is_empty() {
        warn!("Class '{}' has no images, skipping", class_name);
        return Ok(ClassReport::empty(class_name, ClassOutcome::Skipped));
    }

    match materialize_class(class_name, &images, target, config) {
        Ok(report) => Ok(report),
        Err(e) => {
            warn!(
                "Failed to split class '{}': {}. Copying all {} images to train",
                class_name,
                e,
                images.len()
            );
            remove_class_dirs(target, class_name)?;
            copy_files(&images, &target.join(Subset::Train.dir_name()).join(class_name))?;

            Ok(ClassReport {
                train: images.len(),
                ..ClassReport::empty(
                    class_name,
                    ClassOutcome::Fallback {
                        reason: e.to_string(),
                    },
                )
            })
        }
    }
}

/// Partition every class under `source` into `target/{train,val,test}/<class>/`
///
/// The report is also written to `target/partition_report.json`.
pub fn partition_dataset(
    source: &Path,
    target: &Path,
    config: &PartitionConfig,
) -> Result<PartitionReport> {
    info!("Partitioning dataset");
    info!("  Source: {:?}", source);
    info!("  Target: {:?}", target);
    info!(
        "  test_size={} val_size={} seed={}",
        config.test_size, config.val_size, config.seed
    );

    let class_names = list_class_names(source)?;
    info!("  Found {} classes", class_names.len());

    for subset in Subset::ALL {
        fs::create_dir_all(target.join(subset.dir_name()))?;
    }

    let classes = if config.parallel {
        class_names
            .par_iter()
            .map(|name| partition_class(name, source, target, config))
            .collect::<Result<Vec<_>>>()?
    } else {
        let mut progress = ProgressLogger::new("Partitioning classes", class_names.len());
        let mut classes = Vec::with_capacity(class_names.len());
        for name in &class_names {
            classes.push(partition_class(name, source, target, config)?);
            progress.increment();
        }
        progress.finish();
        classes
    };

    let report = PartitionReport {
        source_dir: source.to_path_buf(),
        target_dir: target.to_path_buf(),
        config: config.clone(),
        created_at: Utc::now(),
        classes,
    };

    let (train, val, test) = report.totals();
    info!(
        "Partition complete: train={} val={} test={} ({} skipped, {} fallback)",
        train,
        val,
        test,
        report.count_outcome(|o| matches!(o, ClassOutcome::Skipped)),
        report.count_outcome(|o| matches!(o, ClassOutcome::Fallback { .. }))
    );

    report.save(&target.join(REPORT_FILE_NAME))?;

    Ok(report)
}
