use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    config::PreprocessConfig,
    errors::{LeafSegError, Result},
    pipeline::{Analysis, LeafAnalyzer},
    preprocessing::preprocess_leaf,
    segmentation::{colorize, extract_diseased, overlay, MaskStats},
    traits::Prediction,
};

/// Counts reported at the end of a directory run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    /// Images rejected by the leaf check.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Skipped,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsRecord<'a> {
    source: &'a Path,
    is_leaf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    green_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_stats: Option<MaskStats>,
    /// Diseased share of the leaf tissue, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    disease_severity: Option<f64>,
    #[serde(skip_serializing_if = "<[Prediction]>::is_empty")]
    predictions: &'a [Prediction],
}

/// Walks an input directory and mirrors its layout under an output directory.
pub struct DirectoryProcessor {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl DirectoryProcessor {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Segment every image: writes `<stem>_mask.png`, `<stem>_colored.png`,
    /// `<stem>_overlay.png`, `<stem>_diseased.png` and `<stem>_stats.json`.
    pub fn segment(&self, analyzer: &LeafAnalyzer, overlay_alpha: f32) -> Result<BatchSummary> {
        self.run(|input_file, stem| {
            let image = open_image(input_file)?;
            match analyzer.analyze(&image)? {
                Analysis::NotALeaf { green_percent } => {
                    warn!(file = %input_file.display(), green_percent, "not a leaf, skipped");
                    write_stats(
                        &with_suffix(stem, "_stats.json"),
                        &StatsRecord {
                            source: input_file,
                            is_leaf: false,
                            green_percent: Some(green_percent),
                            mask_stats: None,
                            disease_severity: None,
                            predictions: &[],
                        },
                    )?;
                    Ok(Outcome::Skipped)
                }
                Analysis::Leaf(result) => {
                    let rgb = image.to_rgb8();
                    save(
                        &DynamicImage::ImageLuma8(result.mask.clone()),
                        &with_suffix(stem, "_mask.png"),
                    )?;
                    save(
                        &DynamicImage::ImageRgb8(colorize(&result.mask)),
                        &with_suffix(stem, "_colored.png"),
                    )?;
                    save(
                        &DynamicImage::ImageRgb8(overlay(&rgb, &result.mask, overlay_alpha)),
                        &with_suffix(stem, "_overlay.png"),
                    )?;
                    save(
                        &DynamicImage::ImageRgb8(extract_diseased(&rgb, &result.mask)),
                        &with_suffix(stem, "_diseased.png"),
                    )?;
                    write_stats(
                        &with_suffix(stem, "_stats.json"),
                        &StatsRecord {
                            source: input_file,
                            is_leaf: true,
                            green_percent: None,
                            mask_stats: Some(result.stats),
                            disease_severity: Some(result.stats.disease_severity()),
                            predictions: &result.predictions,
                        },
                    )?;
                    Ok(Outcome::Processed)
                }
            }
        })
    }

    /// Run only the enhancement filters, writing `<stem>_preprocessed.<format>`.
    pub fn preprocess(&self, config: &PreprocessConfig, format: &str) -> Result<BatchSummary> {
        config.validate()?;
        let suffix = format!("_preprocessed.{format}");
        self.run(|input_file, stem| {
            let image = open_image(input_file)?.into_rgb8();
            let enhanced = preprocess_leaf(&image, config)?;
            save(&DynamicImage::ImageRgb8(enhanced), &with_suffix(stem, &suffix))?;
            Ok(Outcome::Processed)
        })
    }

    fn run<F>(&self, task: F) -> Result<BatchSummary>
    where
        F: Fn(&Path, &Path) -> Result<Outcome> + Sync,
    {
        if !self.input_dir.is_dir() {
            return Err(LeafSegError::FileSystem {
                path: self.input_dir.clone(),
                operation: "input directory lookup".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }

        let image_files = self.collect_image_files();
        if image_files.is_empty() {
            info!(dir = %self.input_dir.display(), "no images to process");
            return Ok(BatchSummary::default());
        }

        let progress_bar = ProgressBar::new(image_files.len() as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
            )
            .map_err(|e| LeafSegError::Configuration {
                message: e.to_string(),
            })?
            .progress_chars("#>-"),
        );

        let processed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        image_files
            .par_iter()
            .progress_with(progress_bar.clone())
            .for_each(|input_file| {
                let result = self
                    .output_stem(input_file)
                    .and_then(|stem| task(input_file, &stem));
                match result {
                    Ok(Outcome::Processed) => processed.fetch_add(1, Ordering::Relaxed),
                    Ok(Outcome::Skipped) => skipped.fetch_add(1, Ordering::Relaxed),
                    Err(e) => {
                        warn!(file = %input_file.display(), error = %e, "processing failed");
                        failed.fetch_add(1, Ordering::Relaxed)
                    }
                };
            });

        progress_bar.finish();

        let summary = BatchSummary {
            processed: processed.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
        };
        info!(?summary, output = %self.output_dir.display(), "directory processed");
        Ok(summary)
    }

    fn collect_image_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// Output path for `input_file` without extension, mirroring its location
    /// below the input directory. Parent directories are created.
    pub fn output_stem(&self, input_file: &Path) -> Result<PathBuf> {
        let relative = input_file
            .strip_prefix(&self.input_dir)
            .map_err(|_| LeafSegError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "relative path".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file is not inside the input directory",
                ),
            })?;

        let stem = self.output_dir.join(relative).with_extension("");
        if let Some(parent) = stem.parent() {
            fs::create_dir_all(parent).map_err(|e| LeafSegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "create output directory".to_string(),
                source: e,
            })?;
        }
        Ok(stem)
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| LeafSegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "open image".to_string(),
        source: Box::new(e),
    })
}

fn save(image: &DynamicImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|e| LeafSegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "save image".to_string(),
        source: Box::new(e),
    })
}

fn write_stats(path: &Path, record: &StatsRecord<'_>) -> Result<()> {
    let fs_error = |operation: &str, source: std::io::Error| LeafSegError::FileSystem {
        path: path.to_path_buf(),
        operation: operation.to_string(),
        source,
    };
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| fs_error("serialize stats", std::io::Error::from(e)))?;
    fs::write(path, json).map_err(|e| fs_error("write stats file", e))
}
