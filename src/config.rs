use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use image::ImageFormat;

use crate::errors::{LeafSegError, Result};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Serve the analysis API over HTTP.
    Serve(ServeConfig),
    /// Segment every image in a directory and write masks, overlays and stats.
    Segment(SegmentConfig),
    /// Run only the preprocessing filters over a directory.
    Preprocess(PreprocessRunConfig),
}

#[derive(Args, Clone, Debug)]
pub struct ModelConfig {
    /// UNet segmentation model in ONNX format.
    #[arg(short, long, env = "UNET_MODEL_PATH")]
    pub model_path: PathBuf,

    /// Optional 4-channel (RGB + mask) disease classifier in ONNX format.
    #[arg(long, env = "CLASSIFIER_MODEL_PATH")]
    pub classifier_path: Option<PathBuf>,

    /// Class names for the classifier, one per line.
    #[arg(long, env = "CLASS_NAMES_PATH", requires = "classifier_path")]
    pub class_names: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    pub top_k: usize,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short, long, default_value_t = default_threads())]
    pub num_threads: usize,
}

#[derive(Args, Clone, Debug)]
pub struct ServeConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Largest accepted request body; base64 inflates images by a third.
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Analyses allowed to run at once; further requests wait.
    #[arg(long, default_value_t = 1)]
    pub max_concurrent: usize,

    #[command(flatten)]
    pub model: ModelConfig,

    #[command(flatten)]
    pub preprocess: PreprocessConfig,
}

#[derive(Args, Clone, Debug)]
pub struct SegmentConfig {
    pub input_dir: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    /// Mask opacity used for the overlay image.
    #[arg(long, default_value_t = 0.4)]
    pub overlay_alpha: f32,

    /// Segment images even when they fail the green-pixel check.
    #[arg(long)]
    pub skip_leaf_check: bool,

    #[command(flatten)]
    pub model: ModelConfig,

    #[command(flatten)]
    pub preprocess: PreprocessConfig,
}

#[derive(Args, Clone, Debug)]
pub struct PreprocessRunConfig {
    pub input_dir: PathBuf,

    #[arg(default_value = "preprocessed")]
    pub output_dir: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[command(flatten)]
    pub preprocess: PreprocessConfig,
}

/// Parameters of the enhancement filters run before segmentation.
#[derive(Args, Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    #[arg(long, default_value_t = 2.0)]
    pub clahe_clip_limit: f32,

    #[arg(long, default_value_t = 8)]
    pub clahe_tile_grid: u32,

    #[arg(long, default_value_t = 10.0)]
    pub denoise_h: f32,

    #[arg(long, default_value_t = 10.0)]
    pub denoise_h_color: f32,

    #[arg(long, default_value_t = 7)]
    pub denoise_template_window: usize,

    #[arg(long, default_value_t = 21)]
    pub denoise_search_window: usize,

    #[arg(long, default_value_t = 1.0)]
    pub sharpen_sigma: f32,

    #[arg(long, default_value_t = 0.5)]
    pub sharpen_amount: f32,

    /// Minimum share of green pixels, in percent, for an image to count as a leaf.
    #[arg(long, default_value_t = 5.0)]
    pub min_green_percent: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tile_grid: 8,
            denoise_h: 10.0,
            denoise_h_color: 10.0,
            denoise_template_window: 7,
            denoise_search_window: 21,
            sharpen_sigma: 1.0,
            sharpen_amount: 0.5,
            min_green_percent: 5.0,
        }
    }
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            classifier_path: None,
            class_names: None,
            top_k: 3,
            device_id: 0,
            num_threads: default_threads(),
        }
    }

    /// Check that every configured model file exists before any session is built.
    pub fn validate(&self) -> Result<()> {
        let files = std::iter::once(("model_path", &self.model_path))
            .chain(self.classifier_path.iter().map(|p| ("classifier_path", p)))
            .chain(self.class_names.iter().map(|p| ("class_names", p)));

        for (field, path) in files {
            if !path.is_file() {
                return Err(LeafSegError::validation(
                    field,
                    format!("{} does not exist", path.display()),
                ));
            }
        }

        if self.top_k == 0 {
            return Err(LeafSegError::validation("top_k", "must be at least 1"));
        }
        Ok(())
    }
}

impl ServeConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| LeafSegError::Configuration {
                message: format!("invalid listen address {}:{}: {e}", self.host, self.port),
            })
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.clahe_tile_grid == 0 {
            return Err(LeafSegError::validation("clahe_tile_grid", "must be positive"));
        }
        if self.denoise_template_window % 2 == 0 || self.denoise_search_window % 2 == 0 {
            return Err(LeafSegError::validation(
                "denoise windows",
                "must be odd sizes",
            ));
        }
        if self.denoise_search_window < self.denoise_template_window {
            return Err(LeafSegError::validation(
                "denoise_search_window",
                "must not be smaller than the template window",
            ));
        }
        Ok(())
    }
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
