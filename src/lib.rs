pub mod api;
pub mod batch;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod errors;
pub mod imageops_ai;
pub mod model;
pub mod pipeline;
pub mod preprocessing;
pub mod segmentation;
pub mod traits;

pub mod mocks;

pub use batch::{BatchSummary, DirectoryProcessor};
pub use classifier::ShuffleNetClassifier;
pub use config::{Cli, Command, ModelConfig, PreprocessConfig};
pub use errors::{LeafSegError, Result};
pub use model::UnetModel;
pub use pipeline::{Analysis, LeafAnalysis, LeafAnalyzer};
pub use segmentation::{MaskClass, MaskStats};
pub use traits::*;
