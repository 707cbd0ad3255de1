use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Pixel-wise leaf segmentation.
///
/// Implemented by the ONNX UNet and by test doubles, so the pipeline and the
/// HTTP layer can run without model files.
pub trait SegmentationModel: Send + Sync {
    /// Predict a three-class mask (0 / 128 / 255) with the same dimensions as `image`.
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage>;

    /// Square input resolution the model runs at.
    fn input_size(&self) -> u32;
}

/// Whole-image disease classification from an image and its segmentation mask.
pub trait DiseaseClassifier: Send + Sync {
    /// Up to `top_k` predictions, most confident first.
    fn classify(&self, image: &RgbImage, mask: &GrayImage, top_k: usize)
        -> Result<Vec<Prediction>>;

    fn class_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}
