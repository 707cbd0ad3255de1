//! Test doubles for the model traits. No ONNX files needed.

use image::{GrayImage, Luma, RgbImage};

use crate::errors::{LeafSegError, Result};
use crate::segmentation::MaskClass;
use crate::traits::{DiseaseClassifier, Prediction, SegmentationModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockMode {
    /// Vertical thirds: background, healthy, diseased.
    Striped,
    /// Every pixel gets the same class.
    Uniform(MaskClass),
    Failing,
}

#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    mode: MockMode,
}

impl MockSegmentationModel {
    pub const fn striped() -> Self {
        Self {
            image_size: 256,
            mode: MockMode::Striped,
        }
    }

    pub const fn uniform(class: MaskClass) -> Self {
        Self {
            image_size: 256,
            mode: MockMode::Uniform(class),
        }
    }

    pub const fn failing() -> Self {
        Self {
            image_size: 256,
            mode: MockMode::Failing,
        }
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        match self.mode {
            MockMode::Striped => Ok(GrayImage::from_fn(width, height, |x, _| {
                let class = MaskClass::from_index((x * 3 / width.max(1)) as usize);
                Luma([class.value()])
            })),
            MockMode::Uniform(class) => {
                Ok(GrayImage::from_pixel(width, height, Luma([class.value()])))
            }
            MockMode::Failing => Err(LeafSegError::model("mock inference", "model unavailable")),
        }
    }

    fn input_size(&self) -> u32 {
        self.image_size
    }
}

/// Always answers with the same label first, followed by generic classes.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    label: String,
}

impl MockClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl DiseaseClassifier for MockClassifier {
    fn classify(
        &self,
        _image: &RgbImage,
        _mask: &GrayImage,
        top_k: usize,
    ) -> Result<Vec<Prediction>> {
        let mut predictions = vec![Prediction {
            label: self.label.clone(),
            confidence: 0.9,
        }];
        predictions.extend((1..top_k).map(|i| Prediction {
            label: format!("Class_{i}"),
            confidence: 0.1 / top_k as f32,
        }));
        Ok(predictions)
    }

    fn class_count(&self) -> usize {
        // PlantVillage
        38
    }
}
