//! Segmentation masks: decoding raw model output into a three-class mask and
//! the per-class pixel statistics reported to clients.

use image::{GrayImage, Luma};
use ndarray::{ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{LeafSegError, Result};

pub use crate::imageops_ai::mask::{colorize, extract_diseased, overlay};

/// Pixel classes encoded in a mask as grayscale levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskClass {
    Background,
    Healthy,
    Diseased,
}

impl MaskClass {
    pub const fn value(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Healthy => 128,
            Self::Diseased => 255,
        }
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Background),
            128 => Some(Self::Healthy),
            255 => Some(Self::Diseased),
            _ => None,
        }
    }

    /// Model class index to mask class. Indices past the known classes are
    /// treated as disease.
    pub const fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Background,
            1 => Self::Healthy,
            _ => Self::Diseased,
        }
    }

    /// Bucket a probability-like level in `[0, 255]` into thirds.
    pub const fn from_level(level: u8) -> Self {
        match level {
            0..=84 => Self::Background,
            85..=169 => Self::Healthy,
            _ => Self::Diseased,
        }
    }
}

/// Share of mask pixels in each class, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskStats {
    pub background_percent: f64,
    pub healthy_percent: f64,
    pub diseased_percent: f64,
}

/// Raw per-class pixel counts behind [`MaskStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub background: u64,
    pub healthy: u64,
    pub diseased: u64,
    pub total: u64,
}

impl ClassCounts {
    pub fn from_mask(mask: &GrayImage) -> Self {
        let mut counts = Self {
            total: mask.width() as u64 * mask.height() as u64,
            ..Self::default()
        };
        for Luma([value]) in mask.pixels() {
            match MaskClass::from_value(*value) {
                Some(MaskClass::Background) => counts.background += 1,
                Some(MaskClass::Healthy) => counts.healthy += 1,
                Some(MaskClass::Diseased) => counts.diseased += 1,
                None => {}
            }
        }
        counts
    }
}

impl MaskStats {
    pub fn from_mask(mask: &GrayImage) -> Self {
        Self::from_counts(&ClassCounts::from_mask(mask))
    }

    pub fn from_counts(counts: &ClassCounts) -> Self {
        if counts.total == 0 {
            return Self::default();
        }
        let percent = |count: u64| count as f64 / counts.total as f64 * 100.0;
        Self {
            background_percent: percent(counts.background),
            healthy_percent: percent(counts.healthy),
            diseased_percent: percent(counts.diseased),
        }
    }

    /// Share of the leaf (healthy + diseased tissue) that is diseased.
    pub fn disease_severity(&self) -> f64 {
        let leaf = self.healthy_percent + self.diseased_percent;
        if leaf > 0.0 {
            self.diseased_percent / leaf * 100.0
        } else {
            0.0
        }
    }
}

/// Turn one un-batched, channel-last model output into a class mask.
///
/// * `(H, W, C)` with `C >= 3`: argmax over classes.
/// * `(H, W, 2)`: argmax, foreground marked as disease.
/// * `(H, W)` or `(H, W, 1)`: the single probability is bucketed into thirds.
pub fn decode_prediction(prediction: ArrayViewD<f32>) -> Result<GrayImage> {
    let prediction = match prediction.ndim() {
        2 => prediction.insert_axis(Axis(2)),
        3 => prediction,
        rank => {
            return Err(LeafSegError::model(
                "prediction decoding",
                format!("expected a rank 2 or 3 prediction, got rank {rank}"),
            ))
        }
    };

    let shape = prediction.shape();
    let (height, width, channels) = (shape[0], shape[1], shape[2]);
    if height == 0 || width == 0 || channels == 0 {
        return Err(LeafSegError::model(
            "prediction decoding",
            format!("empty prediction of shape {shape:?}"),
        ));
    }

    let (Ok(width_u32), Ok(height_u32)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(LeafSegError::model(
            "prediction decoding",
            "prediction dimensions exceed u32",
        ));
    };

    let prediction = prediction.into_dimensionality::<ndarray::Ix3>()?;
    let mask = GrayImage::from_fn(width_u32, height_u32, |x, y| {
        let scores = prediction.slice(ndarray::s![y as usize, x as usize, ..]);
        let class = match channels {
            1 => MaskClass::from_level((scores[0] * 255.0) as u8),
            2 => {
                if scores[1] > scores[0] {
                    MaskClass::Diseased
                } else {
                    MaskClass::Background
                }
            }
            _ => MaskClass::from_index(argmax(scores.iter().copied())),
        };
        Luma([class.value()])
    });

    Ok(mask)
}

/// Index of the first maximum; NaN never wins.
pub(crate) fn argmax(values: impl IntoIterator<Item = f32>) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (index, value) in values.into_iter().enumerate() {
        if value > best.1 {
            best = (index, value);
        }
    }
    best.0
}
