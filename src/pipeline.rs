use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::{debug, info};

use crate::{
    classifier::{load_class_names, ShuffleNetClassifier},
    config::{ModelConfig, PreprocessConfig},
    errors::Result,
    model::UnetModel,
    preprocessing::{green_ratio, preprocess_leaf},
    segmentation::MaskStats,
    traits::{DiseaseClassifier, Prediction, SegmentationModel},
};

pub const NOT_A_LEAF_DESCRIPTION: &str =
    "No plant leaf detected in the image. Please upload a clear photo of a plant leaf.";

/// Outcome of analysing one photo.
#[derive(Debug, Clone)]
pub enum Analysis {
    /// The photo failed the green-pixel check; no model was run.
    NotALeaf { green_percent: f64 },
    Leaf(LeafAnalysis),
}

#[derive(Debug, Clone)]
pub struct LeafAnalysis {
    /// The enhanced image the models saw.
    pub preprocessed: RgbImage,
    pub mask: GrayImage,
    pub stats: MaskStats,
    /// Empty when no classifier is configured.
    pub predictions: Vec<Prediction>,
}

impl LeafAnalysis {
    pub fn top_prediction(&self) -> Option<&Prediction> {
        self.predictions.first()
    }
}

/// Preprocess, segment and optionally classify leaf photos.
#[derive(Clone)]
pub struct LeafAnalyzer {
    segmenter: Arc<dyn SegmentationModel>,
    classifier: Option<Arc<dyn DiseaseClassifier>>,
    preprocess: PreprocessConfig,
    top_k: usize,
    check_leaf: bool,
}

impl LeafAnalyzer {
    pub fn new(segmenter: Arc<dyn SegmentationModel>, preprocess: PreprocessConfig) -> Self {
        Self {
            segmenter,
            classifier: None,
            preprocess,
            top_k: 3,
            check_leaf: true,
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn DiseaseClassifier>,
        top_k: usize,
    ) -> Self {
        self.top_k = top_k.max(1);
        info!(
            classes = classifier.class_count(),
            top_k = self.top_k,
            "disease classifier attached"
        );
        self.classifier = Some(classifier);
        self
    }

    pub fn skip_leaf_check(mut self, skip: bool) -> Self {
        self.check_leaf = !skip;
        self
    }

    /// Load the ONNX models named in `config`.
    pub fn from_config(config: &ModelConfig, preprocess: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        preprocess.validate()?;

        let unet = UnetModel::new(&config.model_path, config.device_id, config.num_threads)?;
        let mut analyzer = Self::new(Arc::new(unet), preprocess);

        if let Some(classifier_path) = &config.classifier_path {
            let class_names = match &config.class_names {
                Some(path) => load_class_names(path)?,
                None => Vec::new(),
            };
            let classifier = ShuffleNetClassifier::new(
                classifier_path,
                class_names,
                config.device_id,
                config.num_threads,
            )?;
            analyzer = analyzer.with_classifier(Arc::new(classifier), config.top_k);
        }

        Ok(analyzer)
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn analyze(&self, image: &DynamicImage) -> Result<Analysis> {
        self.analyze_rgb(&image.to_rgb8())
    }

    pub fn analyze_rgb(&self, image: &RgbImage) -> Result<Analysis> {
        let started = Instant::now();
        let (width, height) = image.dimensions();

        if self.check_leaf {
            let green_percent = green_ratio(image)?;
            debug!(green_percent, "leaf check");
            if green_percent <= self.preprocess.min_green_percent {
                info!(width, height, green_percent, "image rejected: not a leaf");
                return Ok(Analysis::NotALeaf { green_percent });
            }
        }

        let step = Instant::now();
        let preprocessed = preprocess_leaf(image, &self.preprocess)?;
        debug!(elapsed = ?step.elapsed(), "preprocessing done");

        let step = Instant::now();
        let mask = self.segmenter.predict_mask(&preprocessed)?;
        debug!(elapsed = ?step.elapsed(), "segmentation done");

        let stats = MaskStats::from_mask(&mask);

        let predictions = match &self.classifier {
            Some(classifier) => {
                let step = Instant::now();
                let predictions = classifier.classify(&preprocessed, &mask, self.top_k)?;
                debug!(elapsed = ?step.elapsed(), "classification done");
                predictions
            }
            None => Vec::new(),
        };

        info!(
            width,
            height,
            background = format_args!("{:.1}%", stats.background_percent),
            healthy = format_args!("{:.1}%", stats.healthy_percent),
            diseased = format_args!("{:.1}%", stats.diseased_percent),
            disease = predictions.first().map(|p| p.label.as_str()),
            elapsed = ?started.elapsed(),
            "leaf analysed"
        );

        Ok(Analysis::Leaf(LeafAnalysis {
            preprocessed,
            mask,
            stats,
            predictions,
        }))
    }
}
