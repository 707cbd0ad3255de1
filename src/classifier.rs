use std::fs;
use std::path::Path;

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use ndarray::prelude::*;
use ort::{session::Session, value::TensorRef};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    errors::{LeafSegError, Result},
    model::{build_session, input_shape, io_names, TensorLayout},
    segmentation::argmax,
    traits::{DiseaseClassifier, Prediction},
};

/// ImageNet statistics for the RGB channels; the mask channel passes through.
const MEAN: [f32; 4] = [0.485, 0.456, 0.406, 0.0];
const STD: [f32; 4] = [0.229, 0.224, 0.225, 1.0];
const CHANNELS: usize = 4;

/// Disease classifier over RGB + segmentation mask input.
pub struct ShuffleNetClassifier {
    pub image_size: u32,
    layout: TensorLayout,
    input_name: String,
    output_name: String,
    class_names: Vec<String>,
    session: Mutex<Session>,
}

impl ShuffleNetClassifier {
    pub fn new(
        model_path: &Path,
        class_names: Vec<String>,
        device_id: i32,
        num_threads: usize,
    ) -> Result<Self> {
        let session = build_session(model_path, device_id, num_threads)?;
        let shape = input_shape(&session)?;
        let (layout, image_size) = TensorLayout::detect(&shape, CHANNELS as i64)?;
        let (input_name, output_name) = io_names(&session)?;

        info!(
            path = %model_path.display(),
            ?shape,
            classes = class_names.len(),
            "classifier loaded"
        );

        let classifier = Self {
            image_size,
            layout,
            input_name,
            output_name,
            class_names,
            session: Mutex::new(session),
        };

        let blank = build_input(
            &RgbImage::new(image_size, image_size),
            &GrayImage::new(image_size, image_size),
            image_size,
            layout,
        );
        classifier.logits(blank.view())?;

        Ok(classifier)
    }

    fn logits(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let logits = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        Ok(logits)
    }
}

impl DiseaseClassifier for ShuffleNetClassifier {
    fn classify(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
        top_k: usize,
    ) -> Result<Vec<Prediction>> {
        let tensor = build_input(image, mask, self.image_size, self.layout);
        let logits = self.logits(tensor.view())?;
        debug!(logits = logits.len(), best = argmax(logits.iter().copied()), "classifier output");

        Ok(top_predictions(&softmax(&logits), top_k, &self.class_names))
    }

    fn class_count(&self) -> usize {
        self.class_names.len()
    }
}

/// One class name per line; blank lines are skipped.
pub fn load_class_names(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| LeafSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "read class names".to_string(),
        source: e,
    })?;

    let names: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        return Err(LeafSegError::validation(
            "class_names",
            format!("{} contains no class names", path.display()),
        ));
    }
    Ok(names)
}

/// Normalised 4-channel input: RGB scaled to `[0, 1]` then standardised,
/// mask scaled to `[0, 1]`.
pub fn build_input(
    image: &RgbImage,
    mask: &GrayImage,
    size: u32,
    layout: TensorLayout,
) -> Array4<f32> {
    let rgb = imageops::resize(image, size, size, FilterType::Triangle);
    let mask = imageops::resize(mask, size, size, FilterType::Nearest);
    let side = size as usize;

    let mut tensor = Array4::<f32>::zeros((1, CHANNELS, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    for (x, y, pixel) in mask.enumerate_pixels() {
        tensor[[0, 3, y as usize, x as usize]] = (pixel.0[0] as f32 / 255.0 - MEAN[3]) / STD[3];
    }

    match layout {
        TensorLayout::Nchw => tensor,
        TensorLayout::Nhwc => tensor
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .into_owned(),
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|v| v / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// The `k` most probable classes, highest first. With class names loaded, `k`
/// is capped at their count. Indices without a name are labelled `Class_<index>`.
pub fn top_predictions(
    probabilities: &[f32],
    k: usize,
    class_names: &[String],
) -> Vec<Prediction> {
    let k = if class_names.is_empty() {
        k
    } else {
        k.min(class_names.len())
    };

    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(k)
        .map(|(index, confidence)| Prediction {
            label: class_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("Class_{index}")),
            confidence,
        })
        .collect()
}
