use std::path::Path;

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    errors::{LeafSegError, Result},
    segmentation::decode_prediction,
    traits::SegmentationModel,
};

/// Spatial size used when the exported graph leaves it dynamic.
pub const DEFAULT_INPUT_SIZE: u32 = 256;

/// Memory layout of a 4-D image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[N, H, W, C]`, the Keras default.
    Nhwc,
    /// `[N, C, H, W]`, the PyTorch default.
    Nchw,
}

impl TensorLayout {
    /// Work out layout and square input size from a declared input shape.
    /// Non-positive dimensions are dynamic.
    pub fn detect(shape: &[i64], channels: i64) -> Result<(Self, u32)> {
        let size = |dim: i64| {
            if dim > 0 {
                dim as u32
            } else {
                DEFAULT_INPUT_SIZE
            }
        };

        match shape {
            [_, h, _, c] if *c == channels => Ok((Self::Nhwc, size(*h))),
            [_, c, h, _] if *c == channels => Ok((Self::Nchw, size(*h))),
            _ => Err(LeafSegError::model(
                "input layout detection",
                format!("cannot find {channels} channels in input shape {shape:?}"),
            )),
        }
    }
}

pub(crate) fn build_session(
    model_path: &Path,
    device_id: i32,
    num_threads: usize,
) -> Result<Session> {
    let session = SessionBuilder::new()
        .map_err(|e| model_error("session builder init", e))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(|e| model_error("execution provider registration", e))?
        .with_memory_pattern(true)
        .map_err(|e| model_error("memory pattern", e))?
        .with_intra_threads(num_threads.max(1))
        .map_err(|e| model_error("intra-op threads", e))?
        .commit_from_file(model_path)
        .map_err(|e| model_error(format!("model load: {}", model_path.display()), e))?;
    Ok(session)
}

fn model_error(operation: impl Into<String>, source: ort::Error) -> LeafSegError {
    LeafSegError::Model {
        operation: operation.into(),
        source: Box::new(source),
    }
}

pub(crate) fn input_shape(session: &Session) -> Result<Vec<i64>> {
    session
        .inputs
        .first()
        .and_then(|input| input.input_type.tensor_shape())
        .map(|shape| shape.to_vec())
        .ok_or_else(|| LeafSegError::model("input shape lookup", "model has no tensor input"))
}

pub(crate) fn io_names(session: &Session) -> Result<(String, String)> {
    let input = session.inputs.first().map(|i| i.name.clone());
    let output = session.outputs.first().map(|o| o.name.clone());
    input
        .zip(output)
        .ok_or_else(|| LeafSegError::model("io lookup", "model needs an input and an output"))
}

/// UNet leaf segmenter running on ONNX Runtime.
pub struct UnetModel {
    pub image_size: u32,
    layout: TensorLayout,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl UnetModel {
    pub fn new(model_path: &Path, device_id: i32, num_threads: usize) -> Result<Self> {
        let session = build_session(model_path, device_id, num_threads)?;
        let shape = input_shape(&session)?;
        let (layout, image_size) = TensorLayout::detect(&shape, 3)?;
        let (input_name, output_name) = io_names(&session)?;

        info!(
            path = %model_path.display(),
            ?shape,
            ?layout,
            image_size,
            input = %input_name,
            output = %output_name,
            "UNet model loaded"
        );

        let model = Self {
            image_size,
            layout,
            input_name,
            output_name,
            session: Mutex::new(session),
        };

        // warm-up run
        let blank = RgbImage::new(image_size, image_size);
        model.predict(model.to_tensor(&blank).view())?;

        Ok(model)
    }

    fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.image_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);
        to_tensor(&resized, self.layout)
    }

    /// Raw model output for one batch.
    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let prediction = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .to_owned();
        Ok(prediction)
    }
}

impl SegmentationModel for UnetModel {
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        let tensor = self.to_tensor(image);
        let output = self.predict(tensor.view())?;
        debug!(shape = ?output.shape(), "UNet output");

        let prediction = first_channel_last(output.view(), self.layout)?;
        let mask = decode_prediction(prediction.view())?;
        Ok(imageops::resize(&mask, width, height, FilterType::Nearest))
    }

    fn input_size(&self) -> u32 {
        self.image_size
    }
}

/// Scale an already resized RGB image to `[0, 1]` and lay it out as a batch of one.
pub fn to_tensor(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let chw = image.as_ndarray3().mapv(|v| v as f32 / 255.0);
    let tensor = match layout {
        TensorLayout::Nchw => chw,
        TensorLayout::Nhwc => chw.permuted_axes([1, 2, 0]),
    };
    tensor.insert_axis(Axis(0)).as_standard_layout().into_owned()
}

/// Drop the batch axis and move channels last so the output can be decoded
/// independently of the layout the model was exported with.
pub fn first_channel_last(output: ArrayViewD<f32>, layout: TensorLayout) -> Result<ArrayD<f32>> {
    if !(3..=4).contains(&output.ndim()) || output.shape()[0] == 0 {
        return Err(LeafSegError::model(
            "output decoding",
            format!("unexpected output shape {:?}", output.shape()),
        ));
    }

    let single = output.index_axis_move(Axis(0), 0);
    let single = if layout == TensorLayout::Nchw && single.ndim() == 3 {
        single.permuted_axes(IxDyn(&[1, 2, 0]))
    } else {
        single
    };
    Ok(single.as_standard_layout().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn detects_keras_and_torch_layouts() {
        assert_eq!(
            TensorLayout::detect(&[1, 256, 256, 3], 3).unwrap(),
            (TensorLayout::Nhwc, 256)
        );
        assert_eq!(
            TensorLayout::detect(&[-1, 3, 224, 224], 3).unwrap(),
            (TensorLayout::Nchw, 224)
        );
        assert_eq!(
            TensorLayout::detect(&[-1, -1, -1, 3], 3).unwrap(),
            (TensorLayout::Nhwc, DEFAULT_INPUT_SIZE)
        );
        assert!(TensorLayout::detect(&[1, 5, 5, 5], 3).is_err());
        assert!(TensorLayout::detect(&[1, 3, 224], 3).is_err());
    }

    #[test]
    fn tensor_layouts_hold_the_same_values() {
        let image = RgbImage::from_fn(2, 2, |x, y| Rgb([(x * 255) as u8, (y * 255) as u8, 51]));

        let nhwc = to_tensor(&image, TensorLayout::Nhwc);
        let nchw = to_tensor(&image, TensorLayout::Nchw);
        assert_eq!(nhwc.shape(), &[1, 2, 2, 3]);
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);

        assert_eq!(nhwc[[0, 0, 1, 0]], 1.0);
        assert_eq!(nchw[[0, 0, 0, 1]], 1.0);
        assert_eq!(nhwc[[0, 1, 0, 1]], 1.0);
        assert_eq!(nchw[[0, 1, 1, 0]], 1.0);
        assert!((nhwc[[0, 0, 0, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn channel_first_output_is_moved_last() {
        let mut output = Array4::<f32>::zeros((1, 3, 2, 5));
        output[[0, 2, 1, 4]] = 1.0;
        let single = first_channel_last(output.view().into_dyn(), TensorLayout::Nchw).unwrap();
        assert_eq!(single.shape(), &[2, 5, 3]);
        assert_eq!(single[[1, 4, 2]], 1.0);
    }

    #[test]
    fn batched_single_channel_output_drops_batch_axis() {
        let output = Array3::<f32>::zeros((1, 8, 8));
        let single = first_channel_last(output.view().into_dyn(), TensorLayout::Nhwc).unwrap();
        assert_eq!(single.shape(), &[8, 8]);
    }

    #[test]
    fn unbatched_outputs_are_rejected() {
        let output = Array2::<f32>::zeros((8, 8));
        assert!(first_channel_last(output.view().into_dyn(), TensorLayout::Nhwc).is_err());
    }
}
