use image::{imageops, imageops::FilterType, GrayImage, Rgb, RgbImage};

use crate::segmentation::MaskClass;

const BACKGROUND_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const HEALTHY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const DISEASED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Paint a class mask: background black, healthy tissue green, disease red.
/// Values outside the three classes stay black.
pub fn colorize(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        match MaskClass::from_value(mask.get_pixel(x, y).0[0]) {
            Some(MaskClass::Healthy) => HEALTHY_COLOR,
            Some(MaskClass::Diseased) => DISEASED_COLOR,
            Some(MaskClass::Background) | None => BACKGROUND_COLOR,
        }
    })
}

/// Blend the colorized mask over `image` with the given mask opacity.
pub fn overlay(image: &RgbImage, mask: &GrayImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mask = fit_mask(mask, image.width(), image.height());
    let colored = colorize(&mask);

    let mut out = image.clone();
    for (pixel, color) in out.pixels_mut().zip(colored.pixels()) {
        for (value, &tint) in pixel.0.iter_mut().zip(color.0.iter()) {
            let blended = *value as f32 * (1.0 - alpha) + tint as f32 * alpha;
            *value = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Keep only the pixels classified as diseased; everything else goes black.
pub fn extract_diseased(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mask = fit_mask(mask, image.width(), image.height());
    let mut out = image.clone();
    for (pixel, class) in out.pixels_mut().zip(mask.pixels()) {
        if class.0[0] != MaskClass::Diseased.value() {
            *pixel = BACKGROUND_COLOR;
        }
    }
    out
}

fn fit_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}
