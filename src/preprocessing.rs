use std::time::Instant;

use image::RgbImage;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::errors::Result;
use crate::imageops_ai::{self, NlMeansParams};

/// Leaf-green bounds in OpenCV 8-bit HSV.
const GREEN_LOWER: [u8; 3] = [25, 30, 30];
const GREEN_UPPER: [u8; 3] = [90, 255, 255];

/// Leaf photo enhancement applied before segmentation: white balance, CLAHE
/// on luminance, colour non-local means denoising, unsharp masking.
pub fn preprocess_leaf(image: &RgbImage, config: &PreprocessConfig) -> Result<RgbImage> {
    let (width, height) = image.dimensions();

    let start = Instant::now();
    let balanced = imageops_ai::gray_world(image);
    debug!(elapsed = ?start.elapsed(), "white balance");

    let start = Instant::now();
    let equalized = apply_clahe(
        &balanced,
        config.clahe_clip_limit,
        (config.clahe_tile_grid, config.clahe_tile_grid),
    )?;
    debug!(elapsed = ?start.elapsed(), "clahe");

    let start = Instant::now();
    let denoised = denoise_colored(&equalized, &config.nl_means_params())?;
    debug!(elapsed = ?start.elapsed(), width, height, "non-local means");

    let start = Instant::now();
    let sharpened =
        imageops_ai::unsharp_mask(&denoised, config.sharpen_sigma, config.sharpen_amount);
    debug!(elapsed = ?start.elapsed(), "unsharp mask");

    Ok(sharpened)
}

/// CLAHE on the L channel of Lab; chrominance is left untouched.
pub fn apply_clahe(image: &RgbImage, clip_limit: f32, grid: (u32, u32)) -> Result<RgbImage> {
    #[cfg(feature = "opencv")]
    {
        imageops_ai::opencv::clahe_lab(image, clip_limit, grid)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Ok(imageops_ai::clahe_lab(image, clip_limit, grid))
    }
}

fn denoise_colored(image: &RgbImage, params: &NlMeansParams) -> Result<RgbImage> {
    #[cfg(feature = "opencv")]
    {
        imageops_ai::opencv::denoise_colored(image, params)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Ok(imageops_ai::denoise_colored(image, params))
    }
}

/// Percentage of pixels whose HSV value falls in the leaf-green range.
pub fn green_ratio(image: &RgbImage) -> Result<f64> {
    let total = image.width() as u64 * image.height() as u64;
    if total == 0 {
        return Ok(0.0);
    }

    let green = count_green(image)?;
    Ok(green as f64 / total as f64 * 100.0)
}

#[cfg(feature = "opencv")]
fn count_green(image: &RgbImage) -> Result<u64> {
    imageops_ai::opencv::count_hsv_in_range(image, GREEN_LOWER, GREEN_UPPER)
}

#[cfg(not(feature = "opencv"))]
fn count_green(image: &RgbImage) -> Result<u64> {
    use image::Rgb;
    use rayon::prelude::*;

    use crate::imageops_ai::convert_color::rgb_to_hsv;

    let green = image
        .as_raw()
        .par_chunks_exact(3)
        .filter(|px| {
            let hsv = rgb_to_hsv(Rgb([px[0], px[1], px[2]]));
            (0..3).all(|c| (GREEN_LOWER[c]..=GREEN_UPPER[c]).contains(&hsv[c]))
        })
        .count();
    Ok(green as u64)
}

/// Cheap plausibility check run before the models: a leaf photo has to be
/// noticeably green.
pub fn is_valid_leaf(image: &RgbImage, min_green_percent: f64) -> Result<bool> {
    Ok(green_ratio(image)? > min_green_percent)
}

impl PreprocessConfig {
    pub fn nl_means_params(&self) -> NlMeansParams {
        NlMeansParams {
            h: self.denoise_h,
            h_color: self.denoise_h_color,
            template_window: self.denoise_template_window,
            search_window: self.denoise_search_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn fast_config() -> PreprocessConfig {
        PreprocessConfig {
            denoise_template_window: 3,
            denoise_search_window: 5,
            ..PreprocessConfig::default()
        }
    }

    #[test]
    fn green_image_is_a_leaf() {
        let image = RgbImage::from_pixel(10, 10, Rgb([40, 160, 50]));
        assert!((green_ratio(&image).unwrap() - 100.0).abs() < 1e-9);
        assert!(is_valid_leaf(&image, 5.0).unwrap());
    }

    #[test]
    fn grey_and_red_images_are_not_leaves() {
        let grey = RgbImage::from_pixel(10, 10, Rgb([120, 120, 120]));
        let red = RgbImage::from_pixel(10, 10, Rgb([200, 20, 20]));
        assert!(!is_valid_leaf(&grey, 5.0).unwrap());
        assert!(!is_valid_leaf(&red, 5.0).unwrap());
    }

    #[test]
    fn dark_green_is_rejected_by_value_floor() {
        let image = RgbImage::from_pixel(4, 4, Rgb([5, 20, 5]));
        assert_eq!(green_ratio(&image).unwrap(), 0.0);
    }

    #[test]
    fn threshold_is_strict() {
        // 5 of 100 pixels green: exactly 5%, not above it
        let image = RgbImage::from_fn(10, 10, |x, y| {
            if y == 0 && x < 5 {
                Rgb([40, 160, 50])
            } else {
                Rgb([120, 120, 120])
            }
        });
        assert!((green_ratio(&image).unwrap() - 5.0).abs() < 1e-9);
        assert!(!is_valid_leaf(&image, 5.0).unwrap());
    }

    #[test]
    fn empty_image_is_not_a_leaf() {
        assert!(!is_valid_leaf(&RgbImage::new(0, 0), 5.0).unwrap());
    }

    #[test]
    fn preprocessing_keeps_dimensions() {
        let image = RgbImage::from_fn(24, 16, |x, y| Rgb([(x * 8) as u8, 140, (y * 12) as u8]));
        let out = preprocess_leaf(&image, &fast_config()).unwrap();
        assert_eq!(out.dimensions(), (24, 16));
    }

    #[test]
    fn clahe_keeps_chrominance_of_flat_image() {
        let image = RgbImage::from_pixel(16, 16, Rgb([60, 130, 60]));
        let out = apply_clahe(&image, 2.0, (4, 4)).unwrap();
        let Rgb([r, g, b]) = *out.get_pixel(8, 8);
        // hue stays green even though lightness is remapped
        assert!(g > r && g > b);
    }
}
