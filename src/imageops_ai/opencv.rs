//! OpenCV implementations of the colour filters, built with the `opencv`
//! feature. Requires a system OpenCV with the `imgproc` and `photo` modules.

use image::RgbImage;
use opencv::{
    core::{self, AlgorithmHint, Mat, Scalar, Size, Vector, CV_8UC3},
    imgproc, photo,
    prelude::*,
};

use super::NlMeansParams;
use crate::errors::{LeafSegError, Result};

/// Run `f` on a `CV_8UC3` header over the image buffer.
fn with_mat<T>(image: &RgbImage, f: impl FnOnce(&Mat) -> opencv::Result<T>) -> Result<T> {
    let (width, height) = image.dimensions();
    let data = image.as_raw();
    // SAFETY: the header borrows `data`, which outlives it; OpenCV only reads
    // from `src` in every call below.
    let mat = unsafe {
        Mat::new_rows_cols_with_data_unsafe(
            height as i32,
            width as i32,
            CV_8UC3,
            data.as_ptr() as *mut _,
            core::Mat_AUTO_STEP,
        )?
    };
    Ok(f(&mat)?)
}

fn to_image(mat: &Mat, width: u32, height: u32, operation: &str) -> Result<RgbImage> {
    let bytes = mat.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes).ok_or_else(|| LeafSegError::ImageProcessing {
        path: "<memory>".to_string(),
        operation: operation.to_string(),
        source: "OpenCV returned a buffer of unexpected size".into(),
    })
}

/// CLAHE on the L channel of Lab.
pub fn clahe_lab(image: &RgbImage, clip_limit: f32, (gx, gy): (u32, u32)) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(image.clone());
    }

    let rgb = with_mat(image, |src| {
        let mut lab = Mat::default();
        imgproc::cvt_color(
            src,
            &mut lab,
            imgproc::COLOR_RGB2Lab,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut channels = Vector::<Mat>::new();
        core::split(&lab, &mut channels)?;

        let tiles = Size::new(gx as i32, gy as i32);
        let mut clahe = imgproc::create_clahe(clip_limit as f64, tiles)?;
        let mut l_equalized = Mat::default();
        clahe.apply(&channels.get(0)?, &mut l_equalized)?;
        channels.set(0, l_equalized)?;

        let mut merged = Mat::default();
        core::merge(&channels, &mut merged)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(
            &merged,
            &mut rgb,
            imgproc::COLOR_Lab2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        Ok(rgb)
    })?;

    to_image(&rgb, width, height, "clahe")
}

/// `cv::fastNlMeansDenoisingColored`. OpenCV reads the buffer as BGR, so the
/// Lab split it does internally sees red and blue swapped.
pub fn denoise_colored(image: &RgbImage, params: &NlMeansParams) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(image.clone());
    }

    let denoised = with_mat(image, |src| {
        let mut dst = Mat::default();
        photo::fast_nl_means_denoising_colored(
            src,
            &mut dst,
            params.h,
            params.h_color,
            params.template_window as i32,
            params.search_window as i32,
        )?;
        Ok(dst)
    })?;

    to_image(&denoised, width, height, "non-local means")
}

/// Number of pixels whose 8-bit HSV value lies inside `[lower, upper]`.
pub fn count_hsv_in_range(image: &RgbImage, lower: [u8; 3], upper: [u8; 3]) -> Result<u64> {
    if image.width() == 0 || image.height() == 0 {
        return Ok(0);
    }

    let bound = |[h, s, v]: [u8; 3]| Scalar::new(h as f64, s as f64, v as f64, 0.0);
    with_mat(image, |src| {
        let mut hsv = Mat::default();
        imgproc::cvt_color(
            src,
            &mut hsv,
            imgproc::COLOR_RGB2HSV,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut in_range = Mat::default();
        core::in_range(&hsv, &bound(lower), &bound(upper), &mut in_range)?;
        Ok(core::count_non_zero(&in_range)? as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageops_ai::convert_color::{rgb_to_hsv, rgb_to_lab};
    use crate::imageops_ai as fallback;
    use image::Rgb;

    // single-pixel conversion through OpenCV
    fn convert_pixel(rgb: [u8; 3], code: i32) -> [u8; 3] {
        let image = RgbImage::from_raw(1, 1, rgb.to_vec()).unwrap();
        let converted = with_mat(&image, |src| {
            let mut dst = Mat::default();
            imgproc::cvt_color(src, &mut dst, code, 0, AlgorithmHint::ALGO_HINT_DEFAULT)?;
            Ok(dst)
        })
        .unwrap();
        let bytes = converted.data_bytes().unwrap();
        [bytes[0], bytes[1], bytes[2]]
    }

    fn mean_abs_diff(a: &RgbImage, b: &RgbImage) -> f64 {
        let total: u64 = a
            .as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
            .sum();
        total as f64 / a.as_raw().len() as f64
    }

    fn leaf_texture() -> RgbImage {
        RgbImage::from_fn(96, 64, |x, y| {
            let n = ((x * 37 + y * 91) % 23) as u8;
            if (x / 8 + y / 8) % 3 == 0 {
                Rgb([140 + n, 110 + n, 40])
            } else {
                Rgb([50 + n, 150 + n / 2, 45 + n])
            }
        })
    }

    #[test]
    fn fallback_lab_matches_opencv() {
        for rgb in [[34, 139, 34], [200, 180, 40], [90, 60, 30], [255, 0, 0], [12, 12, 240]] {
            let expected = convert_pixel(rgb, imgproc::COLOR_RGB2Lab);
            let actual = rgb_to_lab(rgb);
            for c in 0..3 {
                assert!(
                    (actual[c].round() - expected[c] as f32).abs() <= 1.0,
                    "{rgb:?}: {actual:?} vs {expected:?}"
                );
            }
        }
    }

    #[test]
    fn fallback_hsv_matches_opencv() {
        for rgb in [[34, 139, 34], [200, 180, 40], [90, 60, 30], [120, 120, 120], [5, 20, 5]] {
            let expected = convert_pixel(rgb, imgproc::COLOR_RGB2HSV);
            let actual = rgb_to_hsv(Rgb(rgb));
            assert!((actual[0] as i32 - expected[0] as i32).abs() <= 1, "{rgb:?}");
            assert!((actual[1] as i32 - expected[1] as i32).abs() <= 1, "{rgb:?}");
            assert_eq!(actual[2], expected[2], "{rgb:?}");
        }
    }

    #[test]
    fn fallback_clahe_is_close_to_opencv() {
        let image = leaf_texture();
        let reference = clahe_lab(&image, 2.0, (8, 8)).unwrap();
        let approx = fallback::clahe_lab(&image, 2.0, (8, 8));
        let diff = mean_abs_diff(&reference, &approx);
        assert!(diff < 2.0, "mean abs diff {diff}");
    }

    #[test]
    fn fallback_denoise_is_close_to_opencv() {
        let image = leaf_texture();
        let params = NlMeansParams::default();
        let reference = denoise_colored(&image, &params).unwrap();
        let approx = fallback::denoise_colored(&image, &params);
        let diff = mean_abs_diff(&reference, &approx);
        assert!(diff < 3.0, "mean abs diff {diff}");
    }

    #[test]
    fn green_count_matches_fallback() {
        let image = leaf_texture();
        let expected = image
            .pixels()
            .filter(|&&px| {
                let [h, s, v] = rgb_to_hsv(px);
                (25..=90).contains(&h) && s >= 30 && v >= 30
            })
            .count() as u64;
        let counted = count_hsv_in_range(&image, [25, 30, 30], [90, 255, 255]).unwrap();
        // hue rounding may differ on boundary pixels
        let tolerance = (image.width() * image.height()) as u64 / 100;
        assert!(counted.abs_diff(expected) <= tolerance, "{counted} vs {expected}");
    }

    #[test]
    fn empty_images_pass_through() {
        let empty = RgbImage::new(0, 0);
        assert_eq!(count_hsv_in_range(&empty, [0, 0, 0], [255, 255, 255]).unwrap(), 0);
        assert_eq!(clahe_lab(&empty, 2.0, (8, 8)).unwrap().dimensions(), (0, 0));
    }
}
