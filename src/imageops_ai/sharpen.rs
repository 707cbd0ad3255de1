use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;

/// Unsharp masking: `image * (1 + amount) - blur(image) * amount`.
pub fn unsharp_mask(image: &RgbImage, sigma: f32, amount: f32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 || sigma <= 0.0 {
        return image.clone();
    }

    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = image.clone();
    for (pixel, blur) in out.pixels_mut().zip(blurred.pixels()) {
        for (value, &soft) in pixel.0.iter_mut().zip(blur.0.iter()) {
            let sharp = *value as f32 * (1.0 + amount) - soft as f32 * amount;
            *value = sharp.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
