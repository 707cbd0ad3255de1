use image::RgbImage;

/// Gray-world white balance: scale each channel so its mean matches the mean
/// over all samples.
pub fn gray_world(image: &RgbImage) -> RgbImage {
    let pixel_count = image.width() as f64 * image.height() as f64;
    if pixel_count == 0.0 {
        return image.clone();
    }

    let mut sums = [0f64; 3];
    for pixel in image.pixels() {
        for (sum, &value) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += value as f64;
        }
    }

    let means = sums.map(|sum| sum / pixel_count);
    let global_mean = means.iter().sum::<f64>() / 3.0;
    let gains = means.map(|mean| {
        if mean > 0.0 {
            (global_mean / mean) as f32
        } else {
            1.0
        }
    });

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for (value, gain) in pixel.0.iter_mut().zip(gains) {
            *value = (*value as f32 * gain).clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn neutral_image_is_untouched() {
        let image = RgbImage::from_pixel(4, 4, Rgb([90, 90, 90]));
        assert_eq!(gray_world(&image), image);
    }

    #[test]
    fn colour_cast_is_removed() {
        let image = RgbImage::from_pixel(4, 4, Rgb([120, 60, 60]));
        let balanced = gray_world(&image);
        let Rgb([r, g, b]) = *balanced.get_pixel(0, 0);
        assert_eq!(r, 80);
        assert_eq!(g, 80);
        assert_eq!(b, 80);
    }

    #[test]
    fn empty_channel_keeps_unit_gain() {
        let image = RgbImage::from_pixel(2, 2, Rgb([0, 100, 200]));
        let balanced = gray_world(&image);
        assert_eq!(balanced.get_pixel(0, 0).0[0], 0);
    }
}
