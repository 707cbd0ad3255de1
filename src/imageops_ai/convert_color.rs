//! 8-bit colour-space conversions using OpenCV's encodings, so thresholds
//! tuned against OpenCV (HSV green range, Lab CLAHE) carry over unchanged.

use image::{Rgb, RgbImage};
use rayon::prelude::*;

const XN: f32 = 0.950_456;
const ZN: f32 = 1.088_754;
const LAB_EPSILON: f32 = 0.008_856;
const LAB_KAPPA: f32 = 903.3;

/// Planar CIE L*a*b* image in OpenCV's 8-bit scaling: L in `[0, 255]`,
/// a and b offset by 128.
#[derive(Debug, Clone, PartialEq)]
pub struct LabPlanes {
    pub width: u32,
    pub height: u32,
    pub l: Vec<f32>,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl LabPlanes {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let lab: Vec<[f32; 3]> = image
            .as_raw()
            .par_chunks_exact(3)
            .map(|px| rgb_to_lab([px[0], px[1], px[2]]))
            .collect();

        let mut l = Vec::with_capacity(lab.len());
        let mut a = Vec::with_capacity(lab.len());
        let mut b = Vec::with_capacity(lab.len());
        for [pl, pa, pb] in lab {
            l.push(pl);
            a.push(pa);
            b.push(pb);
        }

        Self {
            width: image.width(),
            height: image.height(),
            l,
            a,
            b,
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        let raw: Vec<u8> = self
            .l
            .par_iter()
            .zip(self.a.par_iter())
            .zip(self.b.par_iter())
            .flat_map_iter(|((&l, &a), &b)| lab_to_rgb([l, a, b]))
            .collect();
        RgbImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

fn srgb_to_linear(v: u8) -> f32 {
    let v = v as f32 / 255.0;
    if v > 0.040_45 {
        ((v + 0.055) / 1.055).powf(2.4)
    } else {
        v / 12.92
    }
}

fn linear_to_srgb(v: f32) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let v = if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

pub fn rgb_to_lab([r, g, b]: [u8; 3]) -> [f32; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / XN;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / ZN;

    let l = if y > LAB_EPSILON {
        116.0 * y.cbrt() - 16.0
    } else {
        LAB_KAPPA * y
    };
    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));

    [
        l * 255.0 / 100.0,
        500.0 * (fx - fy) + 128.0,
        200.0 * (fy - fz) + 128.0,
    ]
}

pub fn lab_to_rgb([l, a, b]: [f32; 3]) -> [u8; 3] {
    let l = l * 100.0 / 255.0;
    let (a, b) = (a - 128.0, b - 128.0);

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > LAB_KAPPA * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    };
    let x = lab_f_inv(fx) * XN;
    let z = lab_f_inv(fz) * ZN;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_991 * y + 0.041_556 * z;
    let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}

/// OpenCV 8-bit HSV: hue in `[0, 180)`, saturation and value in `[0, 255]`.
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = ((h / 2.0).round() as u32 % 180) as u8;
    [h, s.round() as u8, v as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_of_white_and_black() {
        let [l, a, b] = rgb_to_lab([255, 255, 255]);
        assert!((l - 255.0).abs() < 0.5);
        assert!((a - 128.0).abs() < 0.5);
        assert!((b - 128.0).abs() < 0.5);

        let [l, _, _] = rgb_to_lab([0, 0, 0]);
        assert!(l.abs() < 0.5);
    }

    #[test]
    fn lab_matches_opencv_for_primaries() {
        // cv::cvtColor(COLOR_RGB2Lab) on CV_8UC3
        let cases = [
            ([255, 0, 0], [136, 208, 195]),
            ([0, 255, 0], [224, 42, 211]),
            ([0, 0, 255], [82, 207, 20]),
        ];
        for (rgb, expected) in cases {
            let lab = rgb_to_lab(rgb);
            for c in 0..3 {
                assert!(
                    (lab[c].round() - expected[c] as f32).abs() <= 1.0,
                    "{rgb:?}: {lab:?} vs {expected:?}"
                );
            }
        }
    }

    #[test]
    fn lab_conversion_is_stable_for_leaf_colours() {
        for rgb in [[34, 139, 34], [120, 200, 80], [200, 180, 40], [90, 60, 30]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for channel in 0..3 {
                assert!(
                    (back[channel] as i32 - rgb[channel] as i32).abs() <= 1,
                    "{rgb:?} came back as {back:?}"
                );
            }
        }
    }

    #[test]
    fn hsv_matches_opencv_for_primaries() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn planes_preserve_dimensions() {
        let image = RgbImage::from_pixel(5, 3, Rgb([10, 200, 30]));
        let lab = LabPlanes::from_rgb(&image);
        assert_eq!(lab.l.len(), 15);
        let back = lab.to_rgb();
        assert_eq!(back.dimensions(), (5, 3));
    }
}
