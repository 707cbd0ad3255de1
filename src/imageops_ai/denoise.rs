use image::RgbImage;
use rayon::prelude::*;

use super::clahe::reflect101;
use super::convert_color::LabPlanes;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlMeansParams {
    /// Filter strength for luminance.
    pub h: f32,
    /// Filter strength for the colour components.
    pub h_color: f32,
    pub template_window: usize,
    pub search_window: usize,
}

impl Default for NlMeansParams {
    fn default() -> Self {
        Self {
            h: 10.0,
            h_color: 10.0,
            template_window: 7,
            search_window: 21,
        }
    }
}

/// Colour non-local means: luminance and chrominance are filtered separately in
/// Lab space with their own strengths.
///
/// The buffer is read as BGR, the way `cv::fastNlMeansDenoisingColored` reads
/// an RGB buffer, so both backends produce the same image.
pub fn denoise_colored(image: &RgbImage, params: &NlMeansParams) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut lab = LabPlanes::from_rgb(&swap_red_blue(image));
    let (w, h) = (width as usize, height as usize);
    let template = params.template_window;
    let search = params.search_window;

    if params.h > 0.0 {
        let [l] = non_local_means([lab.l.as_slice()], w, h, params.h, template, search);
        lab.l = l;
    }
    if params.h_color > 0.0 {
        let [a, b] = non_local_means(
            [lab.a.as_slice(), lab.b.as_slice()],
            w,
            h,
            params.h_color,
            template,
            search,
        );
        lab.a = a;
        lab.b = b;
    }

    swap_red_blue(&lab.to_rgb())
}

fn swap_red_blue(image: &RgbImage) -> RgbImage {
    let mut swapped = image.clone();
    swapped
        .par_chunks_exact_mut(3)
        .for_each(|px| px.swap(0, 2));
    swapped
}

/// Non-local means over `C` planes that share patch weights.
///
/// For every offset in the search window the per-pixel squared difference is
/// box-summed over the template window through an integral image, so the cost
/// is independent of the template size.
pub fn non_local_means<const C: usize>(
    planes: [&[f32]; C],
    width: usize,
    height: usize,
    strength: f32,
    template_window: usize,
    search_window: usize,
) -> [Vec<f32>; C] {
    let n = width * height;
    let tr = (template_window / 2) as isize;
    let sr = (search_window / 2) as isize;
    let inv_h2 = 1.0 / (strength * strength).max(f32::EPSILON);
    let stride = C + 1;

    // Per pixel: accumulated weight followed by C weighted sums.
    let mut acc = vec![0f32; n * stride];
    let mut diff = vec![0f32; n];
    let mut integral = vec![0f64; (width + 1) * (height + 1)];

    let shifted = |x: usize, y: usize, dx: isize, dy: isize| -> usize {
        let sx = reflect101(x as isize + dx, width);
        let sy = reflect101(y as isize + dy, height);
        sy * width + sx
    };

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            diff.par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, d) in row.iter_mut().enumerate() {
                        let p = y * width + x;
                        let q = shifted(x, y, dx, dy);
                        *d = planes
                            .iter()
                            .map(|plane| {
                                let delta = plane[p] - plane[q];
                                delta * delta
                            })
                            .sum();
                    }
                });

            build_integral(&diff, width, height, &mut integral);

            acc.par_chunks_mut(width * stride)
                .enumerate()
                .for_each(|(y, row)| {
                    let y0 = (y as isize - tr).max(0) as usize;
                    let y1 = ((y as isize + tr) as usize).min(height - 1);
                    for x in 0..width {
                        let x0 = (x as isize - tr).max(0) as usize;
                        let x1 = ((x as isize + tr) as usize).min(width - 1);
                        let count = ((x1 - x0 + 1) * (y1 - y0 + 1) * C) as f64;
                        let sum = box_sum(&integral, width, x0, y0, x1, y1);
                        let distance = (sum / count) as f32;
                        let weight = (-distance * inv_h2).exp();

                        let q = shifted(x, y, dx, dy);
                        let cell = &mut row[x * stride..(x + 1) * stride];
                        cell[0] += weight;
                        for (c, plane) in planes.iter().enumerate() {
                            cell[c + 1] += weight * plane[q];
                        }
                    }
                });
        }
    }

    std::array::from_fn(|c| {
        acc.par_chunks_exact(stride)
            .map(|cell| cell[c + 1] / cell[0])
            .collect()
    })
}

fn build_integral(values: &[f32], width: usize, height: usize, integral: &mut [f64]) {
    let iw = width + 1;
    for y in 0..height {
        let mut row_sum = 0f64;
        for x in 0..width {
            row_sum += values[y * width + x] as f64;
            integral[(y + 1) * iw + x + 1] = integral[y * iw + x + 1] + row_sum;
        }
    }
}

fn box_sum(integral: &[f64], width: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
    let iw = width + 1;
    integral[(y1 + 1) * iw + x1 + 1] - integral[y0 * iw + x1 + 1] - integral[(y1 + 1) * iw + x0]
        + integral[y0 * iw + x0]
}
