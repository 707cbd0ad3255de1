use image::{GrayImage, Luma, RgbImage};

use super::convert_color::LabPlanes;

const BINS: usize = 256;

/// CLAHE on the L channel of Lab; chrominance is left untouched.
pub fn clahe_lab(image: &RgbImage, clip_limit: f32, grid: (u32, u32)) -> RgbImage {
    let mut lab = LabPlanes::from_rgb(image);
    let luminance = GrayImage::from_raw(
        lab.width,
        lab.height,
        lab.l
            .iter()
            .map(|&l| l.round().clamp(0.0, 255.0) as u8)
            .collect(),
    )
    .unwrap_or_else(|| GrayImage::new(lab.width, lab.height));

    let equalized = clahe(&luminance, clip_limit, grid);
    lab.l = equalized.pixels().map(|Luma([l])| *l as f32).collect();
    lab.to_rgb()
}

/// Contrast Limited Adaptive Histogram Equalization on a single 8-bit channel.
///
/// Follows OpenCV's formulation: the image is reflect-padded up to a multiple of
/// the tile grid, each tile gets a clipped-histogram LUT, and output pixels are
/// bilinearly interpolated between the four nearest tile LUTs.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let grid_x = grid.0.max(1) as usize;
    let grid_y = grid.1.max(1) as usize;
    let (w, h) = (width as usize, height as usize);

    let tile_w = w.div_ceil(grid_x);
    let tile_h = h.div_ceil(grid_y);
    let tile_area = tile_w * tile_h;

    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / BINS as f32) as usize).max(1)
    } else {
        usize::MAX
    };
    let lut_scale = 255.0 / tile_area as f32;

    let raw = image.as_raw();
    let mut luts = vec![[0u8; BINS]; grid_x * grid_y];

    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let mut hist = [0usize; BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let row = reflect101(y as isize, h) * w;
                for x in tx * tile_w..(tx + 1) * tile_w {
                    hist[raw[row + reflect101(x as isize, w)] as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);

            let lut = &mut luts[ty * grid_x + tx];
            let mut sum = 0usize;
            for (bin, count) in hist.iter().enumerate() {
                sum += count;
                lut[bin] = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = raw[y as usize * w + x as usize] as usize;

        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor() as isize;
        let ya = tyf - ty1 as f32;
        let ty2 = ((ty1 + 1) as usize).min(grid_y - 1);
        let ty1 = ty1.max(0) as usize;

        let txf = x as f32 * inv_tw - 0.5;
        let tx1 = txf.floor() as isize;
        let xa = txf - tx1 as f32;
        let tx2 = ((tx1 + 1) as usize).min(grid_x - 1);
        let tx1 = tx1.max(0) as usize;

        let lut = |tx: usize, ty: usize| luts[ty * grid_x + tx][value] as f32;
        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        let res = top * (1.0 - ya) + bottom * ya;

        pixel.0[0] = res.round().clamp(0.0, 255.0) as u8;
    }

    out
}

fn clip_histogram(hist: &mut [usize; BINS], clip: usize) {
    if clip == usize::MAX {
        return;
    }

    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let batch = excess / BINS;
    let mut residual = excess - batch * BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}

/// Mirror an index into `[0, n)` without repeating the edge sample.
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    if i >= n as isize {
        (period - i) as usize
    } else {
        i as usize
    }
}
