//! Skew estimation and correction for scanned pages.
//!
//! The skew angle is found with a Hough transform over the lower edges of
//! dark runs: every pixel that is dark with a light pixel below it votes for
//! each candidate line through it. Text baselines produce the strongest
//! lines, and the angle is the mean over the best-supported ones.

use image::{GrayImage, Luma};

/// Pixels darker than this count as ink.
const INK_THRESHOLD: u8 = 140;
/// Candidate angles, in degrees: `ALPHA_START + i * ALPHA_STEP`.
const ALPHA_START: f64 = -20.0;
const ALPHA_STEP: f64 = 0.2;
const ALPHA_STEPS: usize = 200;
/// Number of strongest lines averaged into the result.
const TOP_LINES: usize = 20;

/// Estimated skew of `image` in degrees. Positive means lines descend to the
/// right. Blank or tiny images report 0.
pub fn skew_angle(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let (sin, cos): (Vec<f64>, Vec<f64>) = (0..ALPHA_STEPS)
        .map(|i| (ALPHA_START + i as f64 * ALPHA_STEP).to_radians().sin_cos())
        .unzip();

    // d = y*cos(a) - x*sin(a) stays within [-width, width + height).
    let d_min = -(width as f64);
    let d_count = 2 * (width + height) as usize;
    let mut votes = vec![0u32; d_count * ALPHA_STEPS];

    let is_ink = |x: u32, y: u32| image.get_pixel(x, y).0[0] < INK_THRESHOLD;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            if !is_ink(x, y) || is_ink(x, y + 1) {
                continue;
            }
            for alpha in 0..ALPHA_STEPS {
                let d = y as f64 * cos[alpha] - x as f64 * sin[alpha];
                let d_index = (d - d_min) as usize;
                if d_index < d_count {
                    votes[d_index * ALPHA_STEPS + alpha] += 1;
                }
            }
        }
    }

    let mut best: Vec<(u32, usize)> = votes
        .iter()
        .enumerate()
        .filter_map(|(index, &count)| (count > 0).then_some((count, index % ALPHA_STEPS)))
        .collect();
    if best.is_empty() {
        return 0.0;
    }
    let top = TOP_LINES.min(best.len());
    best.select_nth_unstable_by(top - 1, |a, b| b.0.cmp(&a.0));

    let sum: f64 = best[..top]
        .iter()
        .map(|&(_, alpha)| ALPHA_START + alpha as f64 * ALPHA_STEP)
        .sum();
    sum / top as f64
}

/// Rotate `image` clockwise by `degrees` about its centre, keeping its size.
/// Uncovered areas are filled white; sampling is bilinear.
pub fn rotate(image: &GrayImage, degrees: f64) -> GrayImage {
    let (width, height) = image.dimensions();
    if degrees == 0.0 || width == 0 || height == 0 {
        return image.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;

    GrayImage::from_fn(width, height, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        Luma([sample_bilinear(image, sx, sy)])
    })
}

/// Straighten a page by rotating it against its measured skew.
pub fn deskew(image: &GrayImage) -> GrayImage {
    let angle = skew_angle(image);
    if angle.abs() < ALPHA_STEP / 2.0 {
        return image.clone();
    }
    tracing::debug!("Correcting skew of {:.2} degrees", angle);
    rotate(image, -angle)
}

fn sample_bilinear(image: &GrayImage, x: f64, y: f64) -> u8 {
    let (width, height) = image.dimensions();
    let pixel = |px: i64, py: i64| -> f64 {
        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
            255.0
        } else {
            image.get_pixel(px as u32, py as u32).0[0] as f64
        }
    };

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let top = pixel(x0, y0) * (1.0 - fx) + pixel(x0 + 1, y0) * fx;
    let bottom = pixel(x0, y0 + 1) * (1.0 - fx) + pixel(x0 + 1, y0 + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}
