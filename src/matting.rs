//! Mask refinement and cutout composition
//!
//! `alpha_matting_cutout` refines the soft edge between definite foreground
//! and definite background. The band in between is solved with a guided
//! filter driven by the image luminance, and foreground colours in the band
//! are recovered by removing the locally estimated background colour.

use crate::{
    config::MattingConfig,
    error::{BgRemovalError, Result},
    types::SegmentationMask,
};
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbImage, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;
use ndarray::Array2;

const TRIMAP_FOREGROUND: u8 = 255;
const TRIMAP_BACKGROUND: u8 = 0;
const TRIMAP_UNKNOWN: u8 = 128;

/// Guided filter regularization, in squared [0, 1] intensity units
const GUIDED_FILTER_EPS: f32 = 1e-4;

/// Alpha below which a pixel's colour is not recovered
const MIN_ALPHA_FOR_COLOR: f32 = 0.01;

/// Smooth a raw model mask: morphological opening, Gaussian blur (sigma 2),
/// then binarize at 127
///
/// # Errors
/// - Mask data is inconsistent with its dimensions
pub fn post_process_mask(mask: &SegmentationMask) -> Result<SegmentationMask> {
    let gray = mask.to_gray_image()?;
    let opened = open_with_cross(&gray);
    let blurred = gaussian_blur_f32(&opened, 2.0);
    let binary = GrayImage::from_fn(blurred.width(), blurred.height(), |x, y| {
        let Luma([value]) = *blurred.get_pixel(x, y);
        Luma([if value < 127 { 0 } else { 255 }])
    });
    Ok(SegmentationMask::from_gray(&binary))
}

/// Opening with the 3x3 cross structuring element
fn open_with_cross(gray: &GrayImage) -> GrayImage {
    morphology::open(gray, Norm::L1, 1)
}

/// Scale the source alpha by the mask, keeping the source colours
///
/// # Errors
/// - Mask dimensions differ from the image dimensions
pub fn naive_cutout(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let rgba = image.to_rgba8();
    check_dimensions(rgba.dimensions(), mask)?;

    let (width, height) = rgba.dimensions();
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let [r, g, b, source_alpha] = rgba.get_pixel(x, y).0;
        let alpha = (u16::from(source_alpha) * u16::from(mask_value(mask, x, y)) + 127) / 255;
        if alpha == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        Rgba([r, g, b, alpha as u8])
    }))
}

/// Build the trimap for `mask`: 255 foreground, 0 background, 128 unknown
///
/// Foreground pixels within the erosion distance of the image border are
/// demoted to unknown; the area outside the image counts as background.
///
/// # Errors
/// - Mask data is inconsistent with its dimensions
pub fn build_trimap(mask: &SegmentationMask, config: &MattingConfig) -> Result<GrayImage> {
    let gray = mask.to_gray_image()?;
    let (width, height) = gray.dimensions();

    let foreground = GrayImage::from_fn(width, height, |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] > config.foreground_threshold { 255 } else { 0 }])
    });
    let background = GrayImage::from_fn(width, height, |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] < config.background_threshold { 255 } else { 0 }])
    });

    let (norm, radius) = if config.erode_size == 0 {
        (Norm::L1, 1u8)
    } else {
        (Norm::LInf, u8::try_from(config.erode_size / 2).unwrap_or(u8::MAX))
    };

    let foreground = if radius > 0 {
        morphology::erode(&foreground, norm, radius)
    } else {
        foreground
    };
    let background = if radius > 0 {
        morphology::erode(&background, norm, radius)
    } else {
        background
    };
    let border = u32::from(radius);

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let near_border =
            x < border || y < border || x + border >= width || y + border >= height;
        if foreground.get_pixel(x, y).0[0] > 0 && !near_border {
            Luma([TRIMAP_FOREGROUND])
        } else if background.get_pixel(x, y).0[0] > 0 {
            Luma([TRIMAP_BACKGROUND])
        } else {
            Luma([TRIMAP_UNKNOWN])
        }
    }))
}

/// Cut out the foreground with refined alpha along the mask edge
///
/// # Errors
/// - Mask dimensions differ from the image dimensions
/// - Trimap has no definite foreground or no definite background
pub fn alpha_matting_cutout(
    image: &DynamicImage,
    mask: &SegmentationMask,
    config: &MattingConfig,
) -> Result<RgbaImage> {
    let rgb = image.to_rgb8();
    check_dimensions(rgb.dimensions(), mask)?;

    let trimap = build_trimap(mask, config)?;
    let has_foreground = trimap.pixels().any(|p| p.0[0] == TRIMAP_FOREGROUND);
    let has_background = trimap.pixels().any(|p| p.0[0] == TRIMAP_BACKGROUND);
    if !has_foreground || !has_background {
        return Err(BgRemovalError::processing_stage_error(
            "alpha matting",
            if has_foreground {
                "trimap has no definite background"
            } else {
                "trimap has no definite foreground"
            },
            Some(&format!("{}x{}", rgb.width(), rgb.height())),
        ));
    }

    let radius = (config.erode_size as usize).max(4);
    let alpha = estimate_alpha(&rgb, mask, &trimap, radius);
    Ok(compose_foreground(&rgb, &trimap, &alpha, radius * 3))
}

fn check_dimensions(image_dimensions: (u32, u32), mask: &SegmentationMask) -> Result<()> {
    if image_dimensions != mask.dimensions {
        return Err(BgRemovalError::processing(format!(
            "Mask is {}x{} but image is {}x{}",
            mask.dimensions.0, mask.dimensions.1, image_dimensions.0, image_dimensions.1
        )));
    }
    Ok(())
}

fn mask_value(mask: &SegmentationMask, x: u32, y: u32) -> u8 {
    let index = y as usize * mask.dimensions.0 as usize + x as usize;
    mask.data.get(index).copied().unwrap_or(0)
}

/// Guided filter over the trimap-constrained mask, pinned to the trimap's
/// definite regions
fn estimate_alpha(
    rgb: &RgbImage,
    mask: &SegmentationMask,
    trimap: &GrayImage,
    radius: usize,
) -> Array2<f32> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let guide = Array2::from_shape_fn((height, width), |(y, x)| {
        let [r, g, b] = rgb.get_pixel(x as u32, y as u32).0;
        (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)) / 255.0
    });
    let input = Array2::from_shape_fn((height, width), |(y, x)| {
        match trimap.get_pixel(x as u32, y as u32).0[0] {
            TRIMAP_FOREGROUND => 1.0,
            TRIMAP_BACKGROUND => 0.0,
            _ => f32::from(mask_value(mask, x as u32, y as u32)) / 255.0,
        }
    });

    let mean_i = box_mean(&guide, radius);
    let mean_p = box_mean(&input, radius);
    let corr_ip = box_mean(&(&guide * &input), radius);
    let corr_ii = box_mean(&(&guide * &guide), radius);

    let var_i = &corr_ii - &(&mean_i * &mean_i);
    let cov_ip = &corr_ip - &(&mean_i * &mean_p);
    let a = &cov_ip / &var_i.mapv(|v| v + GUIDED_FILTER_EPS);
    let b = &mean_p - &(&a * &mean_i);

    let mean_a = box_mean(&a, radius);
    let mean_b = box_mean(&b, radius);
    let refined = &(&mean_a * &guide) + &mean_b;

    Array2::from_shape_fn((height, width), |(y, x)| {
        match trimap.get_pixel(x as u32, y as u32).0[0] {
            TRIMAP_FOREGROUND => 1.0,
            TRIMAP_BACKGROUND => 0.0,
            _ => refined.get((y, x)).copied().unwrap_or(0.0).clamp(0.0, 1.0),
        }
    })
}

/// Compose RGBA output, recovering foreground colours in the unknown band as
/// `F = (I - (1 - alpha) * B) / alpha` with `B` the local background mean
fn compose_foreground(
    rgb: &RgbImage,
    trimap: &GrayImage,
    alpha: &Array2<f32>,
    background_radius: usize,
) -> RgbaImage {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let is_background = Array2::from_shape_fn((height, width), |(y, x)| {
        if trimap.get_pixel(x as u32, y as u32).0[0] == TRIMAP_BACKGROUND {
            1.0
        } else {
            0.0
        }
    });
    let background_weight = window_sum(&is_background, background_radius);
    let total_background = is_background.sum().max(1.0);

    let background_means: Vec<(Array2<f32>, f32)> = (0..3)
        .map(|channel| {
            let weighted = Array2::from_shape_fn((height, width), |(y, x)| {
                let value = f32::from(rgb.get_pixel(x as u32, y as u32).0[channel]) / 255.0;
                value * is_background.get((y, x)).copied().unwrap_or(0.0)
            });
            let global_mean = weighted.sum() / total_background;
            (window_sum(&weighted, background_radius), global_mean)
        })
        .collect();

    RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let (row, col) = (y as usize, x as usize);
        let a = alpha.get((row, col)).copied().unwrap_or(0.0);
        let alpha_byte = (a * 255.0).round().clamp(0.0, 255.0) as u8;
        if alpha_byte == 0 {
            return Rgba([0, 0, 0, 0]);
        }

        let source = rgb.get_pixel(x, y).0;
        let is_unknown = trimap.get_pixel(x, y).0[0] == TRIMAP_UNKNOWN;
        if !is_unknown || a < MIN_ALPHA_FOR_COLOR {
            return Rgba([source[0], source[1], source[2], alpha_byte]);
        }

        let weight = background_weight.get((row, col)).copied().unwrap_or(0.0);
        let mut color = [0u8; 3];
        for (channel, (out, (sums, global_mean))) in
            color.iter_mut().zip(&background_means).enumerate()
        {
            let background = if weight > 0.0 {
                sums.get((row, col)).copied().unwrap_or(0.0) / weight
            } else {
                *global_mean
            };
            let observed = f32::from(source.get(channel).copied().unwrap_or(0)) / 255.0;
            let foreground = ((observed - (1.0 - a) * background) / a).clamp(0.0, 1.0);
            *out = (foreground * 255.0).round() as u8;
        }

        Rgba([color[0], color[1], color[2], alpha_byte])
    })
}

/// Summed-area table with a zero row and column in front
fn integral(plane: &Array2<f32>) -> Array2<f64> {
    let (height, width) = plane.dim();
    let mut table = Array2::<f64>::zeros((height + 1, width + 1));
    for y in 0..height {
        let mut row_sum = 0.0;
        for x in 0..width {
            row_sum += f64::from(plane.get((y, x)).copied().unwrap_or(0.0));
            let above = table.get((y, x + 1)).copied().unwrap_or(0.0);
            if let Some(cell) = table.get_mut((y + 1, x + 1)) {
                *cell = above + row_sum;
            }
        }
    }
    table
}

/// Window bounds `[start, end)` clipped to `len`
fn window(center: usize, radius: usize, len: usize) -> (usize, usize) {
    (center.saturating_sub(radius), (center + radius + 1).min(len))
}

/// Sum over the `(2r+1)^2` window around each pixel, clipped at the borders
fn window_sum(plane: &Array2<f32>, radius: usize) -> Array2<f32> {
    let (height, width) = plane.dim();
    let table = integral(plane);
    let at = |y: usize, x: usize| table.get((y, x)).copied().unwrap_or(0.0);

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1) = window(y, radius, height);
        let (x0, x1) = window(x, radius, width);
        (at(y1, x1) - at(y0, x1) - at(y1, x0) + at(y0, x0)) as f32
    })
}

/// Mean over the clipped window around each pixel
fn box_mean(plane: &Array2<f32>, radius: usize) -> Array2<f32> {
    let (height, width) = plane.dim();
    let mut sums = window_sum(plane, radius);
    for ((y, x), value) in sums.indexed_iter_mut() {
        let (y0, y1) = window(y, radius, height);
        let (x0, x1) = window(x, radius, width);
        *value /= ((y1 - y0) * (x1 - x0)) as f32;
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Disc mask with a linear soft edge, on a red-on-blue image
    fn disc_fixture(size: u32) -> (DynamicImage, SegmentationMask) {
        let center = size as f32 / 2.0;
        let radius = size as f32 / 4.0;
        let edge = 3.0;

        let coverage = |x: u32, y: u32| {
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            ((radius + edge - (dx * dx + dy * dy).sqrt()) / (2.0 * edge)).clamp(0.0, 1.0)
        };

        let image = RgbImage::from_fn(size, size, |x, y| {
            let a = coverage(x, y);
            let r = (255.0 * a).round() as u8;
            let b = (255.0 * (1.0 - a)).round() as u8;
            image::Rgb([r, 0, b])
        });
        let mask = GrayImage::from_fn(size, size, |x, y| {
            Luma([(coverage(x, y) * 255.0).round() as u8])
        });
        (DynamicImage::ImageRgb8(image), SegmentationMask::from_gray(&mask))
    }

    #[test]
    fn test_naive_cutout_uses_mask_as_alpha() {
        let (image, mask) = disc_fixture(32);
        let cutout = naive_cutout(&image, &mask).unwrap();

        assert_eq!(cutout.dimensions(), (32, 32));
        assert_eq!(cutout.get_pixel(16, 16).0, [255, 0, 0, 255]);
        assert_eq!(cutout.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_naive_cutout_keeps_source_transparency() {
        let image = RgbaImage::from_fn(4, 1, |x, _| match x {
            0 => Rgba([200, 10, 10, 0]),
            1 => Rgba([200, 10, 10, 128]),
            _ => Rgba([200, 10, 10, 255]),
        });
        let mask = SegmentationMask::new(vec![255, 255, 128, 0], (4, 1));
        let cutout = naive_cutout(&DynamicImage::ImageRgba8(image), &mask).unwrap();

        let alphas: Vec<u8> = cutout.pixels().map(|p| p.0[3]).collect();
        assert_eq!(alphas, vec![0, 128, 128, 0]);
        assert_eq!(cutout.get_pixel(1, 0).0, [200, 10, 10, 128]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let (image, _) = disc_fixture(32);
        let mask = SegmentationMask::new(vec![0; 16], (4, 4));
        assert!(naive_cutout(&image, &mask).is_err());
        assert!(alpha_matting_cutout(&image, &mask, &MattingConfig::default()).is_err());
    }

    #[test]
    fn test_trimap_regions() {
        let (_, mask) = disc_fixture(64);
        let trimap = build_trimap(&mask, &MattingConfig::default()).unwrap();

        assert_eq!(trimap.get_pixel(32, 32).0[0], TRIMAP_FOREGROUND);
        assert_eq!(trimap.get_pixel(0, 0).0[0], TRIMAP_BACKGROUND);
        // On the soft edge of the disc
        assert_eq!(trimap.get_pixel(48, 32).0[0], TRIMAP_UNKNOWN);
    }

    #[test]
    fn test_trimap_border_foreground_is_unknown() {
        let mask = SegmentationMask::new(vec![255; 20 * 20], (20, 20));
        let trimap = build_trimap(&mask, &MattingConfig::default()).unwrap();

        assert_eq!(trimap.get_pixel(0, 0).0[0], TRIMAP_UNKNOWN);
        assert_eq!(trimap.get_pixel(10, 10).0[0], TRIMAP_FOREGROUND);
    }

    #[test]
    fn test_alpha_matting_cutout() {
        let (image, mask) = disc_fixture(64);
        let cutout = alpha_matting_cutout(&image, &mask, &MattingConfig::default()).unwrap();

        assert_eq!(cutout.get_pixel(32, 32).0[3], 255);
        assert_eq!(cutout.get_pixel(0, 0).0[3], 0);

        // Foreground colour in the band is decontaminated from the blue background
        let edge = cutout.get_pixel(48, 32).0;
        if edge[3] > 64 {
            assert!(edge[0] > edge[2], "edge pixel {edge:?} should be mostly red");
        }
    }

    #[test]
    fn test_alpha_matting_requires_both_regions() {
        let (image, _) = disc_fixture(32);
        let all_background = SegmentationMask::new(vec![0; 32 * 32], (32, 32));
        let result = alpha_matting_cutout(&image, &all_background, &MattingConfig::default());
        assert!(matches!(result, Err(BgRemovalError::Processing(_))));

        let all_foreground = SegmentationMask::new(vec![255; 32 * 32], (32, 32));
        let result = alpha_matting_cutout(&image, &all_foreground, &MattingConfig::default());
        assert!(matches!(result, Err(BgRemovalError::Processing(_))));
    }

    #[test]
    fn test_post_process_mask_binarizes() {
        let (_, mask) = disc_fixture(64);
        let processed = post_process_mask(&mask).unwrap();

        assert_eq!(processed.dimensions, (64, 64));
        assert!(processed.data.iter().all(|&v| v == 0 || v == 255));
        assert_eq!(processed.data[32 * 64 + 32], 255);
        assert_eq!(processed.data[0], 0);
    }

    #[test]
    fn test_post_process_opening_uses_cross() {
        // A plus-shaped blob is exactly the cross element and survives opening
        let mut plus = vec![0u8; 9 * 9];
        for (x, y) in [(4, 3), (3, 4), (4, 4), (5, 4), (4, 5)] {
            plus[y * 9 + x] = 255;
        }
        let gray = GrayImage::from_raw(9, 9, plus.clone()).unwrap();
        assert_eq!(open_with_cross(&gray).into_raw(), plus);

        // Diagonal pixel pairs are thinner than the cross and go away
        let mut diagonal = vec![0u8; 9 * 9];
        diagonal[3 * 9 + 3] = 255;
        diagonal[4 * 9 + 4] = 255;
        let gray = GrayImage::from_raw(9, 9, diagonal).unwrap();
        assert!(open_with_cross(&gray).into_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_post_process_removes_speckles() {
        let mut data = vec![0u8; 32 * 32];
        data[5 * 32 + 5] = 255;
        let processed = post_process_mask(&SegmentationMask::new(data, (32, 32))).unwrap();
        assert!(processed.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_box_mean_constant_plane() {
        let plane = Array2::from_elem((7, 9), 0.25f32);
        let mean = box_mean(&plane, 2);
        assert!(mean.iter().all(|&v| (v - 0.25).abs() < 1e-6));

        let sums = window_sum(&Array2::from_elem((5, 5), 1.0f32), 1);
        assert!((sums[[0, 0]] - 4.0).abs() < 1e-6);
        assert!((sums[[2, 2]] - 9.0).abs() < 1e-6);
    }
}
