use image::{DynamicImage, Pixel, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use ndarray::Array3;
use tracing::instrument;

use crate::Region;

const INPUT_MULTIPLE: u32 = 32;
const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_THICKNESS: i32 = 2;

/// Converts an image into a `(3, height, width)` RGB tensor computing `pixel * norm - mean * norm`
/// per channel, with pixels in `[0, 1]`.
#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Scale {
    /// Scale to an explicit network input size.
    pub fn fixed(image: &DynamicImage, target_width: u32, target_height: u32) -> Self {
        Self {
            factor_x: image.width() as f32 / target_width as f32,
            factor_y: image.height() as f32 / target_height as f32,
            target_width,
            target_height,
        }
    }
}

/// Picks a network input size no longer than `target_size` on the long side, keeping the aspect
/// ratio, with both sides floored to a multiple of 32.
pub fn scale_normalized(image: &DynamicImage, target_size: u32) -> Scale {
    let aspect_ratio = image.width() as f32 / image.height() as f32;
    let (mut target_width, mut target_height) = if aspect_ratio >= 1.0 {
        let width = image.width().min(target_size);
        let height = (width as f32 / aspect_ratio) as u32;
        (width, height)
    } else {
        let height = image.height().min(target_size);
        let width = (height as f32 * aspect_ratio) as u32;
        (width, height)
    };
    if target_width % INPUT_MULTIPLE != 0 {
        let new_width = (target_width / INPUT_MULTIPLE * INPUT_MULTIPLE).max(INPUT_MULTIPLE);
        log::debug!(
            "Target width of {target_width} wasn't a multiple of {INPUT_MULTIPLE}, flooring to {new_width}."
        );
        target_width = new_width;
    }
    if target_height % INPUT_MULTIPLE != 0 {
        let new_height = (target_height / INPUT_MULTIPLE * INPUT_MULTIPLE).max(INPUT_MULTIPLE);
        log::debug!(
            "Target height of {target_height} wasn't a multiple of {INPUT_MULTIPLE}, flooring to {new_height}."
        );
        target_height = new_height;
    }
    let scale = Scale::fixed(image, target_width, target_height);
    log::debug!(
        "Resize will change image dimensions from (w: {}, h: {}) to (w: {target_width}, h: {target_height}) with scaling factor ({}, {}).",
        image.width(),
        image.height(),
        scale.factor_x,
        scale.factor_y
    );
    scale
}

/// Cuts a region out of the image, or `None` when nothing of it lies inside.
pub(crate) fn crop_region(image: &DynamicImage, region: &Region) -> Option<DynamicImage> {
    if region.is_degenerate() {
        return None;
    }
    let x = (region.start_x.max(0) as u32).min(image.width());
    let y = (region.start_y.max(0) as u32).min(image.height());
    let end_x = (region.end_x.max(0) as u32).min(image.width());
    let end_y = (region.end_y.max(0) as u32).min(image.height());
    let (width, height) = (end_x.saturating_sub(x), end_y.saturating_sub(y));
    if width == 0 || height == 0 {
        return None;
    }
    log::trace!("Slicing subimage to {region:?}");
    Some(image.crop_imm(x, y, width, height))
}

/// Copies the image and outlines every usable region on it.
pub(crate) fn draw_regions(image: &DynamicImage, regions: &[Region]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    for region in regions.iter().filter(|region| !region.is_degenerate()) {
        for inset in 0..OUTLINE_THICKNESS {
            let width = region.width() - 2 * inset;
            let height = region.height() - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(region.start_x + inset, region.start_y + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut canvas, rect, OUTLINE_COLOR);
        }
    }
    canvas
}
