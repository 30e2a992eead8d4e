use image::{imageops, DynamicImage, GrayImage};
use imageproc::contrast::{otsu_level, threshold_mut, ThresholdType};
use tracing::instrument;

use crate::{Preprocessor, RegionError};

/// Grayscale, upscale short crops, then Otsu-binarize so text ends up dark on a light
/// background.
#[derive(Debug, Clone, Copy)]
pub struct Binarizer {
    /// Crops shorter than this are upscaled to it.
    pub min_height: u32,
    pub invert_dark_background: bool,
}

impl Default for Binarizer {
    fn default() -> Self {
        Self {
            min_height: 32,
            invert_dark_background: true,
        }
    }
}

impl Preprocessor for Binarizer {
    #[instrument(level = "trace", skip(self, crop))]
    fn clean(&self, crop: &DynamicImage) -> Result<GrayImage, RegionError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(RegionError::Preprocessing(format!(
                "crop is {}x{}",
                crop.width(),
                crop.height()
            )));
        }

        let mut gray = crop.to_luma8();
        if gray.height() < self.min_height {
            let factor = self.min_height as f32 / gray.height() as f32;
            let width = ((gray.width() as f32 * factor).round() as u32).max(1);
            gray = imageops::resize(
                &gray,
                width,
                self.min_height,
                imageops::FilterType::CatmullRom,
            );
        }

        let level = otsu_level(&gray);
        threshold_mut(&mut gray, level, ThresholdType::Binary);

        if self.invert_dark_background {
            let dark = gray.pixels().filter(|pixel| pixel.0[0] == 0).count();
            if dark * 2 > gray.pixels().len() {
                imageops::invert(&mut gray);
            }
        }

        Ok(gray)
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb, RgbImage};

    use super::*;

    fn two_tone(foreground: Rgb<u8>, background: Rgb<u8>) -> DynamicImage {
        let mut image = RgbImage::from_pixel(40, 40, background);
        for y in 15..25 {
            for x in 5..35 {
                image.put_pixel(x, y, foreground);
            }
        }
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn dark_text_on_light_background_stays_dark() {
        let image = two_tone(Rgb([20, 20, 20]), Rgb([230, 230, 230]));

        let cleaned = Binarizer::default().clean(&image).unwrap();

        assert_eq!(*cleaned.get_pixel(20, 20), Luma([0]));
        assert_eq!(*cleaned.get_pixel(2, 2), Luma([255]));
    }

    #[test]
    fn light_text_on_dark_background_is_inverted() {
        let image = two_tone(Rgb([240, 240, 240]), Rgb([10, 10, 10]));

        let cleaned = Binarizer::default().clean(&image).unwrap();

        assert_eq!(*cleaned.get_pixel(20, 20), Luma([0]));
        assert_eq!(*cleaned.get_pixel(2, 2), Luma([255]));
    }

    #[test]
    fn short_crops_are_upscaled() {
        let image = DynamicImage::new_rgb8(30, 8);

        let cleaned = Binarizer::default().clean(&image).unwrap();

        assert_eq!(cleaned.dimensions(), (120, 32));
    }

    #[test]
    fn empty_crops_fail() {
        let image = DynamicImage::new_rgb8(0, 0);

        assert!(matches!(
            Binarizer::default().clean(&image),
            Err(RegionError::Preprocessing(_))
        ));
    }
}
