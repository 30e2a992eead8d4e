use image::DynamicImage;
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    util::crop_region, ExtractedText, Preprocessor, RecognitionHints, Recognizer, Region,
    RegionError,
};

#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub hints: RecognitionHints,
    /// Read regions on the rayon pool. Results keep region order either way.
    pub parallel: bool,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            hints: RecognitionHints::default(),
            parallel: true,
        }
    }
}

/// Reads every region in order. A region that can't be read, for whatever reason, yields an
/// empty string in its slot and the rest carry on.
#[instrument(level = "debug", skip_all, fields(regions = regions.len()))]
pub fn extract_text<P, R>(
    image: &DynamicImage,
    regions: &[Region],
    preprocessor: &P,
    recognizer: &R,
    options: &OcrOptions,
) -> ExtractedText
where
    P: Preprocessor + ?Sized,
    R: Recognizer + ?Sized,
{
    let read = |index: usize, region: &Region| -> String {
        match read_region(image, region, preprocessor, recognizer, &options.hints) {
            Ok(text) => text,
            Err(RegionError::Degenerate) => {
                log::debug!("Skipping region {index} ({region:?}), it has no area");
                String::new()
            }
            Err(err) => {
                log::warn!("Region {index} ({region:?}) could not be read: {err}");
                String::new()
            }
        }
    };

    let mut lines = vec![String::new(); regions.len()];
    if options.parallel {
        lines
            .par_iter_mut()
            .zip(regions.par_iter())
            .enumerate()
            .for_each(|(index, (slot, region))| *slot = read(index, region));
    } else {
        for (index, (slot, region)) in lines.iter_mut().zip(regions).enumerate() {
            *slot = read(index, region);
        }
    }

    ExtractedText { lines }
}

pub(crate) fn read_region<P, R>(
    image: &DynamicImage,
    region: &Region,
    preprocessor: &P,
    recognizer: &R,
    hints: &RecognitionHints,
) -> Result<String, RegionError>
where
    P: Preprocessor + ?Sized,
    R: Recognizer + ?Sized,
{
    let crop = crop_region(image, region).ok_or(RegionError::Degenerate)?;
    #[cfg(feature = "debug")]
    {
        let _ = std::fs::create_dir_all("part_images");
        let _ = crop.save(format!(
            "part_images/{}_{}_{}_{}.png",
            region.start_x, region.start_y, region.end_x, region.end_y
        ));
    }
    read_image(&crop, preprocessor, recognizer, hints)
}

pub(crate) fn read_image<P, R>(
    image: &DynamicImage,
    preprocessor: &P,
    recognizer: &R,
    hints: &RecognitionHints,
) -> Result<String, RegionError>
where
    P: Preprocessor + ?Sized,
    R: Recognizer + ?Sized,
{
    let cleaned = preprocessor.clean(image)?;
    let text = recognizer.recognize(&cleaned, hints)?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    struct Passthrough;

    impl Preprocessor for Passthrough {
        fn clean(&self, crop: &DynamicImage) -> Result<GrayImage, RegionError> {
            Ok(crop.to_luma8())
        }
    }

    struct Failing;

    impl Preprocessor for Failing {
        fn clean(&self, _: &DynamicImage) -> Result<GrayImage, RegionError> {
            Err(RegionError::Preprocessing("nope".to_string()))
        }
    }

    /// Reads the brightness of the crop's top-left pixel, fails on pure black.
    #[derive(Default)]
    struct Brightness {
        calls: AtomicUsize,
    }

    impl Recognizer for Brightness {
        fn recognize(&self, image: &GrayImage, _: &RecognitionHints) -> Result<String, RegionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match image.get_pixel(0, 0) {
                Luma([0]) => Err(RegionError::Recognition("blank".to_string())),
                Luma([value]) => Ok(format!("  level {value}\n")),
            }
        }
    }

    fn striped_image() -> DynamicImage {
        // Columns 0..10 are 100, 10..20 are black, 20..30 are 200.
        let image = RgbImage::from_fn(30, 10, |x, _| match x {
            0..=9 => Rgb([100, 100, 100]),
            10..=19 => Rgb([0, 0, 0]),
            _ => Rgb([200, 200, 200]),
        });
        DynamicImage::ImageRgb8(image)
    }

    fn region(start_x: i32, end_x: i32) -> Region {
        Region {
            start_x,
            start_y: 0,
            end_x,
            end_y: 10,
        }
    }

    #[test]
    fn reads_regions_in_order_and_trims() {
        let image = striped_image();
        let regions = [region(20, 30), region(0, 10)];

        let text = extract_text(
            &image,
            &regions,
            &Passthrough,
            &Brightness::default(),
            &OcrOptions::default(),
        );

        assert_eq!(text.lines, ["level 200", "level 100"]);
        assert_eq!(text.text(), "level 200\n\nlevel 100");
    }

    #[test]
    fn failures_leave_positional_placeholders() {
        let image = striped_image();
        let regions = [region(0, 10), region(10, 20), region(15, 15), region(20, 30)];
        let recognizer = Brightness::default();

        let text = extract_text(
            &image,
            &regions,
            &Passthrough,
            &recognizer,
            &OcrOptions {
                parallel: false,
                ..Default::default()
            },
        );

        assert_eq!(text.lines, ["level 100", "", "", "level 200"]);
        assert_eq!(text.text(), "level 100\n\nlevel 200");
        // The zero-width region never reaches the recognizer.
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn preprocessing_failures_are_absorbed() {
        let image = striped_image();

        let text = extract_text(
            &image,
            &[region(0, 10)],
            &Failing,
            &Brightness::default(),
            &OcrOptions::default(),
        );

        assert_eq!(text.lines, [""]);
        assert!(text.is_empty());
    }

    #[test]
    fn no_regions_means_no_text() {
        let text = extract_text(
            &striped_image(),
            &[],
            &Passthrough,
            &Brightness::default(),
            &OcrOptions::default(),
        );

        assert!(text.lines.is_empty());
        assert_eq!(text.text(), "");
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let image = striped_image();
        let regions = (0..40)
            .map(|i| region(i % 30, i % 30 + 1))
            .collect::<Vec<_>>();
        let sequential = OcrOptions {
            parallel: false,
            ..Default::default()
        };

        let a = extract_text(&image, &regions, &Passthrough, &Brightness::default(), &sequential);
        let b = extract_text(
            &image,
            &regions,
            &Passthrough,
            &Brightness::default(),
            &OcrOptions::default(),
        );

        assert_eq!(a, b);
        assert_eq!(a.lines.len(), 40);
    }
}
