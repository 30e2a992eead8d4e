use std::time::Duration;

use image::{DynamicImage, GrayImage};
use ndarray::Array4;

use crate::{DetectionMaps, RegionError, Result};

/// Produces score and geometry maps for a normalized `(1, 3, height, width)` image tensor.
pub trait TextDetector: Send + Sync {
    fn infer(&self, input: Array4<f32>) -> Result<DetectionMaps>;
}

/// Cleans a cropped region up before it is handed to a [`Recognizer`].
pub trait Preprocessor: Send + Sync {
    fn clean(&self, crop: &DynamicImage) -> Result<GrayImage, RegionError>;
}

/// Reads the text in a single cleaned-up region.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage, hints: &RecognitionHints) -> Result<String, RegionError>;
}

impl<T: TextDetector + ?Sized> TextDetector for Box<T> {
    fn infer(&self, input: Array4<f32>) -> Result<DetectionMaps> {
        (**self).infer(input)
    }
}

impl<T: Preprocessor + ?Sized> Preprocessor for Box<T> {
    fn clean(&self, crop: &DynamicImage) -> Result<GrayImage, RegionError> {
        (**self).clean(crop)
    }
}

impl<T: Recognizer + ?Sized> Recognizer for Box<T> {
    fn recognize(&self, image: &GrayImage, hints: &RecognitionHints) -> Result<String, RegionError> {
        (**self).recognize(image, hints)
    }
}

/// Tesseract page segmentation modes that make sense for detected regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSegMode {
    Auto,
    SingleBlock,
    #[default]
    SingleLine,
    SingleWord,
    SparseText,
}

impl PageSegMode {
    pub fn as_psm(self) -> u8 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
            PageSegMode::SparseText => 11,
        }
    }

    pub fn from_psm(psm: u8) -> Option<Self> {
        Some(match psm {
            3 => PageSegMode::Auto,
            6 => PageSegMode::SingleBlock,
            7 => PageSegMode::SingleLine,
            8 => PageSegMode::SingleWord,
            11 => PageSegMode::SparseText,
            _ => return None,
        })
    }
}

/// Passed through to the recognizer untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionHints {
    pub page_seg_mode: PageSegMode,
    pub engine_mode: u8,
    pub language: Option<String>,
    /// Upper bound for reading one region. Recognizers that can't be interrupted ignore it.
    pub timeout: Option<Duration>,
}

impl Default for RecognitionHints {
    fn default() -> Self {
        Self {
            page_seg_mode: PageSegMode::SingleLine,
            engine_mode: 3,
            language: None,
            timeout: None,
        }
    }
}
