use geo::{coord, Rect};
use image::RgbImage;
use ndarray::{Array2, Array3};

/// Raw output of one forward pass of the detector.
///
/// `scores` has shape `(rows, cols)`. `geometry` has shape `(5, rows, cols)`: the distances from
/// the cell to the top, right, bottom and left edges of the box, followed by the rotation angle
/// in radians.
#[derive(Debug, Clone)]
pub struct DetectionMaps {
    pub scores: Array2<f32>,
    pub geometry: Array3<f32>,
}

/// An axis-aligned text box produced by the geometry decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub confidence: f32,
}

impl Candidate {
    /// `None` when the box has no positive extent.
    pub fn rect(&self) -> Option<Rect<f32>> {
        to_rect(self.start_x, self.start_y, self.end_x, self.end_y)
    }

    /// Maps the box from network input space back to image space.
    pub fn scaled(&self, factor_x: f32, factor_y: f32) -> Self {
        Self {
            start_x: (self.start_x as f32 * factor_x).round() as i32,
            start_y: (self.start_y as f32 * factor_y).round() as i32,
            end_x: (self.end_x as f32 * factor_x).round() as i32,
            end_y: (self.end_y as f32 * factor_y).round() as i32,
            confidence: self.confidence,
        }
    }
}

/// A suppressed, clamped and padded text box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
}

impl Region {
    pub fn width(&self) -> i32 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> i32 {
        self.end_y - self.start_y
    }

    pub fn is_degenerate(&self) -> bool {
        self.start_x >= self.end_x || self.start_y >= self.end_y
    }

    pub fn rect(&self) -> Option<Rect<f32>> {
        to_rect(self.start_x, self.start_y, self.end_x, self.end_y)
    }
}

fn to_rect(start_x: i32, start_y: i32, end_x: i32, end_y: i32) -> Option<Rect<f32>> {
    // Rect::new silently swaps inverted corners, so reject those first.
    if start_x >= end_x || start_y >= end_y {
        return None;
    }
    Some(Rect::new(
        coord! { x: start_x as f32, y: start_y as f32 },
        coord! { x: end_x as f32, y: end_y as f32 },
    ))
}

#[derive(Debug, Clone)]
pub struct Detection {
    /// Regions in suppression order (highest confidence first).
    pub regions: Vec<Region>,
    /// Number of candidates the decoder produced before suppression.
    pub candidates: usize,
    /// The input image with every usable region outlined.
    pub annotated: RgbImage,
}

/// Text read from each region, positionally aligned with the regions it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub lines: Vec<String>,
}

impl ExtractedText {
    pub fn non_empty(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(index, line)| (index, line.as_str()))
    }

    /// All non-empty lines joined by a blank line.
    pub fn text(&self) -> String {
        self.non_empty()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.non_empty().next().is_none()
    }
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub detection: Detection,
    pub text: ExtractedText,
}
