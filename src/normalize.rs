use crate::{Candidate, Region};

/// Margin added around every detected box, the raw boxes hug the glyphs too tightly for OCR.
pub const PADDING: i32 = 5;

/// Clamps each candidate to the image, pads it by [`PADDING`] and clamps again. Order is
/// preserved. Boxes lying outside the image come out degenerate rather than being dropped, so
/// callers can keep positional correspondence. Padding happens after the first clamp, so a box
/// less than [`PADDING`] px outside still yields a thin sliver along the border.
pub fn normalize<'a>(
    candidates: impl IntoIterator<Item = &'a Candidate>,
    width: u32,
    height: u32,
) -> Vec<Region> {
    let (width, height) = (width as i32, height as i32);
    candidates
        .into_iter()
        .map(|candidate| {
            let start_x = candidate.start_x.max(0);
            let start_y = candidate.start_y.max(0);
            let end_x = candidate.end_x.min(width);
            let end_y = candidate.end_y.min(height);
            Region {
                start_x: (start_x - PADDING).max(0),
                start_y: (start_y - PADDING).max(0),
                end_x: (end_x + PADDING).min(width),
                end_y: (end_y + PADDING).min(height),
            }
        })
        .collect()
}
