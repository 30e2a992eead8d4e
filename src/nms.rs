use std::cmp::Reverse;

use float_ord::FloatOrd;
use geo::{coord, Area, Rect};
use tracing::instrument;

use crate::Candidate;

/// Boxes overlapping a better box by more than this are dropped.
pub const OVERLAP_THRESHOLD: f32 = 0.3;

/// Greedy non-maximum suppression.
///
/// Only candidates scoring strictly above `score_threshold` take part. They are ranked by
/// descending confidence with a stable sort, so among equal scores the one seen first wins.
/// The best remaining box is kept and every remaining box with an IoU above
/// `overlap_threshold` against it is discarded, until nothing is left.
///
/// Returns indices into `candidates`, best first.
#[instrument(level = "debug", skip(candidates), fields(candidates = candidates.len()))]
pub fn suppress(
    candidates: &[Candidate],
    score_threshold: f32,
    overlap_threshold: f32,
) -> Vec<usize> {
    let mut order = (0..candidates.len())
        .filter(|&i| candidates[i].confidence > score_threshold)
        .collect::<Vec<_>>();
    order.sort_by_key(|&i| Reverse(FloatOrd(candidates[i].confidence)));

    let mut kept: Vec<usize> = Vec::new();
    for index in order {
        let candidate = &candidates[index];
        let overlaps = kept
            .iter()
            .any(|&k| iou(&candidates[k], candidate) > overlap_threshold);
        if !overlaps {
            kept.push(index);
        }
    }

    log::trace!(
        "Kept {} of {} candidates after suppression",
        kept.len(),
        candidates.len()
    );
    kept
}

/// Intersection over union. Boxes without positive extent have no area and overlap nothing.
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let (Some(a), Some(b)) = (a.rect(), b.rect()) else {
        return 0.0;
    };
    let intersection = intersection_area(&a, &b);
    let union = a.unsigned_area() + b.unsigned_area() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn intersection_area(a: &Rect<f32>, b: &Rect<f32>) -> f32 {
    let min = coord! {
        x: a.min().x.max(b.min().x),
        y: a.min().y.max(b.min().y),
    };
    let max = coord! {
        x: a.max().x.min(b.max().x),
        y: a.max().y.min(b.max().y),
    };
    if max.x <= min.x || max.y <= min.y {
        return 0.0;
    }
    Rect::new(min, max).unsigned_area()
}
