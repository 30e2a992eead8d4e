use ndarray::{s, Axis};
use tracing::instrument;

use crate::{Candidate, DetectionMaps, Error, Result};

/// The detector predicts at a quarter of the input resolution.
pub const CELL_STRIDE: f32 = 4.0;

const GEOMETRY_CHANNELS: usize = 5;

/// Turns the score and geometry maps into one candidate box per cell scoring at least
/// `min_confidence`. The output order carries no meaning.
#[instrument(level = "debug", skip(maps))]
pub fn decode(maps: &DetectionMaps, min_confidence: f32) -> Result<Vec<Candidate>> {
    let DetectionMaps { scores, geometry } = maps;
    if geometry.len_of(Axis(0)) != GEOMETRY_CHANNELS
        || geometry.len_of(Axis(1)) != scores.len_of(Axis(0))
        || geometry.len_of(Axis(2)) != scores.len_of(Axis(1))
    {
        return Err(Error::ShapeMismatch {
            scores: scores.shape().to_vec(),
            geometry: geometry.shape().to_vec(),
        });
    }

    let mut candidates = Vec::new();
    for ((y, x), &score) in scores.indexed_iter() {
        // Written this way round so NaN scores are skipped too.
        if !(score >= min_confidence) {
            continue;
        }
        let cell = geometry.slice(s![.., y, x]);
        let (top, right, bottom, left, angle) = (cell[0], cell[1], cell[2], cell[3], cell[4]);

        let offset_x = x as f32 * CELL_STRIDE;
        let offset_y = y as f32 * CELL_STRIDE;
        let (sin, cos) = angle.sin_cos();

        let height = top + bottom;
        let width = right + left;

        let end_x = (offset_x + cos * right + sin * bottom) as i32;
        let end_y = (offset_y - sin * right + cos * bottom) as i32;
        let start_x = (end_x as f32 - width) as i32;
        let start_y = (end_y as f32 - height) as i32;

        candidates.push(Candidate {
            start_x,
            start_y,
            end_x,
            end_y,
            confidence: score,
        });
    }

    log::trace!(
        "Decoded {} candidates from a {:?} score map",
        candidates.len(),
        scores.dim()
    );
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_6;

    use ndarray::{Array2, Array3};

    use super::*;

    fn maps(rows: usize, cols: usize) -> DetectionMaps {
        DetectionMaps {
            scores: Array2::zeros((rows, cols)),
            geometry: Array3::zeros((5, rows, cols)),
        }
    }

    fn set_cell(maps: &mut DetectionMaps, y: usize, x: usize, score: f32, geometry: [f32; 5]) {
        maps.scores[[y, x]] = score;
        for (channel, value) in geometry.into_iter().enumerate() {
            maps.geometry[[channel, y, x]] = value;
        }
    }

    #[test]
    fn single_confident_cell_yields_one_candidate() {
        let mut maps = maps(100, 100);
        set_cell(&mut maps, 5, 5, 0.9, [2.0, 3.0, 2.0, 3.0, 0.0]);

        let candidates = decode(&maps, 0.7).unwrap();

        assert_eq!(
            candidates,
            vec![Candidate {
                start_x: 17,
                start_y: 18,
                end_x: 23,
                end_y: 22,
                confidence: 0.9,
            }]
        );
    }

    #[test]
    fn rotation_moves_the_end_corner() {
        let mut maps = maps(16, 16);
        set_cell(&mut maps, 10, 10, 0.8, [2.0, 10.0, 4.0, 6.0, FRAC_PI_6]);

        let candidates = decode(&maps, 0.5).unwrap();

        // end = (40 + cos*10 + sin*4, 40 - sin*10 + cos*4) = (50.66, 38.46)
        assert_eq!(candidates.len(), 1);
        let candidate = candidates[0];
        assert_eq!((candidate.end_x, candidate.end_y), (50, 38));
        assert_eq!((candidate.start_x, candidate.start_y), (34, 32));
    }

    #[test]
    fn coordinates_truncate_toward_zero() {
        let mut maps = maps(4, 4);
        set_cell(&mut maps, 0, 0, 1.0, [0.0, -2.5, 0.5, 0.0, 0.0]);

        let candidate = decode(&maps, 0.5).unwrap()[0];

        assert_eq!(candidate.end_x, -2);
        assert_eq!(candidate.end_y, 0);
    }

    #[test]
    fn cells_below_threshold_never_produce_candidates() {
        let mut maps = maps(10, 10);
        for ((y, x), score) in maps.scores.indexed_iter_mut() {
            *score = ((y * 10 + x) as f32) / 100.0;
        }
        maps.geometry.fill(1.0);
        let min_confidence = 0.42;

        let candidates = decode(&maps, min_confidence).unwrap();

        let expected = maps
            .scores
            .iter()
            .filter(|score| **score >= min_confidence)
            .count();
        assert_eq!(candidates.len(), expected);
        assert!(candidates.iter().all(|c| c.confidence >= min_confidence));
    }

    #[test]
    fn nan_scores_are_skipped() {
        let mut maps = maps(2, 2);
        maps.scores.fill(f32::NAN);

        assert!(decode(&maps, 0.0).unwrap().is_empty());
    }

    #[test]
    fn empty_maps_decode_to_nothing() {
        assert!(decode(&maps(0, 0), 0.5).unwrap().is_empty());
    }

    #[test]
    fn mismatched_shapes_fail_fast() {
        let maps = DetectionMaps {
            scores: Array2::zeros((8, 8)),
            geometry: Array3::zeros((5, 8, 7)),
        };

        let err = decode(&maps, 0.5).unwrap_err();

        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn geometry_needs_five_channels() {
        let maps = DetectionMaps {
            scores: Array2::zeros((8, 8)),
            geometry: Array3::zeros((4, 8, 8)),
        };

        assert!(matches!(
            decode(&maps, 0.5),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
