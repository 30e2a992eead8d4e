use std::path::PathBuf;

use ndarray::{Array4, ArrayViewD, Axis, Ix4};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    session::{open_session, SessionOptions, TensorRtProfile},
    DetectionMaps, Error, ExecutionProvider, Result, TextDetector,
};

pub const DEFAULT_INPUT_NAME: &str = "input_images:0";
pub const DEFAULT_SCORE_OUTPUT: &str = "feature_fusion/Conv_7/Sigmoid:0";
pub const DEFAULT_GEOMETRY_OUTPUT: &str = "feature_fusion/concat_3:0";

/// Memory layout the exported graph expects for its input and produces for its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    Nchw,
    /// Graphs converted from TensorFlow keep channels last.
    #[default]
    Nhwc,
}

#[derive(Debug, Clone)]
pub struct EastNetConfig {
    pub input_name: String,
    pub score_output: String,
    pub geometry_output: String,
    pub layout: TensorLayout,
}

impl Default for EastNetConfig {
    fn default() -> Self {
        Self {
            input_name: DEFAULT_INPUT_NAME.to_string(),
            score_output: DEFAULT_SCORE_OUTPUT.to_string(),
            geometry_output: DEFAULT_GEOMETRY_OUTPUT.to_string(),
            layout: TensorLayout::default(),
        }
    }
}

/// EAST text detector running on ONNX Runtime.
pub struct EastNet {
    session: Session,
    path: PathBuf,
    config: EastNetConfig,
}

impl EastNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        config: EastNetConfig,
        num_threads: usize,
        max_side_len: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> Result<Self> {
        let shape = |side: u32| match config.layout {
            TensorLayout::Nchw => format!("{}:1x3x{side}x{side}", config.input_name),
            TensorLayout::Nhwc => format!("{}:1x{side}x{side}x3", config.input_name),
        };
        let session = open_session(
            &path,
            SessionOptions {
                num_threads,
                execution_providers,
                cache_path,
                tensorrt_profile: TensorRtProfile {
                    min_shapes: shape(32),
                    opt_shapes: shape(max_side_len),
                    max_shapes: shape(max_side_len),
                },
            },
        )?;

        Ok(Self {
            session,
            path,
            config,
        })
    }

    fn missing_output(&self, name: &str) -> Error {
        Error::unavailable(&self.path, format!("model has no output {name:?}"))
    }
}

impl TextDetector for EastNet {
    #[instrument(level = "debug", skip(self, input))]
    fn infer(&self, input: Array4<f32>) -> Result<DetectionMaps> {
        let input = match self.config.layout {
            TensorLayout::Nchw => input,
            TensorLayout::Nhwc => input
                .permuted_axes([0, 2, 3, 1])
                .as_standard_layout()
                .into_owned(),
        };
        let outputs = self
            .session
            .run(inputs![self.config.input_name.as_str() => input]?)?;
        let scores = outputs
            .get(self.config.score_output.as_str())
            .ok_or_else(|| self.missing_output(&self.config.score_output))?
            .try_extract_tensor::<f32>()?;
        let geometry = outputs
            .get(self.config.geometry_output.as_str())
            .ok_or_else(|| self.missing_output(&self.config.geometry_output))?
            .try_extract_tensor::<f32>()?;
        log::trace!(
            "Score tensor {:?}, geometry tensor {:?}",
            scores.shape(),
            geometry.shape()
        );

        to_maps(scores, geometry, self.config.layout)
    }
}

/// Strips the batch axis off the raw outputs and moves geometry channels first.
pub(crate) fn to_maps(
    scores: ArrayViewD<f32>,
    geometry: ArrayViewD<f32>,
    layout: TensorLayout,
) -> Result<DetectionMaps> {
    let mismatch = || Error::ShapeMismatch {
        scores: scores.shape().to_vec(),
        geometry: geometry.shape().to_vec(),
    };
    let score_view = scores.view().into_dimensionality::<Ix4>().map_err(|_| mismatch())?;
    let geometry_view = geometry
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| mismatch())?;
    let channel_axis = match layout {
        TensorLayout::Nchw => Axis(1),
        TensorLayout::Nhwc => Axis(3),
    };
    if score_view.len_of(Axis(0)) == 0
        || geometry_view.len_of(Axis(0)) == 0
        || score_view.len_of(channel_axis) != 1
    {
        return Err(mismatch());
    }

    let score_view = score_view.index_axis_move(Axis(0), 0);
    let geometry_view = geometry_view.index_axis_move(Axis(0), 0);
    let (scores, geometry) = match layout {
        TensorLayout::Nchw => (
            score_view.index_axis_move(Axis(0), 0).to_owned(),
            geometry_view.to_owned(),
        ),
        TensorLayout::Nhwc => (
            score_view.index_axis_move(Axis(2), 0).to_owned(),
            geometry_view
                .permuted_axes([2, 0, 1])
                .as_standard_layout()
                .into_owned(),
        ),
    };
    Ok(DetectionMaps { scores, geometry })
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, IxDyn};

    use super::*;

    #[test]
    fn channels_last_outputs_are_transposed() {
        let scores = Array::from_shape_fn(IxDyn(&[1, 2, 3, 1]), |idx| (idx[1] * 3 + idx[2]) as f32);
        let geometry = Array::from_shape_fn(IxDyn(&[1, 2, 3, 5]), |idx| {
            (idx[3] * 100 + idx[1] * 10 + idx[2]) as f32
        });

        let maps = to_maps(scores.view(), geometry.view(), TensorLayout::Nhwc).unwrap();

        assert_eq!(maps.scores.dim(), (2, 3));
        assert_eq!(maps.geometry.dim(), (5, 2, 3));
        assert_eq!(maps.scores[[1, 2]], 5.0);
        assert_eq!(maps.geometry[[4, 1, 2]], 412.0);
    }

    #[test]
    fn channels_first_outputs_keep_their_order() {
        let scores = Array::from_shape_fn(IxDyn(&[1, 1, 2, 3]), |idx| (idx[2] * 3 + idx[3]) as f32);
        let geometry = Array::from_shape_fn(IxDyn(&[1, 5, 2, 3]), |idx| {
            (idx[1] * 100 + idx[2] * 10 + idx[3]) as f32
        });

        let maps = to_maps(scores.view(), geometry.view(), TensorLayout::Nchw).unwrap();

        assert_eq!(maps.scores[[1, 0]], 3.0);
        assert_eq!(maps.geometry[[2, 0, 1]], 201.0);
    }

    #[test]
    fn unexpected_ranks_are_shape_mismatches() {
        let scores = Array::<f32, _>::zeros(IxDyn(&[2, 3]));
        let geometry = Array::<f32, _>::zeros(IxDyn(&[1, 5, 2, 3]));

        assert!(matches!(
            to_maps(scores.view(), geometry.view(), TensorLayout::Nchw),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
