use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage, GrayImage};
use ndarray::{ArrayView2, Axis, Ix3};
use ort::{inputs, Session};
use std::path::PathBuf;
use tracing::instrument;

use crate::{
    session::{open_session, SessionOptions, TensorRtProfile},
    util::subtract_mean_normalize,
    Error, ExecutionProvider, RecognitionHints, Recognizer, RegionError,
};

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];
const DEST_HEIGHT: u32 = 48;

/// CTC line recognizer running on ONNX Runtime. It always reads a single line, page segmentation
/// hints and timeouts are ignored.
pub struct CrnnNet {
    session: Session,
    keys: Vec<String>,
}

impl CrnnNet {
    #[instrument(level = "debug")]
    pub fn init(
        model_path: PathBuf,
        keys_path: PathBuf,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> crate::Result<Self> {
        let keys = std::fs::read_to_string(&keys_path)
            .map_err(|err| Error::unavailable(&keys_path, err))?;
        // Index 0 is the CTC blank, the model's last class is a space.
        let keys = ["#".to_string()]
            .into_iter()
            .chain(keys.lines().map(|line| line.to_string()))
            .chain([" ".to_string()])
            .collect();

        let session = open_session(
            &model_path,
            SessionOptions {
                num_threads,
                execution_providers,
                cache_path,
                tensorrt_profile: TensorRtProfile {
                    min_shapes: format!("x:1x3x{DEST_HEIGHT}x1"),
                    opt_shapes: format!("x:1x3x{DEST_HEIGHT}x256"),
                    max_shapes: format!("x:1x3x{DEST_HEIGHT}x{}", u16::MAX),
                },
            },
        )?;

        Ok(Self { session, keys })
    }

    fn read_line(&self, image: &GrayImage) -> Result<String, RegionError> {
        let scale = DEST_HEIGHT as f32 / image.height() as f32;
        let dest_width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let image = DynamicImage::ImageLuma8(image.clone()).resize_exact(
            dest_width,
            DEST_HEIGHT,
            FilterType::Triangle,
        );

        let tensor_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = inputs!["x" => tensor_values]
            .and_then(|inputs| self.session.run(inputs))
            .map_err(recognition)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| recognition("model produced no output"))?;
        let output_tensor = output.try_extract_tensor::<f32>().map_err(recognition)?;
        log::trace!("Output tensor size: {:?}", output_tensor.dim());

        let output_tensor = output_tensor
            .into_dimensionality::<Ix3>()
            .map_err(recognition)?
            .index_axis_move(Axis(0), 0);

        Ok(ctc_greedy_decode(output_tensor, &self.keys))
    }
}

fn recognition(err: impl std::fmt::Display) -> RegionError {
    RegionError::Recognition(err.to_string())
}

/// Best class per step, repeats collapsed, blanks (index 0) dropped.
fn ctc_greedy_decode(data: ArrayView2<f32>, keys: &[String]) -> String {
    let mut previous = None;
    let mut text = String::new();
    for step in data.outer_iter() {
        let best = step
            .indexed_iter()
            .max_by_key(|(_, value)| FloatOrd(**value))
            .map(|(index, _)| index);
        if best != previous {
            if let Some(key) = best.filter(|&i| i > 0).and_then(|i| keys.get(i)) {
                text.push_str(key);
            }
        }
        previous = best;
    }
    text
}

impl Recognizer for CrnnNet {
    #[instrument(level = "trace", skip(self, image, _hints))]
    fn recognize(&self, image: &GrayImage, _hints: &RecognitionHints) -> Result<String, RegionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RegionError::Recognition("empty image".to_string()));
        }
        self.read_line(image)
    }
}
