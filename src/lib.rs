use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage};
use ndarray::Axis;
use tracing::instrument;

mod crnn_net;
pub mod decode;
mod east_net;
mod engine;
mod error;
pub mod extract;
pub mod nms;
pub mod normalize;
mod preprocess;
mod result;
mod session;
mod tesseract;
pub mod util;

pub use crnn_net::CrnnNet;
pub use east_net::{
    EastNet, EastNetConfig, TensorLayout, DEFAULT_GEOMETRY_OUTPUT, DEFAULT_INPUT_NAME,
    DEFAULT_SCORE_OUTPUT,
};
pub use engine::{PageSegMode, Preprocessor, RecognitionHints, Recognizer, TextDetector};
pub use error::{Error, RegionError, Result};
pub use extract::OcrOptions;
pub use preprocess::Binarizer;
pub use result::*;
pub use tesseract::Tesseract;

use decode::decode;
use nms::{suppress, OVERLAP_THRESHOLD};
use normalize::normalize;
use util::{draw_regions, scale_normalized, subtract_mean_normalize, Scale};

pub use ort as runtime;

/// Channel means of the EAST training data, expressed for pixels in `[0, 1]`.
const MEAN_VALUES: [f32; 3] = [123.68 / 255.0, 116.78 / 255.0, 103.94 / 255.0];
const NORM_VALUES: [f32; 3] = [255.0, 255.0, 255.0];

const DEFAULT_MAX_SIDE_LEN: u32 = 1280;

enum RecognizerSource {
    Tesseract {
        binary: PathBuf,
        language: Option<String>,
    },
    Crnn {
        model: PathBuf,
        keys: PathBuf,
    },
}

pub struct EastOcrBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    det_config: EastNetConfig,
    max_side_len: u32,
    input_size: Option<(u32, u32)>,
    recognizer: RecognizerSource,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl EastOcrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn input_name(mut self, name: impl Into<String>) -> Self {
        self.det_config.input_name = name.into();
        self
    }

    pub fn output_names(mut self, scores: impl Into<String>, geometry: impl Into<String>) -> Self {
        self.det_config.score_output = scores.into();
        self.det_config.geometry_output = geometry.into();
        self
    }

    pub fn layout(mut self, layout: TensorLayout) -> Self {
        self.det_config.layout = layout;
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    /// Feed the detector a fixed input size instead of one derived from the image.
    pub fn input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = Some((width, height));
        self
    }

    pub fn tesseract(mut self, binary: impl Into<PathBuf>) -> Self {
        let language = match self.recognizer {
            RecognizerSource::Tesseract { language, .. } => language,
            RecognizerSource::Crnn { .. } => None,
        };
        self.recognizer = RecognizerSource::Tesseract {
            binary: binary.into(),
            language,
        };
        self
    }

    /// Default tesseract language. Ignored by the CRNN recognizer.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        if let RecognizerSource::Tesseract {
            language: current, ..
        } = &mut self.recognizer
        {
            *current = Some(language.into());
        }
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.recognizer = RecognizerSource::Crnn {
            model: model_path.into(),
            keys: keys_path.into(),
        };
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(EastNet, Box<dyn Recognizer>)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/frozen_east_text_detection.onnx".into());
        let max_side_len = self
            .input_size
            .map(|(width, height)| width.max(height))
            .unwrap_or(self.max_side_len);
        let detector = EastNet::init(
            det_path,
            self.det_config.clone(),
            self.threads,
            max_side_len,
            &self.execution_providers,
            self.cache_path.clone(),
        )?;
        let recognizer: Box<dyn Recognizer> = match &self.recognizer {
            RecognizerSource::Tesseract { binary, language } => {
                let tesseract = Tesseract::new(binary.clone());
                Box::new(match language {
                    Some(language) => tesseract.language(language.clone()),
                    None => tesseract,
                })
            }
            RecognizerSource::Crnn { model, keys } => Box::new(CrnnNet::init(
                model.clone(),
                keys.clone(),
                self.threads,
                &self.execution_providers,
                self.cache_path.clone(),
            )?),
        };
        Ok((detector, recognizer))
    }

    /// Loads the models. A missing or broken model is [`Error::ResourceUnavailable`].
    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<EastOcr> {
        let (detector, recognizer) = self.init_models()?;
        Ok(EastOcr {
            detector,
            preprocessor: Binarizer::default(),
            recognizer,
            max_side_len: self.max_side_len,
            input_size: self.input_size,
        })
    }
}

impl Default for EastOcrBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            det_config: EastNetConfig::default(),
            max_side_len: DEFAULT_MAX_SIDE_LEN,
            input_size: None,
            recognizer: RecognizerSource::Tesseract {
                binary: "tesseract".into(),
                language: None,
            },
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// Text detection and recognition over whole images.
pub struct EastOcr<D = EastNet, P = Binarizer, R = Box<dyn Recognizer>> {
    detector: D,
    preprocessor: P,
    recognizer: R,
    max_side_len: u32,
    input_size: Option<(u32, u32)>,
}

impl<D, P, R> EastOcr<D, P, R>
where
    D: TextDetector,
    P: Preprocessor,
    R: Recognizer,
{
    pub fn new(detector: D, preprocessor: P, recognizer: R) -> Self {
        Self {
            detector,
            preprocessor,
            recognizer,
            max_side_len: DEFAULT_MAX_SIDE_LEN,
            input_size: None,
        }
    }

    pub fn with_max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = Some((width, height));
        self
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    fn scale(&self, image: &DynamicImage) -> Scale {
        match self.input_size {
            Some((width, height)) => Scale::fixed(image, width, height),
            None if self.max_side_len > 0 => scale_normalized(image, self.max_side_len),
            None => scale_normalized(image, u32::MAX),
        }
    }

    /// Finds the text regions in an image.
    ///
    /// Only cells scoring at least `min_confidence` become candidates, and only candidates
    /// scoring above it survive suppression. Finding nothing is not an error.
    #[instrument(skip(self, image))]
    pub fn detect(&self, image: &DynamicImage, min_confidence: f32) -> Result<Detection> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidInput(format!(
                "image is {}x{}",
                image.width(),
                image.height()
            )));
        }

        let scale = self.scale(image);
        let input = DynamicImage::ImageRgb8(image.to_rgb8()).resize_exact(
            scale.target_width,
            scale.target_height,
            FilterType::Triangle,
        );
        let input_values =
            subtract_mean_normalize(&input, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let maps = self.detector.infer(input_values)?;

        let candidates = decode(&maps, min_confidence)?
            .into_iter()
            .map(|candidate| candidate.scaled(scale.factor_x, scale.factor_y))
            .collect::<Vec<_>>();
        let kept = suppress(&candidates, min_confidence, OVERLAP_THRESHOLD);
        let regions = normalize(
            kept.iter().map(|&index| &candidates[index]),
            image.width(),
            image.height(),
        );
        let annotated = draw_regions(image, &regions);

        log::debug!(
            "Detected {} text regions from {} candidates.",
            regions.len(),
            candidates.len()
        );
        Ok(Detection {
            regions,
            candidates: candidates.len(),
            annotated,
        })
    }

    /// Like [`EastOcr::detect`], loading the image from disk first.
    pub fn detect_file(&self, path: impl AsRef<Path>, min_confidence: f32) -> Result<Detection> {
        let image = open_image(path.as_ref())?;
        self.detect(&image, min_confidence)
    }

    /// Reads the text of each region, in region order.
    pub fn extract_text(
        &self,
        image: &DynamicImage,
        regions: &[Region],
        options: &OcrOptions,
    ) -> ExtractedText {
        extract::extract_text(
            image,
            regions,
            &self.preprocessor,
            &self.recognizer,
            options,
        )
    }

    /// Detects text regions and reads them.
    #[instrument(skip(self, image, options))]
    pub fn read(
        &self,
        image: &DynamicImage,
        min_confidence: f32,
        options: &OcrOptions,
    ) -> Result<OcrOutput> {
        let detection = self.detect(image, min_confidence)?;
        let text = self.extract_text(image, &detection.regions, options);
        Ok(OcrOutput { detection, text })
    }

    /// Reads the whole image as one block, skipping detection.
    #[instrument(skip(self, image))]
    pub fn recognize_whole(
        &self,
        image: &DynamicImage,
        hints: &RecognitionHints,
    ) -> Result<String, RegionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RegionError::Degenerate);
        }
        let image = DynamicImage::ImageRgb8(image.to_rgb8());
        extract::read_image(&image, &self.preprocessor, &self.recognizer, hints)
    }
}

/// Opens an image, reporting a missing or undecodable file as [`Error::InvalidInput`].
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(Error::InvalidInput(format!("{path:?} does not exist")));
    }
    image::open(path).map_err(|err| Error::InvalidInput(format!("failed to load {path:?}: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
