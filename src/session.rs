use std::path::{Path, PathBuf};

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{Error, ExecutionProvider, Result};

/// TensorRT optimization profile for a single dynamic input.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
pub(crate) struct TensorRtProfile {
    pub min_shapes: String,
    pub opt_shapes: String,
    pub max_shapes: String,
}

#[derive(Debug)]
pub(crate) struct SessionOptions<'a> {
    pub num_threads: usize,
    pub execution_providers: &'a [ExecutionProvider],
    #[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
    pub cache_path: Option<PathBuf>,
    #[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
    pub tensorrt_profile: TensorRtProfile,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, profile: &TensorRtProfile) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(profile.min_shapes.clone())
        .with_profile_max_shapes(profile.max_shapes.clone())
        .with_profile_opt_shapes(profile.opt_shapes.clone())
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

/// Opens an ONNX Runtime session. Any failure to find or load the model is reported as
/// [`Error::ResourceUnavailable`].
#[instrument(level = "debug")]
pub(crate) fn open_session(path: &Path, options: SessionOptions<'_>) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::unavailable(path, "model file does not exist"));
    }

    #[cfg(feature = "directml")]
    let parallel = !options
        .execution_providers
        .contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let execution_providers = options.execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(setup_tensorrt(
                    options.cache_path.clone().unwrap_or_else(|| {
                        path.parent()
                            .unwrap_or_else(|| Path::new("."))
                            .join(".cache")
                    }),
                    &options.tensorrt_profile,
                )),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        },
    );

    let session = Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.with_memory_pattern(parallel))
        .and_then(|builder| builder.with_parallel_execution(parallel))
        .and_then(|builder| builder.with_inter_threads(options.num_threads))
        .and_then(|builder| builder.with_intra_threads(options.num_threads))
        .and_then(|builder| builder.with_execution_providers(execution_providers))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|err| Error::unavailable(path, err))?;

    log::debug!("Session inputs: {:?}", session.inputs);
    log::debug!("Session outputs: {:?}", session.outputs);

    Ok(session)
}
