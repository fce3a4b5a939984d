//! Model host: one-time construction of the inference pipeline.
//!
//! Loading is fail-fast. Every caller builds its pipeline explicitly from
//! a [`Config`] and owns it for the life of the process.

use crate::config::Config;
use crate::detector::{DetectorError, FaceDetector};
use crate::pipeline::Pipeline;
use crate::restorer::{OnnxFaceRestorer, RestorerError};
use crate::upscaler::{OnnxUpscaler, RrdbNetParams, UpscalerError};
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline backed by the ONNX restorer and upscaler.
pub type OnnxPipeline = Pipeline<OnnxFaceRestorer, OnnxUpscaler>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("missing weight files: {}; run `restorico fetch` first", display_paths(.0))]
    MissingWeights(Vec<PathBuf>),
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("face restorer: {0}")]
    Restorer(#[from] RestorerError),
    #[error("upscaler: {0}")]
    Upscaler(#[from] UpscalerError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Weight paths the host needs, in load order.
pub fn required_weights(config: &Config) -> [PathBuf; 3] {
    [
        config.detection_model_path(),
        config.restoration_model_path(),
        config.upscale_model_path(),
    ]
}

/// Load the detector and face restorer only.
pub fn load_restorer(config: &Config) -> Result<OnnxFaceRestorer, HostError> {
    check_present(&required_weights(config)[..2])?;

    let detector = FaceDetector::load(&config.detection_model_path(), config.intra_threads)?;
    tracing::info!(path = %config.detection_model_path().display(), "SCRFD detector loaded");

    let restorer = OnnxFaceRestorer::load(
        &config.restoration_model_path(),
        detector,
        config.restore_options(),
        config.intra_threads,
    )?;
    tracing::info!(path = %config.restoration_model_path().display(), "GFPGAN restorer loaded");
    Ok(restorer)
}

/// Load all models and assemble the pipeline.
pub fn load_pipeline(config: &Config) -> Result<OnnxPipeline, HostError> {
    check_present(&required_weights(config))?;

    let restorer = load_restorer(config)?;
    let upscaler = OnnxUpscaler::load(
        &config.upscale_model_path(),
        RrdbNetParams::default(),
        config.upscale_options(),
        config.intra_threads,
    )?;
    tracing::info!(path = %config.upscale_model_path().display(), "Real-ESRGAN upscaler loaded");

    Ok(Pipeline::new(restorer, upscaler))
}

fn check_present(paths: &[PathBuf]) -> Result<(), HostError> {
    let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.exists()).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HostError::MissingWeights(missing))
    }
}
