//! GFPGAN face restorer via ONNX Runtime.
//!
//! Finds faces with SCRFD, aligns each one to the 512×512 FFHQ template,
//! runs the GFPGAN v1.4 (clean architecture) network on the crop, and
//! pastes the restored face back. The rest of the image is left alone;
//! the output has the same resolution as the input.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::{DetectorError, FaceDetector};
use crate::raster::{Raster, RasterError};
use crate::types::{self, BoundingBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const GFPGAN_MEAN: f32 = 0.5;
const GFPGAN_STD: f32 = 0.5;
/// Faces whose eyes are closer than this (in pixels) are too small to restore.
const MIN_EYE_DISTANCE: f32 = 5.0;
/// Width of the paste-back feather band, as a fraction of the crop size.
const FEATHER_FRACTION: f32 = 1.0 / 20.0;

#[derive(Error, Debug)]
pub enum RestorerError {
    #[error("model file not found: {0}; run `restorico fetch` to download weights")]
    ModelNotFound(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("raster: {0}")]
    Raster(#[from] RasterError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Fixed description of the restoration network the weights must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfpganParams {
    /// Side of the square aligned face crop the network consumes.
    pub face_size: usize,
    /// Upscale applied by the restorer itself. Always 1 here: resolution
    /// changes are the upscaler's job.
    pub upscale: u32,
    pub channel_multiplier: u32,
}

impl Default for GfpganParams {
    fn default() -> Self {
        Self {
            face_size: ALIGNED_SIZE,
            upscale: 1,
            channel_multiplier: 2,
        }
    }
}

/// Tunables for face selection.
#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    /// Restore only the face nearest the image centre.
    pub only_center_face: bool,
    pub min_eye_distance: f32,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            only_center_face: false,
            min_eye_distance: MIN_EYE_DISTANCE,
        }
    }
}

/// Detector + GFPGAN session pair.
pub struct OnnxFaceRestorer {
    detector: FaceDetector,
    session: Session,
    params: GfpganParams,
    options: RestoreOptions,
}

impl OnnxFaceRestorer {
    /// Load the GFPGAN ONNX model and pair it with a loaded detector.
    pub fn load(
        model_path: &Path,
        detector: FaceDetector,
        options: RestoreOptions,
        intra_threads: usize,
    ) -> Result<Self, RestorerError> {
        if !model_path.exists() {
            return Err(RestorerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let params = GfpganParams::default();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            face_size = params.face_size,
            "loaded GFPGAN model"
        );

        Ok(Self {
            detector,
            session,
            params,
            options,
        })
    }

    pub fn params(&self) -> GfpganParams {
        self.params
    }

    /// Detect faces that are eligible for restoration.
    pub fn faces(&mut self, image: &Raster) -> Result<Vec<BoundingBox>, RestorerError> {
        let faces = self.detector.detect(image)?;
        Ok(select_faces(faces, &self.options, image.width(), image.height()))
    }

    /// Restore every eligible face in `image`, returning a same-sized raster.
    pub fn restore_faces(&mut self, image: &Raster) -> Result<Raster, RestorerError> {
        let faces = self.faces(image)?;
        if faces.is_empty() {
            tracing::info!("no faces found; image passed through unchanged");
            return Ok(image.clone());
        }

        let feather = self.params.face_size as f32 * FEATHER_FRACTION;
        let mut output = image.clone();
        for (i, face) in faces.iter().enumerate() {
            let Some(landmarks) = face.landmarks.as_ref() else {
                continue;
            };
            let (crop, matrix) = alignment::align_face(image, landmarks);
            let restored = self.run_network(&crop)?;
            alignment::paste_face(&mut output, &restored, &matrix, feather);
            tracing::debug!(face = i, confidence = face.confidence, "face restored");
        }

        tracing::info!(faces = faces.len(), "face restoration complete");
        Ok(output)
    }

    /// Run GFPGAN on one aligned crop.
    fn run_network(&mut self, crop: &Raster) -> Result<Raster, RestorerError> {
        let input = preprocess(crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestorerError::InferenceFailed(format!("restored face extraction: {e}")))?;

        let size = self.params.face_size;
        let expected = [1, 3, size as i64, size as i64];
        if shape.len() != 4 || shape[..] != expected[..] {
            return Err(RestorerError::InferenceFailed(format!(
                "expected output shape {expected:?}, got {:?}",
                &shape[..]
            )));
        }

        Ok(postprocess(data, size, crop)?)
    }
}

/// Normalize an aligned crop to the GFPGAN input distribution ([-1, 1], RGB planes).
fn preprocess(crop: &Raster) -> Array4<f32> {
    crop.to_nchw_rgb(|v| (f32::from(v) / 255.0 - GFPGAN_MEAN) / GFPGAN_STD)
}

/// Map GFPGAN output in [-1, 1] back to bytes in the crop's channel order.
fn postprocess(data: &[f32], size: usize, crop: &Raster) -> Result<Raster, RasterError> {
    Raster::from_nchw_rgb(data, size, size, crop.order(), |v| {
        (v.clamp(-1.0, 1.0) * GFPGAN_STD + GFPGAN_MEAN) * 255.0
    })
}

/// Keep faces with landmarks and a usable eye distance; optionally only the
/// most central one.
fn select_faces(
    faces: Vec<BoundingBox>,
    options: &RestoreOptions,
    width: u32,
    height: u32,
) -> Vec<BoundingBox> {
    let eligible: Vec<BoundingBox> = faces
        .into_iter()
        .filter(|f| f.eye_distance().is_some_and(|d| d >= options.min_eye_distance))
        .collect();

    if options.only_center_face {
        types::most_central(&eligible, width, height)
            .cloned()
            .into_iter()
            .collect()
    } else {
        eligible
    }
}
