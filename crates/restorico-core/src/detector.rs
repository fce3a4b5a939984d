//! SCRFD face detector via ONNX Runtime.
//!
//! Locates faces and their five landmarks so the restorer can align them
//! to the restoration template. The input is letterboxed to a square,
//! each stride head is decoded against its anchor grid, and overlapping
//! boxes are merged with NMS.

use crate::raster::Raster;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::{Session, SessionOutputs};
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; run `restorico fetch` to download weights")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the source image inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
}

impl Letterbox {
    /// Fit `src_w × src_h` into a `size × size` square, centred.
    fn fit(src_w: u32, src_h: u32, size: u32) -> Self {
        let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
        let width = ((src_w as f32 * scale).round() as u32).clamp(1, size);
        let height = ((src_h as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            width,
            height,
            offset_x: (size - width) / 2,
            offset_y: (size - height) / 2,
        }
    }

    /// Map a point in network-input space back to source-image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Output slots of one stride's heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw head outputs of one stride.
struct StrideOutput<'a> {
    stride: u32,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideHeads; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < STRIDES.len() * 3 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs score/bbox/kps heads for 3 strides, model has {} outputs",
                output_names.len()
            )));
        }

        let heads = map_heads(&output_names);
        tracing::debug!(?heads, "SCRFD head mapping");

        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first. Coordinates are in source pixels.
    pub fn detect(&mut self, image: &Raster) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox_tensor(image, INPUT_SIZE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, heads) in STRIDES.iter().zip(self.heads) {
            let output = StrideOutput {
                stride,
                scores: extract(&outputs, heads.score, "score", stride)?,
                bboxes: extract(&outputs, heads.bbox, "bbox", stride)?,
                kps: extract(&outputs, heads.kps, "kps", stride)?,
            };
            candidates.extend(decode_stride(&output, INPUT_SIZE, &letterbox, SCORE_THRESHOLD));
        }

        let faces = nms(candidates, NMS_IOU);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

fn extract<'a>(
    outputs: &'a SessionOutputs<'_>,
    index: usize,
    head: &str,
    stride: u32,
) -> Result<&'a [f32], DetectorError> {
    outputs[index]
        .try_extract_tensor::<f32>()
        .map(|(_, data)| data)
        .map_err(|e| DetectorError::InferenceFailed(format!("{head} head, stride {stride}: {e}")))
}

/// Build the normalized RGB NCHW input. Padding is left at zero, which is
/// the normalized value of the mean pixel.
fn letterbox_tensor(image: &Raster, size: u32) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), size);
    let rgb = image.clone().into_rgb_image();
    let resized = imageops::resize(&rgb, letterbox.width, letterbox.height, FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, px) in resized.enumerate_pixels() {
        let tx = (x + letterbox.offset_x) as usize;
        let ty = (y + letterbox.offset_y) as usize;
        for (c, &v) in px.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (v as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

/// Map output tensors to stride heads.
///
/// Exports that name their heads `score_8`, `bbox_16`, ... are matched by
/// name. Anything else is assumed to follow the reference export order:
/// three score heads, then three bbox heads, then three keypoint heads.
fn map_heads(names: &[String]) -> [StrideHeads; 3] {
    let slot = |head: &str, stride: u32| names.iter().position(|n| *n == format!("{head}_{stride}"));
    let named = |stride: u32| {
        Some(StrideHeads {
            score: slot("score", stride)?,
            bbox: slot("bbox", stride)?,
            kps: slot("kps", stride)?,
        })
    };

    if let [Some(a), Some(b), Some(c)] = STRIDES.map(named) {
        return [a, b, c];
    }

    tracing::info!(?names, "SCRFD head names not recognized, using export order");
    [0, 1, 2].map(|i| StrideHeads {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Decode one stride's anchors into boxes in source-image coordinates.
///
/// Anchors sit at the top-left of each grid cell, `ANCHORS_PER_CELL` per
/// cell. Box and keypoint offsets are in units of the stride.
fn decode_stride(
    output: &StrideOutput<'_>,
    input_size: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = (input_size / output.stride) as usize;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = output.stride as f32;

    output
        .scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let bbox = output.bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - bbox[0] * step, ay - bbox[1] * step);
            let (x2, y2) = letterbox.unmap(ax + bbox[2] * step, ay + bbox[3] * step);

            let landmarks = output.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
                let mut points = [(0.0f32, 0.0f32); 5];
                for (point, xy) in points.iter_mut().zip(kps.chunks_exact(2)) {
                    *point = letterbox.unmap(ax + xy[0] * step, ay + xy[1] * step);
                }
                points
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; the result is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ChannelOrder;

    fn boxed(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: size, height: size, confidence, landmarks: None }
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping() {
        let faces = nms(
            vec![
                boxed(5.0, 5.0, 100.0, 0.8),
                boxed(200.0, 200.0, 50.0, 0.7),
                boxed(0.0, 0.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = faces.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, [0.9f32, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_fit_wide_image() {
        let lb = Letterbox::fit(1280, 640, 640);
        assert_eq!((lb.width, lb.height), (640, 320));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 160));
        assert_eq!(lb.unmap(320.0, 160.0), (640.0, 0.0));
    }

    #[test]
    fn test_decode_stride_maps_back_through_letterbox() {
        // One confident anchor at grid cell (1, 1) of stride 32 on a 64x64 input.
        let grid = 2;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let hit = (grid + 1) * ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        scores[hit] = 0.9;
        let mut bboxes = vec![0.0f32; anchors * 4];
        bboxes[hit * 4..hit * 4 + 4].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let kps = vec![0.0f32; anchors * 10];

        let output = StrideOutput { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let letterbox = Letterbox { scale: 2.0, width: 64, height: 48, offset_x: 0, offset_y: 8 };
        let faces = decode_stride(&output, 64, &letterbox, 0.5);

        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        // Letterboxed box is (16,16)-(48,48); undo offset_y=8 and scale=2.
        assert!((face.x - 8.0).abs() < 1e-4, "x = {}", face.x);
        assert!((face.y - 4.0).abs() < 1e-4, "y = {}", face.y);
        assert!((face.width - 16.0).abs() < 1e-4);
        let landmarks = face.landmarks.unwrap();
        assert!((landmarks[0].0 - 16.0).abs() < 1e-4);
        assert!((landmarks[0].1 - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_respects_threshold() {
        let scores = vec![0.5f32; 8];
        let bboxes = vec![1.0f32; 32];
        let kps = vec![0.0f32; 80];
        let output = StrideOutput { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let letterbox = Letterbox::fit(64, 64, 64);
        assert!(decode_stride(&output, 64, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_map_heads_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let heads = map_heads(&names);
        assert_eq!(heads[0], StrideHeads { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], StrideHeads { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_heads_export_order() {
        let names: Vec<String> = (0..9).map(|i: usize| format!("out{i}")).collect();
        let heads = map_heads(&names);
        assert_eq!(heads[1], StrideHeads { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_letterbox_tensor_pads_with_zero() {
        let image = Raster::filled(64, 32, ChannelOrder::Bgr, [255, 0, 0]);
        let (tensor, lb) = letterbox_tensor(&image, 64);

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.offset_y, 16);
        // Padding rows are the normalized mean.
        assert_eq!(tensor[[0, 0, 0, 10]], 0.0);
        // Image rows carry red in plane 0 regardless of the raster's storage order.
        let red = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 32, 10]] - red).abs() < 0.02);
        assert!((tensor[[0, 2, 32, 10]] + PIXEL_MEAN / PIXEL_STD).abs() < 0.02);
    }
}
