//! Real-ESRGAN x4plus upscaler via ONNX Runtime.
//!
//! The network is an RRDBNet backbone with a fixed 4x scale. Around it we
//! own the numerics the network expects: RGB planes in [0, 1], reflect
//! pre-padding on the bottom/right edges, optional tiling for large inputs,
//! and a final Lanczos resize when the requested scale differs from 4.

use crate::raster::{Raster, RasterError};
use image::imageops::FilterType;
use ndarray::{s, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_TILE_PAD: usize = 10;
pub const DEFAULT_PRE_PAD: usize = 10;
/// Side of the grey square used to probe the network at load time.
const PROBE_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum UpscalerError {
    #[error("model file not found: {0}; run `restorico fetch` to download weights")]
    ModelNotFound(String),
    #[error("model does not match the declared RRDBNet backbone: {0}")]
    ArchitectureMismatch(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("raster: {0}")]
    Raster(#[from] RasterError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// RRDBNet backbone description the Real-ESRGAN weights were trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrdbNetParams {
    pub num_in_ch: usize,
    pub num_out_ch: usize,
    pub num_feat: usize,
    pub num_block: usize,
    pub num_grow_ch: usize,
    pub scale: usize,
}

impl Default for RrdbNetParams {
    fn default() -> Self {
        Self {
            num_in_ch: 3,
            num_out_ch: 3,
            num_feat: 64,
            num_block: 23,
            num_grow_ch: 32,
            scale: 4,
        }
    }
}

/// Tiling and output scale settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpscaleOptions {
    /// Tile side in input pixels; 0 runs the whole image at once.
    pub tile: usize,
    /// Context added around each tile, discarded after inference.
    pub tile_pad: usize,
    /// Reflect padding added to the bottom/right edges before inference.
    pub pre_pad: usize,
    /// Final scale relative to the input.
    pub outscale: f32,
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            tile: 0,
            tile_pad: DEFAULT_TILE_PAD,
            pre_pad: DEFAULT_PRE_PAD,
            outscale: 4.0,
        }
    }
}

impl UpscaleOptions {
    /// Output dimensions for a `width × height` input.
    pub fn output_size(&self, native_scale: usize, width: u32, height: u32) -> (u32, u32) {
        if (self.outscale - native_scale as f32).abs() < f32::EPSILON {
            let s = native_scale as u32;
            return (width * s, height * s);
        }
        (
            (width as f32 * self.outscale).round().max(1.0) as u32,
            (height as f32 * self.outscale).round().max(1.0) as u32,
        )
    }
}

/// ONNX-backed Real-ESRGAN upscaler.
pub struct OnnxUpscaler {
    session: Session,
    params: RrdbNetParams,
    options: UpscaleOptions,
}

impl OnnxUpscaler {
    /// Load the Real-ESRGAN ONNX model and validate it against `params`.
    pub fn load(
        model_path: &Path,
        params: RrdbNetParams,
        options: UpscaleOptions,
        intra_threads: usize,
    ) -> Result<Self, UpscalerError> {
        if !model_path.exists() {
            return Err(UpscalerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            num_feat = params.num_feat,
            num_block = params.num_block,
            num_grow_ch = params.num_grow_ch,
            scale = params.scale,
            "loaded Real-ESRGAN model"
        );

        let mut upscaler = Self {
            session,
            params,
            options,
        };
        upscaler.probe()?;
        Ok(upscaler)
    }

    pub fn params(&self) -> RrdbNetParams {
        self.params
    }

    pub fn options(&self) -> UpscaleOptions {
        self.options
    }

    /// Run a tiny grey image through the network and check the output
    /// geometry against the declared backbone.
    fn probe(&mut self) -> Result<(), UpscalerError> {
        let input = Array4::<f32>::from_elem((1, self.params.num_in_ch, PROBE_SIZE, PROBE_SIZE), 0.5);
        let output = self.infer(input)?;
        let expected = [
            1,
            self.params.num_out_ch,
            PROBE_SIZE * self.params.scale,
            PROBE_SIZE * self.params.scale,
        ];
        if output.shape() != expected {
            return Err(UpscalerError::ArchitectureMismatch(format!(
                "probe {PROBE_SIZE}x{PROBE_SIZE} produced {:?}, expected {expected:?}",
                output.shape()
            )));
        }
        tracing::debug!(shape = ?output.shape(), "Real-ESRGAN probe passed");
        Ok(())
    }

    /// Run the raw network on one NCHW tensor.
    fn infer(&mut self, input: Array4<f32>) -> Result<Array4<f32>, UpscalerError> {
        let input = input.as_standard_layout().into_owned();
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| UpscalerError::InferenceFailed(format!("upscaled tensor extraction: {e}")))?;

        if shape.len() != 4 {
            return Err(UpscalerError::InferenceFailed(format!(
                "expected 4D output, got {}D",
                shape.len()
            )));
        }
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data.to_vec())
            .map_err(|e| UpscalerError::InferenceFailed(format!("output shape: {e}")))
    }

    /// Upscale a raster, preserving its channel order.
    pub fn upscale_raster(&mut self, image: &Raster) -> Result<Raster, UpscalerError> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let scale = self.params.scale;
        let options = self.options;

        let input = image.to_nchw_rgb(|v| f32::from(v) / 255.0);
        let padded = pad_reflect(&input, options.pre_pad, mod_pad(scale, width, height, options.pre_pad));

        let output = if options.tile > 0 {
            tile_process(&padded, scale, options.tile, options.tile_pad, |t| self.infer(t))?
        } else {
            self.infer(padded)?
        };

        let (out_h, out_w) = (height * scale, width * scale);
        if output.shape()[2] < out_h || output.shape()[3] < out_w {
            return Err(UpscalerError::InferenceFailed(format!(
                "network returned {:?}, smaller than {out_h}x{out_w}",
                output.shape()
            )));
        }
        let cropped = output
            .slice(s![.., .., ..out_h, ..out_w])
            .as_standard_layout()
            .into_owned();
        let planes = cropped.as_slice().unwrap_or_default();
        let upscaled = Raster::from_nchw_rgb(planes, out_h, out_w, image.order(), |v| v * 255.0)?;

        let (target_w, target_h) = options.output_size(scale, image.width(), image.height());
        if (target_w, target_h) == (upscaled.width(), upscaled.height()) {
            tracing::info!(width = target_w, height = target_h, "upscale complete");
            return Ok(upscaled);
        }

        tracing::info!(
            width = target_w,
            height = target_h,
            outscale = options.outscale,
            "resizing to requested scale"
        );
        Ok(resize_lanczos(&upscaled, target_w, target_h))
    }
}

/// Extra bottom/right padding needed so the padded input is a multiple of
/// the network's downsampling factor. Only the x2 and x1 variants need it.
fn mod_pad(scale: usize, width: usize, height: usize, pre_pad: usize) -> (usize, usize) {
    let modulus = match scale {
        2 => 2,
        1 => 4,
        _ => return (0, 0),
    };
    let (h, w) = (height + pre_pad, width + pre_pad);
    ((modulus - h % modulus) % modulus, (modulus - w % modulus) % modulus)
}

/// Mirror an index into `0..n` without repeating the edge sample.
fn reflect_index(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Reflect-pad the bottom and right edges by `pre_pad` plus the extra
/// `(pad_h, pad_w)` alignment padding.
fn pad_reflect(input: &Array4<f32>, pre_pad: usize, (pad_h, pad_w): (usize, usize)) -> Array4<f32> {
    let (n, c, h, w) = input.dim();
    let (new_h, new_w) = (h + pre_pad + pad_h, w + pre_pad + pad_w);
    if (new_h, new_w) == (h, w) {
        return input.clone();
    }
    Array4::from_shape_fn((n, c, new_h, new_w), |(b, ch, y, x)| {
        input[[b, ch, reflect_index(y as isize, h), reflect_index(x as isize, w)]]
    })
}

/// Run `infer` over overlapping tiles and stitch the valid regions.
///
/// Each tile covers `tile × tile` input pixels plus `tile_pad` context on
/// every side where the image allows; only the non-context part of the
/// result is written to the output.
fn tile_process<E>(
    input: &Array4<f32>,
    scale: usize,
    tile: usize,
    tile_pad: usize,
    mut infer: impl FnMut(Array4<f32>) -> Result<Array4<f32>, E>,
) -> Result<Array4<f32>, E> {
    let (batch, channels, height, width) = input.dim();
    let mut output = Array4::<f32>::zeros((batch, channels, height * scale, width * scale));

    let tiles_x = width.div_ceil(tile);
    let tiles_y = height.div_ceil(tile);
    tracing::debug!(tiles_x, tiles_y, tile, tile_pad, "starting tiled upscale");

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let in_x0 = tx * tile;
            let in_y0 = ty * tile;
            let in_x1 = (in_x0 + tile).min(width);
            let in_y1 = (in_y0 + tile).min(height);

            let pad_x0 = in_x0.saturating_sub(tile_pad);
            let pad_y0 = in_y0.saturating_sub(tile_pad);
            let pad_x1 = (in_x1 + tile_pad).min(width);
            let pad_y1 = (in_y1 + tile_pad).min(height);

            let tile_input = input
                .slice(s![.., .., pad_y0..pad_y1, pad_x0..pad_x1])
                .as_standard_layout()
                .into_owned();
            let tile_output = infer(tile_input)?;

            let crop_x0 = (in_x0 - pad_x0) * scale;
            let crop_y0 = (in_y0 - pad_y0) * scale;
            let out_w = (in_x1 - in_x0) * scale;
            let out_h = (in_y1 - in_y0) * scale;

            output
                .slice_mut(s![
                    ..,
                    ..,
                    in_y0 * scale..in_y1 * scale,
                    in_x0 * scale..in_x1 * scale
                ])
                .assign(&tile_output.slice(s![
                    ..,
                    ..,
                    crop_y0..crop_y0 + out_h,
                    crop_x0..crop_x0 + out_w
                ]));
        }
    }

    Ok(output)
}

/// Lanczos3 resize, keeping the raster's channel order.
fn resize_lanczos(image: &Raster, width: u32, height: u32) -> Raster {
    let order = image.order();
    let rgb = image.clone().into_rgb_image();
    let resized = image::imageops::resize(&rgb, width, height, FilterType::Lanczos3);
    Raster::from_rgb_image(&resized).into_order(order)
}
