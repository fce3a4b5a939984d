//! Restore-then-upscale pipeline.
//!
//! upload (RGB) → BGR → face restoration → upscaling → RGB.
//!
//! Both model stages sit behind traits so the pipeline can be driven by
//! the ONNX implementations or by test doubles.

use crate::raster::{ChannelOrder, Raster};
use crate::restorer::{OnnxFaceRestorer, RestorerError};
use crate::upscaler::{OnnxUpscaler, UpscalerError};
use image::RgbImage;
use std::time::Instant;
use thiserror::Error;

/// Channel order the model stages exchange rasters in.
pub const WORKING_ORDER: ChannelOrder = ChannelOrder::Bgr;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face restoration: {0}")]
    Restore(#[from] RestorerError),
    #[error("upscaling: {0}")]
    Upscale(#[from] UpscalerError),
    #[error("upscaler returned {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    UnexpectedSize {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
}

/// Face restoration stage: same-resolution in, same-resolution out.
pub trait FaceRestore {
    fn restore(&mut self, image: &Raster) -> Result<Raster, PipelineError>;
}

/// Super-resolution stage.
pub trait Upscale {
    fn upscale(&mut self, image: &Raster) -> Result<Raster, PipelineError>;

    /// Output dimensions this stage produces for a `width × height` input.
    fn output_size(&self, width: u32, height: u32) -> (u32, u32);
}

impl FaceRestore for OnnxFaceRestorer {
    fn restore(&mut self, image: &Raster) -> Result<Raster, PipelineError> {
        Ok(self.restore_faces(image)?)
    }
}

impl Upscale for OnnxUpscaler {
    fn upscale(&mut self, image: &Raster) -> Result<Raster, PipelineError> {
        Ok(self.upscale_raster(image)?)
    }

    fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.options().output_size(self.params().scale, width, height)
    }
}

/// The two model stages, constructed once and reused for every request.
pub struct Pipeline<R, U> {
    restorer: R,
    upscaler: U,
}

impl<R: FaceRestore, U: Upscale> Pipeline<R, U> {
    pub fn new(restorer: R, upscaler: U) -> Self {
        Self { restorer, upscaler }
    }

    pub fn restorer_mut(&mut self) -> &mut R {
        &mut self.restorer
    }

    /// Output dimensions for a `width × height` upload.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.upscaler.output_size(width, height)
    }

    /// Run one upload through restoration and upscaling.
    pub fn run(&mut self, image: &RgbImage) -> Result<RgbImage, PipelineError> {
        let started = Instant::now();
        let (width, height) = image.dimensions();
        tracing::info!(width, height, "pipeline started");

        let working = Raster::from_rgb_image(image).into_order(WORKING_ORDER);

        let restored = self.restorer.restore(&working)?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "restoration stage done");

        let upscaled = self.upscaler.upscale(&restored)?;

        let (expected_w, expected_h) = self.upscaler.output_size(width, height);
        if (upscaled.width(), upscaled.height()) != (expected_w, expected_h) {
            return Err(PipelineError::UnexpectedSize {
                expected_w,
                expected_h,
                actual_w: upscaled.width(),
                actual_h: upscaled.height(),
            });
        }

        let output = upscaled.into_order(ChannelOrder::Rgb).into_rgb_image();
        tracing::info!(
            width = output.width(),
            height = output.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity restorer that records the channel order it was handed.
    struct IdentityRestore {
        seen: Vec<ChannelOrder>,
    }

    impl FaceRestore for IdentityRestore {
        fn restore(&mut self, image: &Raster) -> Result<Raster, PipelineError> {
            self.seen.push(image.order());
            Ok(image.clone())
        }
    }

    /// Nearest-neighbour upscaler by an integer factor.
    struct NearestUpscale {
        factor: u32,
    }

    impl Upscale for NearestUpscale {
        fn upscale(&mut self, image: &Raster) -> Result<Raster, PipelineError> {
            let f = self.factor;
            let (w, h) = (image.width() * f, image.height() * f);
            let mut out = Raster::filled(w, h, image.order(), [0, 0, 0]);
            for y in 0..h {
                for x in 0..w {
                    out.put_rgb(x, y, image.rgb_at(x / f, y / f));
                }
            }
            Ok(out)
        }

        fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
            (width * self.factor, height * self.factor)
        }
    }

    /// Upscaler that lies about its output size.
    struct ShortUpscale;

    impl Upscale for ShortUpscale {
        fn upscale(&mut self, image: &Raster) -> Result<Raster, PipelineError> {
            Ok(image.clone())
        }

        fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
            (width * 4, height * 4)
        }
    }

    fn synthetic(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 32) as u8, (y * 32) as u8, ((x * 7 + y * 13) % 256) as u8])
        })
    }

    fn pipeline() -> Pipeline<IdentityRestore, NearestUpscale> {
        Pipeline::new(IdentityRestore { seen: Vec::new() }, NearestUpscale { factor: 4 })
    }

    #[test]
    fn test_smoke_8x8_gives_nearest_32x32() {
        let input = synthetic(8, 8);
        let output = pipeline().run(&input).unwrap();

        assert_eq!(output.dimensions(), (32, 32));
        for (x, y, px) in output.enumerate_pixels() {
            assert_eq!(px, input.get_pixel(x / 4, y / 4), "pixel ({x}, {y})");
        }
    }

    #[test]
    fn test_output_is_four_times_input() {
        let mut p = pipeline();
        for (w, h) in [(1, 1), (3, 5), (17, 9)] {
            let output = p.run(&synthetic(w, h)).unwrap();
            assert_eq!(output.dimensions(), (4 * w, 4 * h));
        }
    }

    #[test]
    fn test_models_see_working_order() {
        let mut p = pipeline();
        p.run(&synthetic(2, 2)).unwrap();
        assert_eq!(p.restorer_mut().seen, vec![ChannelOrder::Bgr]);
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let mut p = Pipeline::new(IdentityRestore { seen: Vec::new() }, ShortUpscale);
        let err = p.run(&synthetic(3, 3)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnexpectedSize { expected_w: 12, expected_h: 12, actual_w: 3, actual_h: 3 }
        ));
    }
}
