//! restorico-core — Photo restoration engine.
//!
//! Restores faces with GFPGAN (located by SCRFD and aligned to the FFHQ
//! template) and upscales the result 4x with Real-ESRGAN, all running via
//! ONNX Runtime for CPU inference.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod host;
pub mod pipeline;
pub mod raster;
pub mod restorer;
pub mod types;
pub mod upscaler;

pub use config::{default_model_dir, Config};
pub use detector::FaceDetector;
pub use host::{load_pipeline, load_restorer, HostError, OnnxPipeline};
pub use pipeline::{FaceRestore, Pipeline, PipelineError, Upscale};
pub use raster::{ChannelOrder, Raster};
pub use restorer::OnnxFaceRestorer;
pub use types::BoundingBox;
pub use upscaler::OnnxUpscaler;
