use crate::restorer::RestoreOptions;
use crate::upscaler::{UpscaleOptions, DEFAULT_PRE_PAD, DEFAULT_TILE_PAD};
use std::path::PathBuf;
use std::str::FromStr;

/// Weight file for GFPGAN v1.4 (clean architecture).
pub const RESTORATION_MODEL: &str = "GFPGANv1.4.onnx";
/// Weight file for Real-ESRGAN x4plus.
pub const UPSCALE_MODEL: &str = "RealESRGAN_x4plus.onnx";
/// Weight file for the SCRFD face detector.
pub const DETECTION_MODEL: &str = "det_10g.onnx";

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX weight files.
    pub model_dir: PathBuf,
    /// Optional TOML manifest overriding the built-in weight sources.
    pub manifest_path: Option<PathBuf>,
    /// Upscaler tile size in input pixels (0 = whole image).
    pub tile: usize,
    pub tile_pad: usize,
    pub pre_pad: usize,
    /// Final output scale relative to the upload.
    pub outscale: f32,
    /// Restore only the face closest to the image centre.
    pub only_center_face: bool,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `RESTORICO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = lookup("RESTORICO_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_model_dir_from(&lookup));

        Self {
            model_dir,
            manifest_path: lookup("RESTORICO_MANIFEST").map(PathBuf::from),
            tile: parsed(&lookup, "RESTORICO_TILE").unwrap_or(0),
            tile_pad: parsed(&lookup, "RESTORICO_TILE_PAD").unwrap_or(DEFAULT_TILE_PAD),
            pre_pad: parsed(&lookup, "RESTORICO_PRE_PAD").unwrap_or(DEFAULT_PRE_PAD),
            outscale: parsed(&lookup, "RESTORICO_OUTSCALE")
                .filter(|v: &f32| *v > 0.0)
                .unwrap_or(4.0),
            only_center_face: lookup("RESTORICO_ONLY_CENTER_FACE")
                .map(|v| v != "0")
                .unwrap_or(false),
            intra_threads: parsed(&lookup, "RESTORICO_INTRA_THREADS")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(2),
        }
    }

    pub fn restoration_model_path(&self) -> PathBuf {
        self.model_dir.join(RESTORATION_MODEL)
    }

    pub fn upscale_model_path(&self) -> PathBuf {
        self.model_dir.join(UPSCALE_MODEL)
    }

    pub fn detection_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTION_MODEL)
    }

    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            only_center_face: self.only_center_face,
            ..RestoreOptions::default()
        }
    }

    pub fn upscale_options(&self) -> UpscaleOptions {
        UpscaleOptions {
            tile: self.tile,
            tile_pad: self.tile_pad,
            pre_pad: self.pre_pad,
            outscale: self.outscale,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Default weight directory: `$XDG_DATA_HOME/restorico/models`.
pub fn default_model_dir() -> PathBuf {
    default_model_dir_from(&|key: &str| std::env::var(key).ok())
}

fn default_model_dir_from(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("restorico")
        .join("models")
}
