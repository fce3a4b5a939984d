//! Weight manifest.
//!
//! Lists the weight files to provision and where to fetch them from. A
//! default manifest is embedded at compile time from `contrib/models.toml`;
//! a user file can replace it.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Compile-time embedded default manifest.
const DEFAULT_MANIFEST: &str = include_str!("../../../contrib/models.toml");

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bad manifest TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid weight file name {0:?}: must be a plain file name")]
    InvalidName(String),
    #[error("invalid sha256 for {name}: expected 64 hex digits")]
    InvalidDigest { name: String },
}

/// One weight file and its remote location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WeightSource {
    /// Local file name inside the model directory.
    pub name: String,
    pub url: String,
    /// Expected SHA-256 of the file, lowercase hex. Unpinned if absent.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Top-level manifest structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "model", default)]
    pub models: Vec<WeightSource>,
}

impl Manifest {
    /// Parse and validate a manifest from TOML text.
    pub fn parse(src: &str) -> Result<Self, ManifestError> {
        let mut manifest: Manifest = toml::from_str(src)?;
        for model in &mut manifest.models {
            validate_name(&model.name)?;
            if let Some(digest) = model.sha256.as_mut() {
                *digest = digest.trim().to_ascii_lowercase();
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ManifestError::InvalidDigest { name: model.name.clone() });
                }
            }
        }
        Ok(manifest)
    }

    /// The manifest shipped with the binary.
    pub fn builtin() -> Result<Self, ManifestError> {
        Self::parse(DEFAULT_MANIFEST)
    }

    /// Load from `path` if given, otherwise the built-in manifest.
    pub fn load(path: Option<&Path>) -> Result<Self, ManifestError> {
        match path {
            Some(path) => {
                let src = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "using manifest override");
                Self::parse(&src)
            }
            None => Self::builtin(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&WeightSource> {
        self.models.iter().find(|m| m.name == name)
    }
}

/// Reject names that would escape the model directory.
fn validate_name(name: &str) -> Result<(), ManifestError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if plain {
        Ok(())
    } else {
        Err(ManifestError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_manifest_lists_all_weights() {
        let manifest = Manifest::builtin().unwrap();
        let names: Vec<&str> = manifest.models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["GFPGANv1.4.onnx", "RealESRGAN_x4plus.onnx", "det_10g.onnx"]);
        assert!(manifest.models.iter().all(|m| m.url.starts_with("https://")));
    }

    #[test]
    fn test_parse_with_digest() {
        let src = r#"
            [[model]]
            name = "a.onnx"
            url = "https://example.com/a.onnx"
            sha256 = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        "#;
        let manifest = Manifest::parse(src).unwrap();
        let a = manifest.get("a.onnx").unwrap();
        assert_eq!(
            a.sha256.as_deref(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        let src = r#"
            [[model]]
            name = "../evil.onnx"
            url = "https://example.com/x"
        "#;
        assert!(matches!(Manifest::parse(src), Err(ManifestError::InvalidName(_))));
    }

    #[test]
    fn test_parse_rejects_short_digest() {
        let src = r#"
            [[model]]
            name = "a.onnx"
            url = "https://example.com/a.onnx"
            sha256 = "abc123"
        "#;
        assert!(matches!(Manifest::parse(src), Err(ManifestError::InvalidDigest { .. })));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = Manifest::parse("").unwrap();
        assert!(manifest.models.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Some(Path::new("/nonexistent/models.toml"))).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }
}
