//! Upload decoding and PNG export.

use image::RgbImage;
use std::path::{Path, PathBuf};

/// Extensions offered by the upload dialog.
pub const UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
/// Suggested file name for the download dialog.
pub const DEFAULT_OUTPUT_NAME: &str = "restored.png";

/// Decode an uploaded file to 8-bit RGB.
pub async fn load_image(path: PathBuf) -> anyhow::Result<RgbImage> {
    let decoded = tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|e| anyhow::anyhow!("failed to decode {}: {e}", path.display()))
    })
    .await??;
    tracing::info!(width = decoded.width(), height = decoded.height(), "upload decoded");
    Ok(decoded)
}

/// Write `image` as PNG to `path`, adding a `.png` extension if missing.
pub async fn save_png(path: PathBuf, image: std::sync::Arc<RgbImage>) -> anyhow::Result<PathBuf> {
    let path = with_png_extension(path);
    let target = path.clone();
    tokio::task::spawn_blocking(move || {
        image
            .save_with_format(&target, image::ImageFormat::Png)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", target.display()))
    })
    .await??;
    tracing::info!(path = %path.display(), "restored image saved");
    Ok(path)
}

fn with_png_extension(path: PathBuf) -> PathBuf {
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_png {
        path
    } else {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".png");
        path.with_file_name(name)
    }
}

/// RGBA pixels for display.
pub fn to_rgba(image: &RgbImage) -> Vec<u8> {
    image.pixels().flat_map(|p| [p[0], p[1], p[2], 255]).collect()
}

pub fn is_upload(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| UPLOAD_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_png_extension() {
        assert_eq!(with_png_extension("a/out.png".into()), PathBuf::from("a/out.png"));
        assert_eq!(with_png_extension("a/OUT.PNG".into()), PathBuf::from("a/OUT.PNG"));
        assert_eq!(with_png_extension("a/out".into()), PathBuf::from("a/out.png"));
        assert_eq!(with_png_extension("a/out.jpg".into()), PathBuf::from("a/out.jpg.png"));
    }

    #[test]
    fn test_is_upload() {
        assert!(is_upload(Path::new("photo.JPG")));
        assert!(is_upload(Path::new("photo.jpeg")));
        assert!(is_upload(Path::new("photo.png")));
        assert!(!is_upload(Path::new("photo.gif")));
        assert!(!is_upload(Path::new("photo")));
    }

    #[test]
    fn test_to_rgba() {
        let img = RgbImage::from_pixel(2, 1, image::Rgb([1, 2, 3]));
        assert_eq!(to_rgba(&img), vec![1, 2, 3, 255, 1, 2, 3, 255]);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8 * 60, y as u8 * 80, 200]));

        let saved = save_png(dir.path().join("restored"), Arc::new(img.clone()))
            .await
            .unwrap();
        assert_eq!(saved, dir.path().join("restored.png"));

        let loaded = load_image(saved).await.unwrap();
        assert_eq!(loaded, img);
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(load_image(path).await.is_err());
    }
}
