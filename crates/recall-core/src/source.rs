//! Frame sources: live cameras and still images.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;

use crate::error::{Error, Result};

/// Produces the current frame for a recognition attempt.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<RgbImage>;
}

/// Decode an image file to RGB on the blocking pool.
pub async fn load_rgb(path: impl AsRef<Path>) -> Result<RgbImage> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<RgbImage> {
        if !path.is_file() {
            return Err(Error::Validation(format!(
                "image not found: {}",
                path.display()
            )));
        }
        Ok(image::open(&path)?.to_rgb8())
    })
    .await
    .map_err(|e| Error::Extraction(format!("image loader task failed: {e}")))?
}

/// Frame source that replays a still image, for probing without a camera.
pub struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FrameSource for ImageFile {
    async fn capture(&self) -> Result<RgbImage> {
        load_rgb(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_validation_error() {
        let err = load_rgb("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_image_file_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.png");
        RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let frame = ImageFile::new(&path).capture().await.unwrap();
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
