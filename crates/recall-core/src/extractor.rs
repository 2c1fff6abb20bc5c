//! Descriptor extractor contract.

use async_trait::async_trait;
use image::RgbImage;

use crate::error::Result;
use crate::types::Detection;

/// Finds faces in an image and computes one embedding per face.
///
/// Implementations must be idempotent and side-effect free. Detections are
/// ordered most prominent first (highest detector confidence). Calls made
/// before the underlying models finish loading fail with
/// [`Error::NotReady`](crate::Error::NotReady).
#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    async fn detect(&self, image: RgbImage) -> Result<Vec<Detection>>;
}
