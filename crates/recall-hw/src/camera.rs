//! V4L2 camera capture via the `v4l` crate.

use crate::frame;
use image::RgbImage;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use async_trait::async_trait;
use recall_core::FrameSource;

/// Dark frames tolerated per capture before the last one is returned anyway.
const MAX_DARK_RETRIES: usize = 3;
const DARK_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera found")]
    NoCameraFound,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

impl From<CameraError> for recall_core::Error {
    fn from(err: CameraError) -> Self {
        recall_core::Error::Camera(err.to_string())
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpeg,
    /// 8-bit grayscale, replicated into RGB.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(Self::Mjpeg)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else {
            None
        }
    }
}

/// V4L2 camera handle. Streaming is started and stopped explicitly so that
/// repeated captures reuse one mmap stream.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    warmup_frames: usize,
    stream: Option<MmapStream<'static>>,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, warmup_frames: usize) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        // Ask for 640x480 YUYV; MJPG and GREY are accepted if the driver insists.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            warmup_frames,
            stream: None,
        })
    }

    /// Open `device_path`, or the first capture device when none is given.
    pub fn open_default(device_path: Option<&str>, warmup_frames: usize) -> Result<Self, CameraError> {
        match device_path {
            Some(path) => Self::open(path, warmup_frames),
            None => {
                let first = list_devices()
                    .into_iter()
                    .next()
                    .ok_or(CameraError::NoCameraFound)?;
                Self::open(&first.path, warmup_frames)
            }
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Start streaming and discard the warmup frames.
    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.stream.is_some() {
            tracing::warn!(device = %self.device_path, "camera already streaming");
            return Ok(());
        }

        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..self.warmup_frames {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue warmup buffer: {e}"))
            })?;
        }
        tracing::debug!(warmup = self.warmup_frames, "camera streaming");

        self.stream = Some(stream);
        Ok(())
    }

    /// Stop streaming and release the buffers. No-op when already stopped.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(device = %self.device_path, "camera stopped");
        }
    }

    /// Capture one RGB frame, starting the stream if needed.
    ///
    /// Dark frames are skipped up to a small retry budget; after that the
    /// last frame is returned as-is.
    pub fn capture(&mut self) -> Result<RgbImage, CameraError> {
        if self.stream.is_none() {
            self.start()?;
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("stream not started".into()))?;

        let mut attempt = 0;
        loop {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let image = buf_to_rgb(self.pixel_format, self.width, self.height, buf)?;

            attempt += 1;
            if frame::is_dark_frame(&image, DARK_THRESHOLD) && attempt <= MAX_DARK_RETRIES {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }
            return Ok(image);
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert a raw buffer to RGB based on the negotiated format.
fn buf_to_rgb(
    format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<RgbImage, CameraError> {
    let result = match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height),
        PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf),
    };
    result.map_err(|e| CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}")))
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}

/// Thread-safe [`FrameSource`] over a camera. Capture runs on the blocking pool.
#[derive(Clone)]
pub struct SharedCamera {
    inner: Arc<Mutex<Camera>>,
}

impl SharedCamera {
    pub fn new(camera: Camera) -> Self {
        Self {
            inner: Arc::new(Mutex::new(camera)),
        }
    }

    pub fn stop(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).stop();
    }
}

#[async_trait]
impl FrameSource for SharedCamera {
    async fn capture(&self) -> recall_core::Result<RgbImage> {
        let inner = Arc::clone(&self.inner);
        let image = tokio::task::spawn_blocking(move || {
            inner.lock().unwrap_or_else(PoisonError::into_inner).capture()
        })
        .await
        .map_err(|e| recall_core::Error::Camera(format!("capture task failed: {e}")))??;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_buf_to_rgb_reports_short_buffer() {
        let err = buf_to_rgb(PixelFormat::Yuyv, 4, 4, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(ref m) if m.contains("Yuyv")));
    }

    #[test]
    fn test_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", 0).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_camera_error_maps_to_core() {
        let err: recall_core::Error = CameraError::NoCameraFound.into();
        assert!(matches!(err, recall_core::Error::Camera(ref m) if m == "no camera found"));
    }
}
