//! recall-hw — Camera capture and spoken announcements.
//!
//! Provides V4L2-based frame capture converted to RGB, and a text-to-speech
//! notifier backed by an external command.

pub mod camera;
pub mod frame;
pub mod speech;

pub use camera::{list_devices, Camera, CameraError, DeviceInfo, PixelFormat, SharedCamera};
pub use speech::{SpeechNotifier, DEFAULT_SPEECH_COMMAND};
