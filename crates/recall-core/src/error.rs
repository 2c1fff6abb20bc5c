use thiserror::Error;

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;

/// Error taxonomy shared by every Recall component.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input: empty name, no usable photo, malformed record.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no person with id {0}")]
    NotFound(String),
    /// Models or store not yet initialized.
    #[error("not ready: {0}")]
    NotReady(String),
    /// The detector or recognizer failed, or returned something unusable.
    #[error("face extraction failed: {0}")]
    Extraction(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("camera error: {0}")]
    Camera(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<DetectorError> for Error {
    fn from(err: DetectorError) -> Self {
        Error::Extraction(err.to_string())
    }
}

impl From<RecognizerError> for Error {
    fn from(err: RecognizerError) -> Self {
        Error::Extraction(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Validation(format!("unreadable image: {err}"))
    }
}
