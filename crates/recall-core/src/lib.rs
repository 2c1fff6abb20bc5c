//! recall-core — enrollment and recognition for a personal face memory.
//!
//! SCRFD finds faces and ArcFace turns each one into a descriptor, both via
//! ONNX Runtime on the CPU. The workflows only see the [`DescriptorExtractor`],
//! [`PersonStore`], [`FrameSource`] and [`Notifier`] traits, so every
//! collaborator can be swapped out.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod enroll;
pub mod error;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod notify;
pub mod recognize;
pub mod recognizer;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use engine::{EngineStatus, OnnxExtractor};
pub use enroll::{
    clear_people, remove_person, EnrollmentSession, EnrollmentState, PhotoEntry, PhotoStatus,
};
pub use error::{Error, Result};
pub use extractor::DescriptorExtractor;
pub use gallery::GalleryCache;
pub use matcher::{EuclideanMatcher, Gallery, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use notify::{AnnounceMode, Notifier, SilentNotifier};
pub use recognize::{
    NotRecognizedReason, RecognitionAttempt, RecognitionResult, RecognitionService,
    RecognitionSettings, RecognitionState,
};
pub use source::{load_rgb, FrameSource, ImageFile};
pub use store::PersonStore;
pub use types::{
    BoundingBox, Detection, Embedding, NewPerson, Person, PersonDetails, PersonPatch,
};
