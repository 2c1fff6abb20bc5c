//! Recognition workflow: one frame in, one structured result out.
//!
//! ```text
//! Idle → Capturing → Extracting → Matching → { Recognized | NotRecognized } → Idle
//! ```
//!
//! Only one attempt runs at a time. The terminal state is held until the
//! next attempt starts. Only the first (most prominent) detection in a
//! frame is matched; other faces are ignored.
//!
//! The last-seen update and the announcement run in the background so the
//! result is available immediately. Call [`RecognitionService::flush`]
//! before shutting down to let them finish.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::extractor::DescriptorExtractor;
use crate::gallery::GalleryCache;
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::notify::{AnnounceMode, Notifier};
use crate::source::FrameSource;
use crate::store::PersonStore;
use crate::types::{BoundingBox, Person};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Idle,
    Capturing,
    Extracting,
    Matching,
    Recognized,
    NotRecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotRecognizedReason {
    NoFaceDetected,
    NoEnrolledPeople,
    NoMatch,
    /// Capture or extraction failed; carries the underlying message.
    Failed(String),
}

impl fmt::Display for NotRecognizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotRecognizedReason::NoFaceDetected => f.write_str("no face detected"),
            NotRecognizedReason::NoEnrolledPeople => f.write_str("no enrolled people"),
            NotRecognizedReason::NoMatch => f.write_str("face not recognized"),
            NotRecognizedReason::Failed(msg) => f.write_str(msg),
        }
    }
}

/// Outcome of one recognition attempt. Not persisted.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub recognized: bool,
    pub person: Option<Person>,
    /// Distance to the closest gallery entry, when one was compared.
    pub distance: Option<f32>,
    pub bbox: Option<BoundingBox>,
    pub reason: Option<NotRecognizedReason>,
    pub timestamp: DateTime<Utc>,
}

impl RecognitionResult {
    fn not_recognized(
        reason: NotRecognizedReason,
        bbox: Option<BoundingBox>,
        distance: Option<f32>,
    ) -> Self {
        Self {
            recognized: false,
            person: None,
            distance,
            bbox,
            reason: Some(reason),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecognitionAttempt {
    /// Another attempt was already running; nothing happened.
    Busy,
    Completed(RecognitionResult),
}

#[derive(Debug, Clone, Copy)]
pub struct RecognitionSettings {
    pub threshold: f32,
    pub announce: AnnounceMode,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            announce: AnnounceMode::default(),
        }
    }
}

/// Single-flight recognition pipeline over abstract collaborators.
pub struct RecognitionService {
    extractor: Arc<dyn DescriptorExtractor>,
    store: Arc<dyn PersonStore>,
    gallery: Arc<GalleryCache>,
    frames: Arc<dyn FrameSource>,
    notifier: Arc<dyn Notifier>,
    matcher: EuclideanMatcher,
    settings: RecognitionSettings,
    in_flight: AtomicBool,
    state: Mutex<RecognitionState>,
    background: Mutex<JoinSet<()>>,
}

/// Clears the in-flight flag on every exit path. An attempt that never
/// reached a terminal state falls back to `Idle`.
struct FlightGuard<'a> {
    service: &'a RecognitionService,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self
                .service
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if matches!(
                *state,
                RecognitionState::Capturing | RecognitionState::Extracting | RecognitionState::Matching
            ) {
                *state = RecognitionState::Idle;
            }
        }
        self.service.in_flight.store(false, Ordering::Release);
    }
}

impl RecognitionService {
    pub fn new(
        extractor: Arc<dyn DescriptorExtractor>,
        store: Arc<dyn PersonStore>,
        gallery: Arc<GalleryCache>,
        frames: Arc<dyn FrameSource>,
        notifier: Arc<dyn Notifier>,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            extractor,
            store,
            gallery,
            frames,
            notifier,
            matcher: EuclideanMatcher,
            settings,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(RecognitionState::Idle),
            background: Mutex::new(JoinSet::new()),
        }
    }

    pub fn settings(&self) -> RecognitionSettings {
        self.settings
    }

    pub fn state(&self) -> RecognitionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn set_state(&self, state: RecognitionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Capture, extract, match. Returns `Busy` without side effects when
    /// another attempt is in flight. Never fails: collaborator errors come
    /// back as `NotRecognized` with the error message.
    pub async fn recognize(&self) -> RecognitionAttempt {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("recognition already in flight; request ignored");
            return RecognitionAttempt::Busy;
        }
        let _guard = FlightGuard { service: self };

        let result = match self.run().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed");
                RecognitionResult::not_recognized(
                    NotRecognizedReason::Failed(e.to_string()),
                    None,
                    None,
                )
            }
        };

        self.set_state(if result.recognized {
            RecognitionState::Recognized
        } else {
            RecognitionState::NotRecognized
        });
        RecognitionAttempt::Completed(result)
    }

    async fn run(&self) -> Result<RecognitionResult> {
        self.set_state(RecognitionState::Capturing);
        let frame = self.frames.capture().await?;

        self.set_state(RecognitionState::Extracting);
        let detections = self.extractor.detect(frame).await?;
        let Some(face) = detections.into_iter().next() else {
            tracing::debug!("recognize: no face detected");
            return Ok(RecognitionResult::not_recognized(
                NotRecognizedReason::NoFaceDetected,
                None,
                None,
            ));
        };

        let gallery = self.gallery.get(self.store.as_ref()).await?;
        if gallery.is_empty() {
            return Ok(RecognitionResult::not_recognized(
                NotRecognizedReason::NoEnrolledPeople,
                Some(face.bbox),
                None,
            ));
        }

        self.set_state(RecognitionState::Matching);
        let result = self
            .matcher
            .best_match(&face.embedding, &gallery, self.settings.threshold);

        let matched = result
            .person_id
            .as_deref()
            .filter(|_| result.matched)
            .and_then(|id| gallery.get(id))
            .cloned();

        let Some(mut person) = matched else {
            tracing::info!(distance = ?result.distance, "recognize: face not recognized");
            return Ok(RecognitionResult::not_recognized(
                NotRecognizedReason::NoMatch,
                Some(face.bbox),
                result.distance,
            ));
        };

        let now = Utc::now();
        person.last_recognized = Some(now);
        tracing::info!(
            id = %person.id,
            name = %person.name,
            distance = ?result.distance,
            "recognize: match"
        );

        self.touch_last_seen(&person.id);
        if let Some(text) = self.settings.announce.announcement(&person) {
            let notifier = Arc::clone(&self.notifier);
            self.spawn_background(async move { notifier.announce(&text).await });
        }

        Ok(RecognitionResult {
            recognized: true,
            person: Some(person),
            distance: result.distance,
            bbox: Some(face.bbox),
            reason: None,
            timestamp: now,
        })
    }

    /// Failures are logged and never reach the caller.
    fn touch_last_seen(&self, id: &str) {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        self.spawn_background(async move {
            if let Err(e) = store.touch_last_seen(&id).await {
                tracing::warn!(id = %id, error = %e, "failed to update last-seen time");
            }
        });
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished tasks; watch mode spawns one per match.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait for pending last-seen updates and announcements.
    pub async fn flush(&self) {
        let mut tasks = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "background recognition task failed");
            }
        }
    }
}
