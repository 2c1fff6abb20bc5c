use std::path::PathBuf;

use async_trait::async_trait;
use image::RgbImage;
use tokio::sync::{mpsc, oneshot, watch};

use crate::detector::FaceDetector;
use crate::error::{Error, Result};
use crate::extractor::DescriptorExtractor;
use crate::recognizer::FaceRecognizer;
use crate::types::Detection;

/// Model file names expected inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Lifecycle of the inference engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Detect {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<Detection>>>,
    },
}

/// ONNX-backed [`DescriptorExtractor`] running on a dedicated OS thread.
///
/// Models load asynchronously on that thread; requests made before loading
/// finishes fail with `NotReady`. Clone-safe handle.
#[derive(Clone)]
pub struct OnnxExtractor {
    tx: mpsc::Sender<EngineRequest>,
    status: watch::Receiver<EngineStatus>,
}

impl OnnxExtractor {
    /// Spawn the engine thread and start loading both models in the background.
    pub fn spawn(scrfd_path: PathBuf, arcface_path: PathBuf) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        let (status_tx, status) = watch::channel(EngineStatus::Loading);

        std::thread::Builder::new()
            .name("recall-engine".into())
            .spawn(move || {
                let models = FaceDetector::load(&scrfd_path)
                    .map_err(Error::from)
                    .and_then(|d| Ok((d, FaceRecognizer::load(&arcface_path)?)));

                let (mut detector, mut recognizer) = match models {
                    Ok(models) => {
                        tracing::info!("engine: models loaded");
                        let _ = status_tx.send(EngineStatus::Ready);
                        models
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "engine: model load failed");
                        let _ = status_tx.send(EngineStatus::Failed(e.to_string()));
                        // Drain so callers get an answer instead of a closed channel.
                        while let Some(EngineRequest::Detect { reply, .. }) = rx.blocking_recv() {
                            let _ = reply.send(Err(Error::NotReady(format!(
                                "face models failed to load: {e}"
                            ))));
                        }
                        return;
                    }
                };

                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Detect { image, reply } => {
                            let result = run_detect(&mut detector, &mut recognizer, &image);
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!("engine thread exiting");
            })
            .map_err(|e| Error::NotReady(format!("cannot spawn engine thread: {e}")))?;

        Ok(Self { tx, status })
    }

    /// Spawn using the conventional model file names inside `model_dir`.
    pub fn spawn_in(model_dir: &std::path::Path) -> Result<Self> {
        Self::spawn(
            model_dir.join(SCRFD_MODEL_FILE),
            model_dir.join(ARCFACE_MODEL_FILE),
        )
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Wait until the models are loaded. Fails if loading failed.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| *s != EngineStatus::Loading)
            .await
            .map_err(|_| Error::NotReady("engine thread exited during model load".into()))?
            .clone();
        match settled {
            EngineStatus::Failed(msg) => Err(Error::NotReady(format!(
                "face models failed to load: {msg}"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DescriptorExtractor for OnnxExtractor {
    async fn detect(&self, image: RgbImage) -> Result<Vec<Detection>> {
        if self.status() == EngineStatus::Loading {
            return Err(Error::NotReady("face models are still loading".into()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotReady("engine thread exited".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::NotReady("engine thread exited".into()))?
    }
}

/// Detect every face, then embed each one in detector order.
fn run_detect(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    image: &RgbImage,
) -> Result<Vec<Detection>> {
    let faces = detector.detect(image)?;
    tracing::debug!(faces = faces.len(), "engine: detection finished");

    faces
        .into_iter()
        .map(|bbox| {
            let embedding = recognizer.extract(image, &bbox)?;
            Ok(Detection { bbox, embedding })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_models_fail_not_ready() {
        let extractor = OnnxExtractor::spawn(
            PathBuf::from("/nonexistent/det_10g.onnx"),
            PathBuf::from("/nonexistent/w600k_r50.onnx"),
        )
        .unwrap();

        let err = extractor.wait_ready().await.unwrap_err();
        assert!(matches!(err, Error::NotReady(ref msg) if msg.contains("not found")), "{err}");
        assert!(matches!(extractor.status(), EngineStatus::Failed(_)));

        let err = extractor.detect(RgbImage::new(4, 4)).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }
}
