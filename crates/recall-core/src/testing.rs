//! In-memory collaborators for workflow tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::extractor::DescriptorExtractor;
use crate::notify::Notifier;
use crate::source::FrameSource;
use crate::store::PersonStore;
use crate::types::{BoundingBox, Detection, Embedding, NewPerson, Person, PersonPatch};

pub fn new_person(name: &str, values: Vec<f32>) -> NewPerson {
    NewPerson {
        name: name.into(),
        relationship: None,
        notes: None,
        reference_embedding: Embedding::new(values),
        images: vec![],
    }
}

pub fn detection(values: Vec<f32>) -> Detection {
    Detection {
        bbox: BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 50.0,
            height: 60.0,
            confidence: 0.9,
            landmarks: None,
        },
        embedding: Embedding::new(values),
    }
}

/// Solid-colour image; the colour is the key the fake extractor looks up.
pub fn tagged_image(tag: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([tag, tag, tag]))
}

pub fn write_tagged_image(dir: &Path, name: &str, tag: u8) -> String {
    let path = dir.join(name);
    tagged_image(tag).save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

pub enum Scripted {
    Faces(Vec<Detection>),
    Fail(String),
}

/// Extractor answering from a table keyed by the image's top-left pixel.
#[derive(Default)]
pub struct FakeExtractor {
    script: HashMap<u8, Scripted>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn with(mut self, tag: u8, answer: Scripted) -> Self {
        self.script.insert(tag, answer);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorExtractor for FakeExtractor {
    async fn detect(&self, image: RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = image.get_pixel(0, 0).0[0];
        match self.script.get(&tag) {
            Some(Scripted::Faces(faces)) => Ok(faces.clone()),
            Some(Scripted::Fail(msg)) => Err(Error::Extraction(msg.clone())),
            None => Ok(vec![]),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    people: Mutex<Vec<Person>>,
    next_id: AtomicUsize,
    touch_fails: bool,
    touch_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn failing_touch() -> Self {
        Self {
            touch_fails: true,
            ..Default::default()
        }
    }

    /// Last-seen updates take `delay` before they land.
    pub fn slow_touch(delay: Duration) -> Self {
        Self {
            touch_delay: Some(delay),
            ..Default::default()
        }
    }

    fn assign_id(&self) -> String {
        format!("p{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl PersonStore for MemoryStore {
    async fn add(&self, person: NewPerson) -> Result<Person> {
        let person = person.validated()?;
        let record = Person {
            id: self.assign_id(),
            name: person.name,
            relationship: person.relationship,
            notes: person.notes,
            reference_embedding: person.reference_embedding,
            images: person.images,
            created_at: Utc::now(),
            last_recognized: None,
        };
        self.people.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<Person>> {
        let mut people = self.people.lock().unwrap().clone();
        people.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(people)
    }

    async fn get(&self, id: &str) -> Result<Person> {
        self.people
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, patch: PersonPatch) -> Result<Person> {
        let patch = patch.validated()?;
        let mut people = self.people.lock().unwrap();
        let person = people
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        patch.apply(person);
        Ok(person.clone())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut people = self.people.lock().unwrap();
        let before = people.len();
        people.retain(|p| p.id != id);
        if people.len() == before {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn touch_last_seen(&self, id: &str) -> Result<DateTime<Utc>> {
        if self.touch_fails {
            return Err(Error::Storage("disk full".into()));
        }
        if let Some(delay) = self.touch_delay {
            tokio::time::sleep(delay).await;
        }
        let now = Utc::now();
        let mut people = self.people.lock().unwrap();
        let person = people
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        person.last_recognized = Some(now);
        Ok(now)
    }

    async fn clear(&self) -> Result<usize> {
        let mut people = self.people.lock().unwrap();
        let n = people.len();
        people.clear();
        Ok(n)
    }

    async fn restore(&self, incoming: Vec<Person>, replace: bool) -> Result<Vec<Person>> {
        let mut restored = Vec::with_capacity(incoming.len());
        for mut person in incoming {
            person.id = self.assign_id();
            restored.push(person);
        }
        let mut people = self.people.lock().unwrap();
        if replace {
            people.clear();
        }
        people.extend(restored.iter().cloned());
        Ok(restored)
    }
}

/// Frame source that signals when a capture starts and waits to be released.
pub struct GatedFrames {
    image: RgbImage,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedFrames {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl FrameSource for GatedFrames {
    async fn capture(&self) -> Result<RgbImage> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.image.clone())
    }
}

pub struct StaticFrames(pub Result<RgbImage, String>);

#[async_trait]
impl FrameSource for StaticFrames {
    async fn capture(&self) -> Result<RgbImage> {
        self.0.clone().map_err(Error::Camera)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}

/// Notifier that takes a while to finish speaking.
#[derive(Default)]
pub struct SlowNotifier {
    pub finished: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn announce(&self, text: &str) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.finished.lock().unwrap().push(text.to_string());
    }
}
