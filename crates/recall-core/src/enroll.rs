//! Enrollment workflow: photos in, one validated person record out.
//!
//! ```text
//! Idle → PhotosSelected → Validating → { Valid | Invalid } → Saved
//! ```
//!
//! Each selected photo must show exactly one face. Photos with zero or
//! several faces stay in the list, annotated, but contribute no
//! descriptor. Saving needs at least one valid descriptor; the first one
//! becomes the person's reference embedding.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::extractor::DescriptorExtractor;
use crate::gallery::GalleryCache;
use crate::source::load_rgb;
use crate::store::PersonStore;
use crate::types::{BoundingBox, Embedding, NewPerson, Person, PersonDetails, PersonPatch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentState {
    Idle,
    PhotosSelected,
    Validating,
    /// At least one photo produced a usable descriptor (or an edited
    /// person keeps their stored one).
    Valid,
    /// Validation finished without a usable descriptor.
    Invalid,
    Saved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoStatus {
    Pending,
    Valid,
    Invalid(String),
    /// Already attached to the person being edited.
    Stored,
}

#[derive(Debug, Clone)]
pub struct PhotoEntry {
    pub path: String,
    pub status: PhotoStatus,
    pub bbox: Option<BoundingBox>,
    embedding: Option<Embedding>,
}

impl PhotoEntry {
    fn pending(path: String) -> Self {
        Self {
            path,
            status: PhotoStatus::Pending,
            bbox: None,
            embedding: None,
        }
    }

    fn invalid(&mut self, reason: impl Into<String>) {
        self.status = PhotoStatus::Invalid(reason.into());
        self.bbox = None;
        self.embedding = None;
    }

    pub fn is_valid(&self) -> bool {
        self.status == PhotoStatus::Valid
    }
}

/// One enrollment or edit session.
pub struct EnrollmentSession {
    extractor: Arc<dyn DescriptorExtractor>,
    store: Arc<dyn PersonStore>,
    gallery: Arc<GalleryCache>,
    state: EnrollmentState,
    photos: Vec<PhotoEntry>,
    editing: Option<Person>,
    /// True once the user picked photos in this session.
    new_selection: bool,
}

impl EnrollmentSession {
    pub fn new(
        extractor: Arc<dyn DescriptorExtractor>,
        store: Arc<dyn PersonStore>,
        gallery: Arc<GalleryCache>,
    ) -> Self {
        Self {
            extractor,
            store,
            gallery,
            state: EnrollmentState::Idle,
            photos: Vec::new(),
            editing: None,
            new_selection: false,
        }
    }

    /// Start a session that edits an existing person, pre-loading their
    /// stored photos and descriptor.
    pub async fn edit(
        extractor: Arc<dyn DescriptorExtractor>,
        store: Arc<dyn PersonStore>,
        gallery: Arc<GalleryCache>,
        id: &str,
    ) -> Result<Self> {
        let person = store.get(id).await?;
        let mut session = Self::new(extractor, store, gallery);
        session.photos = stored_photos(&person);
        session.editing = Some(person);
        session.state = EnrollmentState::Valid;
        Ok(session)
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    pub fn photos(&self) -> &[PhotoEntry] {
        &self.photos
    }

    pub fn editing(&self) -> Option<&Person> {
        self.editing.as_ref()
    }

    pub fn valid_count(&self) -> usize {
        self.photos.iter().filter(|p| p.is_valid()).count()
    }

    /// Replace the photo selection. Order is kept as given.
    ///
    /// Selecting nothing while editing falls back to the stored photos.
    pub fn select_photos<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let photos: Vec<PhotoEntry> = paths
            .into_iter()
            .map(|p| PhotoEntry::pending(p.into()))
            .collect();

        if photos.is_empty() {
            self.new_selection = false;
            match &self.editing {
                Some(person) => {
                    self.photos = stored_photos(person);
                    self.state = EnrollmentState::Valid;
                }
                None => {
                    self.photos.clear();
                    self.state = EnrollmentState::Idle;
                }
            }
            return;
        }

        tracing::debug!(count = photos.len(), "photos selected");
        self.photos = photos;
        self.new_selection = true;
        self.state = EnrollmentState::PhotosSelected;
    }

    /// Run every newly selected photo through the extractor.
    ///
    /// Per-photo failures are recorded on the photo, never returned.
    pub async fn validate(&mut self) -> &EnrollmentState {
        if !self.new_selection {
            return &self.state;
        }

        self.state = EnrollmentState::Validating;

        for photo in &mut self.photos {
            let image = match load_rgb(&photo.path).await {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(path = %photo.path, error = %e, "enroll: cannot read photo");
                    photo.invalid(e.to_string());
                    continue;
                }
            };

            match self.extractor.detect(image).await {
                Ok(faces) if faces.is_empty() => photo.invalid("no face detected"),
                Ok(faces) if faces.len() > 1 => {
                    photo.invalid(format!("multiple faces detected ({})", faces.len()))
                }
                Ok(mut faces) => {
                    let face = faces.remove(0);
                    photo.status = PhotoStatus::Valid;
                    photo.bbox = Some(face.bbox);
                    photo.embedding = Some(face.embedding);
                }
                Err(e) => {
                    tracing::warn!(path = %photo.path, error = %e, "enroll: extraction failed");
                    photo.invalid(e.to_string());
                }
            }
            tracing::debug!(path = %photo.path, status = ?photo.status, "enroll: photo checked");
        }

        let valid = self.valid_count();
        self.state = if valid > 0 {
            EnrollmentState::Valid
        } else {
            EnrollmentState::Invalid
        };
        tracing::info!(
            selected = self.photos.len(),
            valid,
            "enroll: validation finished"
        );
        &self.state
    }

    /// Persist the session: insert a new person, or update the edited one.
    pub async fn save(&mut self, details: PersonDetails) -> Result<Person> {
        match self.state {
            EnrollmentState::Saved => {
                return Err(Error::Validation("enrollment already saved".into()));
            }
            EnrollmentState::Idle => {
                return Err(Error::Validation("no photos selected".into()));
            }
            EnrollmentState::PhotosSelected => {
                self.validate().await;
            }
            _ => {}
        }

        let embedding = if self.new_selection {
            let first = self
                .photos
                .iter()
                .find_map(|p| p.embedding.clone())
                .ok_or_else(|| {
                    Error::Validation("no detectable face in the selected photos".into())
                })?;
            Some(first)
        } else {
            None
        };
        let images: Vec<String> = self.photos.iter().map(|p| p.path.clone()).collect();

        let saved = match &self.editing {
            None => {
                let embedding = embedding.ok_or_else(|| {
                    Error::Validation("no detectable face in the selected photos".into())
                })?;
                let person = self
                    .store
                    .add(NewPerson {
                        name: details.name,
                        relationship: details.relationship,
                        notes: details.notes,
                        reference_embedding: embedding,
                        images,
                    })
                    .await?;
                tracing::info!(id = %person.id, name = %person.name, "person enrolled");
                person
            }
            Some(existing) => {
                let mut patch = PersonPatch {
                    name: Some(details.name),
                    relationship: Some(details.relationship),
                    notes: Some(details.notes),
                    ..Default::default()
                };
                if let Some(embedding) = embedding {
                    patch.images = Some(images);
                    patch.reference_embedding = Some(embedding);
                }
                let person = self.store.update(&existing.id, patch).await?;
                tracing::info!(id = %person.id, name = %person.name, "person updated");
                person
            }
        };

        self.gallery.invalidate();
        self.state = EnrollmentState::Saved;
        self.editing = Some(saved.clone());
        Ok(saved)
    }
}

fn stored_photos(person: &Person) -> Vec<PhotoEntry> {
    person
        .images
        .iter()
        .map(|path| PhotoEntry {
            path: path.clone(),
            status: PhotoStatus::Stored,
            bbox: None,
            embedding: None,
        })
        .collect()
}

/// Delete a person and drop them from the gallery cache.
pub async fn remove_person(
    store: &dyn PersonStore,
    gallery: &GalleryCache,
    id: &str,
) -> Result<Person> {
    let person = store.get(id).await?;
    store.remove(id).await?;
    gallery.invalidate();
    tracing::info!(id, name = %person.name, "person removed");
    Ok(person)
}

/// Delete everyone. Returns how many records were removed.
pub async fn clear_people(store: &dyn PersonStore, gallery: &GalleryCache) -> Result<usize> {
    let removed = store.clear().await?;
    gallery.invalidate();
    tracing::info!(removed, "all people removed");
    Ok(removed)
}
