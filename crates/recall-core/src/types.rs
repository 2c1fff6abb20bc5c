use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Callers are expected to compare embeddings of equal dimension; extra
    /// trailing values on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by the descriptor extractor.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub relationship: Option<String>,
    pub notes: Option<String>,
    pub reference_embedding: Embedding,
    /// Photo references in selection order.
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_recognized: Option<DateTime<Utc>>,
}

/// Fields supplied when inserting a new person. The store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub relationship: Option<String>,
    pub notes: Option<String>,
    pub reference_embedding: Embedding,
    pub images: Vec<String>,
}

impl NewPerson {
    /// Trim text fields and reject records the store must not hold.
    pub fn validated(mut self) -> Result<Self> {
        self.name = validate_name(&self.name)?;
        self.relationship = normalize_optional(self.relationship);
        self.notes = normalize_optional(self.notes);
        validate_embedding(&self.reference_embedding)?;
        Ok(self)
    }
}

/// Partial update of a person. `None` leaves a field untouched; for the
/// optional text fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct PersonPatch {
    pub name: Option<String>,
    pub relationship: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub images: Option<Vec<String>>,
    pub reference_embedding: Option<Embedding>,
}

impl PersonPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.relationship.is_none()
            && self.notes.is_none()
            && self.images.is_none()
            && self.reference_embedding.is_none()
    }

    pub fn validated(mut self) -> Result<Self> {
        if let Some(name) = &self.name {
            self.name = Some(validate_name(name)?);
        }
        self.relationship = self.relationship.map(normalize_optional);
        self.notes = self.notes.map(normalize_optional);
        if let Some(embedding) = &self.reference_embedding {
            validate_embedding(embedding)?;
        }
        Ok(self)
    }

    /// Merge this patch into `person`.
    pub fn apply(self, person: &mut Person) {
        if let Some(name) = self.name {
            person.name = name;
        }
        if let Some(relationship) = self.relationship {
            person.relationship = relationship;
        }
        if let Some(notes) = self.notes {
            person.notes = notes;
        }
        if let Some(images) = self.images {
            person.images = images;
        }
        if let Some(embedding) = self.reference_embedding {
            person.reference_embedding = embedding;
        }
    }
}

/// Name, relationship and notes as entered by the user.
#[derive(Debug, Clone, Default)]
pub struct PersonDetails {
    pub name: String,
    pub relationship: Option<String>,
    pub notes: Option<String>,
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_embedding(embedding: &Embedding) -> Result<()> {
    if embedding.is_empty() {
        return Err(Error::Validation("reference embedding is missing".into()));
    }
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation(
            "reference embedding contains non-finite values".into(),
        ));
    }
    Ok(())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
