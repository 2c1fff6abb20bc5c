//! Nearest-neighbour matching of a probe embedding against the enrolled gallery.

use crate::types::{Embedding, Person};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Labelled set of reference embeddings built from a store snapshot.
///
/// Never updated in place: rebuild from a fresh snapshot whenever the
/// store changes.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<Person>,
}

impl Gallery {
    pub fn build(people: Vec<Person>) -> Self {
        let entries: Vec<Person> = people
            .into_iter()
            .filter(|p| !p.reference_embedding.is_empty())
            .collect();
        tracing::debug!(entries = entries.len(), "gallery built");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Person> {
        self.entries.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn entries(&self) -> &[Person] {
        &self.entries
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the closest entry, `None` when nothing was compared.
    pub distance: Option<f32>,
    /// ID of the matched person (if any).
    pub person_id: Option<String>,
    /// Name of the matched person (if any).
    pub person_name: Option<String>,
}

impl MatchResult {
    fn no_match(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            person_id: None,
            person_name: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean-distance matcher. Lower distance = closer; the acceptance test
/// is inclusive (`distance <= threshold`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, person) in gallery.entries.iter().enumerate() {
            let reference = &person.reference_embedding;
            if reference.dim() != probe.dim() {
                tracing::warn!(
                    id = %person.id,
                    expected = probe.dim(),
                    actual = reference.dim(),
                    "skipping gallery entry with mismatched embedding dimension"
                );
                continue;
            }
            let distance = probe.euclidean_distance(reference);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance <= threshold => {
                let person = &gallery.entries[idx];
                MatchResult {
                    matched: true,
                    distance: Some(distance),
                    person_id: Some(person.id.clone()),
                    person_name: Some(person.name.clone()),
                }
            }
            Some((_, distance)) => MatchResult::no_match(Some(distance)),
            None => MatchResult::no_match(None),
        }
    }
}
