//! Person store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{NewPerson, Person, PersonPatch};

/// Persistent collection of enrolled people.
///
/// Concurrent operations on the same id are last-writer-wins.
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Insert a new record. Fails with `Validation` for an empty name or
    /// missing embedding.
    async fn add(&self, person: NewPerson) -> Result<Person>;

    /// All records ordered by name ascending.
    async fn list(&self) -> Result<Vec<Person>>;

    async fn get(&self, id: &str) -> Result<Person>;

    async fn update(&self, id: &str, patch: PersonPatch) -> Result<Person>;

    /// Delete a record. Fails with `NotFound` if it is already gone.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Set `last_recognized` to the current time and return it.
    async fn touch_last_seen(&self, id: &str) -> Result<DateTime<Utc>>;

    /// Delete every record, returning how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Re-insert previously exported records as new ones.
    ///
    /// Incoming ids are ignored and fresh ids assigned; every other field,
    /// including timestamps, is kept. With `replace`, existing records are
    /// deleted in the same transaction. Either the whole batch lands or the
    /// store is left untouched.
    async fn restore(&self, people: Vec<Person>, replace: bool) -> Result<Vec<Person>>;

    async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}
