//! SQLite-backed person store.
//!
//! All statements run on tokio-rusqlite's connection thread. Embeddings are
//! stored as little-endian `f32` bytes, sealed with AES-256-GCM when a
//! cipher is configured.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::{Embedding, NewPerson, Person, PersonPatch, PersonStore};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::cipher::EmbeddingCipher;
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS people (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    relationship TEXT,
    notes TEXT,
    embedding BLOB NOT NULL,
    sealed INTEGER NOT NULL DEFAULT 0,
    model_version TEXT,
    images TEXT NOT NULL DEFAULT '[]',  -- JSON array, selection order
    created_at TEXT NOT NULL,           -- RFC 3339, UTC
    last_recognized TEXT
);

CREATE INDEX IF NOT EXISTS idx_people_name ON people(name COLLATE NOCASE);
"#;

const SELECT_PERSON: &str = "SELECT id, name, relationship, notes, embedding, sealed, \
     model_version, images, created_at, last_recognized FROM people";

const INSERT_PERSON: &str = "INSERT INTO people (id, name, relationship, notes, embedding, \
     sealed, model_version, images, created_at, last_recognized) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// A `people` row as stored, before decoding.
struct PersonRow {
    id: String,
    name: String,
    relationship: Option<String>,
    notes: Option<String>,
    embedding: Vec<u8>,
    sealed: bool,
    model_version: Option<String>,
    images: String,
    created_at: String,
    last_recognized: Option<String>,
}

impl PersonRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            relationship: row.get(2)?,
            notes: row.get(3)?,
            embedding: row.get(4)?,
            sealed: row.get(5)?,
            model_version: row.get(6)?,
            images: row.get(7)?,
            created_at: row.get(8)?,
            last_recognized: row.get(9)?,
        })
    }
}

pub struct SqliteStore {
    conn: Connection,
    cipher: Option<EmbeddingCipher>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn open(path: &Path, cipher: Option<EmbeddingCipher>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), encrypted = cipher.is_some(), "opened person store");
        Self::init(conn, cipher).await
    }

    pub async fn open_in_memory(cipher: Option<EmbeddingCipher>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, cipher).await
    }

    async fn init(conn: Connection, cipher: Option<EmbeddingCipher>) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, cipher })
    }

    fn encode(&self, embedding: &Embedding) -> Result<(Vec<u8>, bool), StoreError> {
        let bytes = embedding_to_bytes(&embedding.values);
        match &self.cipher {
            Some(cipher) => Ok((cipher.seal(&bytes)?, true)),
            None => Ok((bytes, false)),
        }
    }

    fn decode(&self, row: PersonRow) -> Result<Person, StoreError> {
        let bytes = match (row.sealed, &self.cipher) {
            (true, Some(cipher)) => cipher.open(&row.embedding)?,
            (true, None) => return Err(StoreError::Locked(row.id)),
            (false, _) => row.embedding,
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        if bytes.len() % 4 != 0 {
            return Err(corrupt(format!("embedding is {} bytes", bytes.len())));
        }
        let images: Vec<String> =
            serde_json::from_str(&row.images).map_err(|e| corrupt(format!("images: {e}")))?;
        let created_at =
            parse_timestamp(&row.created_at).map_err(|e| corrupt(format!("created_at: {e}")))?;
        let last_recognized = row
            .last_recognized
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| corrupt(format!("last_recognized: {e}")))?;

        Ok(Person {
            reference_embedding: Embedding {
                values: bytes_to_embedding(&bytes),
                model_version: row.model_version,
            },
            id: row.id,
            name: row.name,
            relationship: row.relationship,
            notes: row.notes,
            images,
            created_at,
            last_recognized,
        })
    }

    /// Serialize a person into insert parameters.
    fn to_params(&self, person: &Person) -> Result<InsertParams, StoreError> {
        let (embedding, sealed) = self.encode(&person.reference_embedding)?;
        Ok(InsertParams {
            id: person.id.clone(),
            name: person.name.clone(),
            relationship: person.relationship.clone(),
            notes: person.notes.clone(),
            embedding,
            sealed,
            model_version: person.reference_embedding.model_version.clone(),
            images: images_json(&person.images),
            created_at: person.created_at.to_rfc3339(),
            last_recognized: person.last_recognized.map(|t| t.to_rfc3339()),
        })
    }

    async fn fetch(&self, id: &str) -> Result<Person, StoreError> {
        let id = id.to_string();
        let lookup = id.clone();
        let row = self
            .conn
            .call(move |c| {
                let row = c
                    .query_row(
                        &format!("{SELECT_PERSON} WHERE id = ?1"),
                        params![lookup],
                        PersonRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?
            .ok_or(StoreError::NotFound(id))?;
        self.decode(row)
    }
}

struct InsertParams {
    id: String,
    name: String,
    relationship: Option<String>,
    notes: Option<String>,
    embedding: Vec<u8>,
    sealed: bool,
    model_version: Option<String>,
    images: String,
    created_at: String,
    last_recognized: Option<String>,
}

impl InsertParams {
    fn insert(&self, c: &rusqlite::Connection) -> rusqlite::Result<usize> {
        c.execute(
            INSERT_PERSON,
            params![
                self.id,
                self.name,
                self.relationship,
                self.notes,
                self.embedding,
                self.sealed,
                self.model_version,
                self.images,
                self.created_at,
                self.last_recognized,
            ],
        )
    }
}

#[async_trait]
impl PersonStore for SqliteStore {
    async fn add(&self, person: NewPerson) -> recall_core::Result<Person> {
        let person = person.validated()?;
        let person = Person {
            id: uuid::Uuid::new_v4().to_string(),
            name: person.name,
            relationship: person.relationship,
            notes: person.notes,
            reference_embedding: person.reference_embedding,
            images: person.images,
            created_at: Utc::now(),
            last_recognized: None,
        };

        let insert = self.to_params(&person)?;
        self.conn
            .call(move |c| Ok(insert.insert(c)?))
            .await
            .map_err(StoreError::from)?;

        tracing::info!(id = %person.id, name = %person.name, "person added");
        Ok(person)
    }

    async fn list(&self) -> recall_core::Result<Vec<Person>> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(&format!(
                    "{SELECT_PERSON} ORDER BY name COLLATE NOCASE, created_at"
                ))?;
                let rows = stmt
                    .query_map([], PersonRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(StoreError::from)?;

        let people = rows
            .into_iter()
            .map(|row| self.decode(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    async fn get(&self, id: &str) -> recall_core::Result<Person> {
        Ok(self.fetch(id).await?)
    }

    async fn update(&self, id: &str, patch: PersonPatch) -> recall_core::Result<Person> {
        let patch = patch.validated()?;
        let mut person = self.fetch(id).await?;
        if patch.is_empty() {
            return Ok(person);
        }
        patch.apply(&mut person);

        let (embedding, sealed) = self.encode(&person.reference_embedding)?;
        let model_version = person.reference_embedding.model_version.clone();
        let (name, relationship, notes) = (
            person.name.clone(),
            person.relationship.clone(),
            person.notes.clone(),
        );
        let images = images_json(&person.images);
        let key = person.id.clone();

        let changed = self
            .conn
            .call(move |c| {
                let changed = c.execute(
                    "UPDATE people SET name = ?1, relationship = ?2, notes = ?3, \
                     embedding = ?4, sealed = ?5, model_version = ?6, images = ?7 \
                     WHERE id = ?8",
                    params![name, relationship, notes, embedding, sealed, model_version, images, key],
                )?;
                Ok(changed)
            })
            .await
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }

        tracing::info!(id = %person.id, "person updated");
        Ok(person)
    }

    async fn remove(&self, id: &str) -> recall_core::Result<()> {
        let key = id.to_string();
        let removed = self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM people WHERE id = ?1", params![key])?))
            .await
            .map_err(StoreError::from)?;
        if removed == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        tracing::info!(id, "person removed");
        Ok(())
    }

    async fn touch_last_seen(&self, id: &str) -> recall_core::Result<DateTime<Utc>> {
        let now = Utc::now();
        let (key, stamp) = (id.to_string(), now.to_rfc3339());
        let changed = self
            .conn
            .call(move |c| {
                Ok(c.execute(
                    "UPDATE people SET last_recognized = ?1 WHERE id = ?2",
                    params![stamp, key],
                )?)
            })
            .await
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        tracing::debug!(id, "last seen updated");
        Ok(now)
    }

    async fn clear(&self) -> recall_core::Result<usize> {
        let removed = self
            .conn
            .call(|c| Ok(c.execute("DELETE FROM people", [])?))
            .await
            .map_err(StoreError::from)?;
        tracing::info!(removed, "person store cleared");
        Ok(removed)
    }

    async fn restore(
        &self,
        people: Vec<Person>,
        replace: bool,
    ) -> recall_core::Result<Vec<Person>> {
        let mut restored = Vec::with_capacity(people.len());
        for person in people {
            let checked = NewPerson {
                name: person.name,
                relationship: person.relationship,
                notes: person.notes,
                reference_embedding: person.reference_embedding,
                images: person.images,
            }
            .validated()?;
            restored.push(Person {
                id: uuid::Uuid::new_v4().to_string(),
                name: checked.name,
                relationship: checked.relationship,
                notes: checked.notes,
                reference_embedding: checked.reference_embedding,
                images: checked.images,
                created_at: person.created_at,
                last_recognized: person.last_recognized,
            });
        }

        let inserts = restored
            .iter()
            .map(|p| self.to_params(p))
            .collect::<Result<Vec<_>, _>>()?;
        let removed = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let removed = if replace {
                    tx.execute("DELETE FROM people", [])?
                } else {
                    0
                };
                for insert in &inserts {
                    insert.insert(&tx)?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(StoreError::from)?;

        tracing::info!(count = restored.len(), removed, "people restored");
        Ok(restored)
    }

    async fn count(&self) -> recall_core::Result<usize> {
        let count = self
            .conn
            .call(|c| {
                let n: i64 = c.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(StoreError::from)?;
        Ok(count as usize)
    }
}

fn images_json(images: &[String]) -> String {
    serde_json::to_string(images).unwrap_or_else(|_| "[]".to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Convert f32 vector to little-endian bytes.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
impl SqliteStore {
    /// Run raw SQL against the connection, for rigging failures in tests.
    pub(crate) async fn execute_batch(&self, sql: &'static str) {
        self.conn
            .call(move |c| Ok(c.execute_batch(sql)?))
            .await
            .unwrap();
    }
}

/// Aborts any insert of a person named "Boom".
#[cfg(test)]
pub(crate) const FAIL_ON_BOOM: &str = "CREATE TRIGGER fail_on_boom BEFORE INSERT ON people \
     WHEN NEW.name = 'Boom' BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;";
