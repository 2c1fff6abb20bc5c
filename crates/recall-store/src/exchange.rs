//! JSON export and import of the person store.
//!
//! Exports are a pretty-printed array of person records with plaintext
//! embeddings. Imports ignore any `id` field and insert every record as new,
//! in one transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use recall_core::{Embedding, Error, NewPerson, Person, PersonStore, Result};
use serde::Deserialize;

/// An imported record. Identifiers are not part of it.
#[derive(Debug, Deserialize)]
struct ImportRecord {
    name: String,
    #[serde(default)]
    relationship: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    reference_embedding: Embedding,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_recognized: Option<DateTime<Utc>>,
}

impl ImportRecord {
    /// Validate and convert. The id stays empty; the store assigns one.
    fn into_person(self) -> Result<Person> {
        let checked = NewPerson {
            name: self.name,
            relationship: self.relationship,
            notes: self.notes,
            reference_embedding: self.reference_embedding,
            images: self.images,
        }
        .validated()?;
        Ok(Person {
            id: String::new(),
            name: checked.name,
            relationship: checked.relationship,
            notes: checked.notes,
            reference_embedding: checked.reference_embedding,
            images: checked.images,
            created_at: self.created_at,
            last_recognized: self.last_recognized,
        })
    }
}

/// Write every person to `path`. Returns the number exported.
pub async fn export_to(store: &dyn PersonStore, path: &Path) -> Result<usize> {
    let people = store.list().await?;
    let json = serde_json::to_string_pretty(&people)
        .map_err(|e| Error::Storage(format!("serialize export: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Storage(format!("{}: {e}", parent.display())))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;

    tracing::info!(count = people.len(), path = %path.display(), "exported people");
    Ok(people.len())
}

/// Parse and validate an export file without touching the store.
pub async fn read_export(path: &Path) -> Result<Vec<Person>> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Validation(format!("import file not found: {}", path.display()))
        } else {
            Error::Storage(format!("{}: {e}", path.display()))
        }
    })?;
    let records: Vec<ImportRecord> = serde_json::from_str(&json)
        .map_err(|e| Error::Validation(format!("malformed import file {}: {e}", path.display())))?;
    records.into_iter().map(ImportRecord::into_person).collect()
}

/// Import every record in `path`, optionally replacing the current people.
///
/// The file is parsed and validated first, and the replace and inserts run
/// in one store transaction, so a failed import never empties the store.
/// Returns the people as stored, with their new ids.
pub async fn import_from(store: &dyn PersonStore, path: &Path, replace: bool) -> Result<Vec<Person>> {
    let people = read_export(path).await?;
    let restored = store.restore(people, replace).await?;
    tracing::info!(count = restored.len(), path = %path.display(), "imported people");
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::{SqliteStore, FAIL_ON_BOOM};

    fn new_person(name: &str, values: Vec<f32>) -> NewPerson {
        NewPerson {
            name: name.into(),
            relationship: Some("friend".into()),
            notes: None,
            reference_embedding: Embedding::new(values),
            images: vec![format!("/photos/{name}.jpg")],
        }
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup/people.json");

        let source = SqliteStore::open_in_memory(None).await.unwrap();
        let mut alice = new_person("Alice", vec![0.5, 0.25]);
        alice.notes = Some("Likes chess; ask about the garden".into());
        let alice = source.add(alice).await.unwrap();
        source.touch_last_seen(&alice.id).await.unwrap();
        source.add(new_person("Bob", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(export_to(&source, &file).await.unwrap(), 2);

        let target = SqliteStore::open_in_memory(None).await.unwrap();
        let imported = import_from(&target, &file, false).await.unwrap();
        assert_eq!(imported.len(), 2);

        let before = source.list().await.unwrap();
        let after = target.list().await.unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(after[0].notes.as_deref(), Some("Likes chess; ask about the garden"));
        for (b, a) in before.iter().zip(after.iter()) {
            assert_ne!(a.id, b.id);
            assert_eq!(a.name, b.name);
            assert_eq!(a.relationship, b.relationship);
            assert_eq!(a.notes, b.notes);
            assert_eq!(a.images, b.images);
            assert_eq!(a.reference_embedding, b.reference_embedding);
            assert_eq!(a.created_at, b.created_at);
            assert_eq!(a.last_recognized, b.last_recognized);
        }
    }

    #[tokio::test]
    async fn test_import_appends_or_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("people.json");
        let store = SqliteStore::open_in_memory(None).await.unwrap();
        store.add(new_person("Alice", vec![0.5])).await.unwrap();
        export_to(&store, &file).await.unwrap();

        import_from(&store, &file, false).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        import_from(&store, &file, true).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_ignores_ids_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hand.json");
        tokio::fs::write(
            &file,
            r#"[{"id": "keep-me?", "name": "Carol", "reference_embedding": {"values": [0.1, 0.2]}}]"#,
        )
        .await
        .unwrap();

        let store = SqliteStore::open_in_memory(None).await.unwrap();
        let imported = import_from(&store, &file, false).await.unwrap();
        assert_ne!(imported[0].id, "keep-me?");
        assert!(imported[0].images.is_empty());
        assert!(imported[0].last_recognized.is_none());
    }

    #[tokio::test]
    async fn test_malformed_import_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.json");
        tokio::fs::write(&file, "{ not json").await.unwrap();

        let store = SqliteStore::open_in_memory(None).await.unwrap();
        store.add(new_person("Alice", vec![0.5])).await.unwrap();

        let err = import_from(&store, &file, true).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.count().await.unwrap(), 1);

        let missing = import_from(&store, &dir.path().join("nope.json"), false).await;
        assert!(matches!(missing, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_record_aborts_import() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("invalid.json");
        tokio::fs::write(
            &file,
            r#"[{"name": "Dan", "reference_embedding": {"values": [0.1]}},
                {"name": "", "reference_embedding": {"values": [0.2]}}]"#,
        )
        .await
        .unwrap();

        let store = SqliteStore::open_in_memory(None).await.unwrap();
        store.add(new_person("Eve", vec![0.3])).await.unwrap();
        assert!(matches!(
            import_from(&store, &file, true).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_replace_import_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("people.json");
        tokio::fs::write(
            &file,
            r#"[{"name": "Dan", "reference_embedding": {"values": [0.1]}},
                {"name": "Boom", "reference_embedding": {"values": [0.2]}}]"#,
        )
        .await
        .unwrap();

        let store = SqliteStore::open_in_memory(None).await.unwrap();
        let eve = store.add(new_person("Eve", vec![0.3])).await.unwrap();
        store.execute_batch(FAIL_ON_BOOM).await;

        let err = import_from(&store, &file, true).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        let people = store.list().await.unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].id, eve.id);
    }
}
