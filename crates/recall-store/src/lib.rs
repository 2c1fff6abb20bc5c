//! recall-store — SQLite persistence for enrolled people.
//!
//! Implements [`recall_core::PersonStore`] on top of tokio-rusqlite, seals
//! embeddings with AES-256-GCM when a key is configured, and moves the whole
//! store in and out of JSON files.

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod sqlite;

pub use cipher::EmbeddingCipher;
pub use error::StoreError;
pub use exchange::{export_to, import_from, read_export};
pub use sqlite::SqliteStore;
