use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no person with id {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("key file {0} is too short (need at least 32 bytes)")]
    InvalidKey(String),
    #[error("record {0} holds an encrypted embedding but encryption is disabled")]
    Locked(String),
    #[error("embedding encryption failed")]
    Seal,
    #[error("embedding decryption failed (wrong key or corrupted record)")]
    Unseal,
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.into())
    }
}

impl From<StoreError> for recall_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => recall_core::Error::NotFound(id),
            other => recall_core::Error::Storage(other.to_string()),
        }
    }
}
