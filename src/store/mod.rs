// ABOUTME: Persistence port for tracked-token snapshots
// ABOUTME: Exports the TokenStore trait, its errors and the file-backed implementation

pub mod file;

pub use file::FileTokenStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::parser::{ParserError, TrackedToken};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token not found: {uuid}")]
    NotFound { uuid: Uuid },

    #[error("Store IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt snapshot for token {uuid}: {source}")]
    Corrupt {
        uuid: Uuid,
        #[source]
        source: ParserError,
    },

    #[error("Failed to serialize token {uuid}: {source}")]
    Serialization {
        uuid: Uuid,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Load/save boundary around a tick. A snapshot is saved only after a tick succeeds.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, uuid: Uuid) -> Result<TrackedToken>;
    async fn save(&self, token: &TrackedToken) -> Result<()>;
    async fn list(&self) -> Result<Vec<Uuid>>;
}
