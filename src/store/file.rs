// ABOUTME: File-backed token store keeping one JSON snapshot per tracked token
// ABOUTME: Writes through a temporary file and rename so readers never see partial snapshots

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{Result, StoreError, TokenStore};
use crate::parser::TrackedToken;

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    root: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, uuid: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", uuid))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, uuid: Uuid) -> Result<TrackedToken> {
        let path = self.path_for(uuid);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { uuid });
            }
            Err(e) => return Err(e.into()),
        };

        TrackedToken::from_json(&content).map_err(|source| StoreError::Corrupt { uuid, source })
    }

    async fn save(&self, token: &TrackedToken) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let content = serde_json::to_string_pretty(token).map_err(|source| {
            StoreError::Serialization {
                uuid: token.uuid,
                source,
            }
        })?;
        let path = self.path_for(token.uuid);
        let staging = self.root.join(format!(".{}.json.tmp", token.uuid));
        fs::write(&staging, content).await?;
        fs::rename(&staging, &path).await?;

        debug!("Saved token {} to {}", token.uuid, path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let mut uuids = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(uuids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(uuid) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            {
                uuids.push(uuid);
            }
        }

        uuids.sort();
        Ok(uuids)
    }
}
