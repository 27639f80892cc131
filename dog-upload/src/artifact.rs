//! Finished uploads become media artifacts.
//!
//! The catalog is also where content-hash deduplication looks: a hash matches
//! only artifacts that are usable (processed) and not deleted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{UploadError, UploadResult};

/// Identifier of a media artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new() -> Self {
        Self(format!("med_{}", Uuid::new_v4().simple()))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse media category derived from the MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
}

impl MediaType {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            MediaType::Video
        } else {
            MediaType::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
        }
    }
}

/// Stored media object produced by a completed upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaArtifact {
    pub id: ArtifactId,
    pub owner_id: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub filename: String,
    pub size: u64,
    pub store_key: String,
    pub bucket: String,
    pub content_hash: Option<String>,
    /// Videos become usable after downstream processing; images immediately.
    pub processed: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to register a new artifact
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub owner_id: String,
    pub mime_type: String,
    pub filename: String,
    pub size: u64,
    pub store_key: String,
    pub bucket: String,
    pub content_hash: Option<String>,
}

impl MediaArtifact {
    pub fn from_new(new: NewArtifact) -> Self {
        let media_type = MediaType::from_mime(&new.mime_type);
        Self {
            id: ArtifactId::new(),
            owner_id: new.owner_id,
            media_type,
            mime_type: new.mime_type,
            filename: new.filename,
            size: new.size,
            store_key: new.store_key,
            bucket: new.bucket,
            content_hash: new.content_hash,
            processed: media_type == MediaType::Image,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Usable as a dedup target
    pub fn is_usable(&self) -> bool {
        !self.deleted && self.processed
    }
}

/// Registry of media artifacts
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    /// Usable artifact of this owner with the given content hash, if any
    async fn find_by_hash(&self, owner_id: &str, content_hash: &str) -> UploadResult<Option<MediaArtifact>>;

    async fn create(&self, artifact: NewArtifact) -> UploadResult<MediaArtifact>;

    async fn get(&self, id: &ArtifactId) -> UploadResult<MediaArtifact>;

    /// Flag an artifact as processed (videos after transcoding)
    async fn mark_processed(&self, id: &ArtifactId) -> UploadResult<MediaArtifact>;

    async fn mark_deleted(&self, id: &ArtifactId) -> UploadResult<()>;
}

/// In-memory artifact catalog
#[derive(Debug, Default)]
pub struct MemoryArtifactCatalog {
    artifacts: RwLock<HashMap<ArtifactId, MediaArtifact>>,
}

impl MemoryArtifactCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }

    pub fn all(&self) -> Vec<MediaArtifact> {
        self.artifacts.read().values().cloned().collect()
    }
}

#[async_trait]
impl ArtifactCatalog for MemoryArtifactCatalog {
    async fn find_by_hash(&self, owner_id: &str, content_hash: &str) -> UploadResult<Option<MediaArtifact>> {
        let artifacts = self.artifacts.read();
        let found = artifacts
            .values()
            .filter(|a| a.owner_id == owner_id && a.is_usable())
            .filter(|a| a.content_hash.as_deref() == Some(content_hash))
            .min_by_key(|a| a.created_at)
            .cloned();
        Ok(found)
    }

    async fn create(&self, artifact: NewArtifact) -> UploadResult<MediaArtifact> {
        let artifact = MediaArtifact::from_new(artifact);
        self.artifacts.write().insert(artifact.id.clone(), artifact.clone());
        Ok(artifact)
    }

    async fn get(&self, id: &ArtifactId) -> UploadResult<MediaArtifact> {
        self.artifacts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::not_found(format!("Media artifact {} not found", id)))
    }

    async fn mark_processed(&self, id: &ArtifactId) -> UploadResult<MediaArtifact> {
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts
            .get_mut(id)
            .ok_or_else(|| UploadError::not_found(format!("Media artifact {} not found", id)))?;
        artifact.processed = true;
        Ok(artifact.clone())
    }

    async fn mark_deleted(&self, id: &ArtifactId) -> UploadResult<()> {
        if let Some(artifact) = self.artifacts.write().get_mut(id) {
            artifact.deleted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_artifact(mime: &str, hash: &str) -> NewArtifact {
        NewArtifact {
            owner_id: "owner-1".into(),
            mime_type: mime.into(),
            filename: "f".into(),
            size: 10,
            store_key: "uploads/owner-1/f".into(),
            bucket: "uploads".into(),
            content_hash: Some(hash.into()),
        }
    }

    #[tokio::test]
    async fn images_are_dedup_targets_immediately() {
        let catalog = MemoryArtifactCatalog::new();
        let created = catalog.create(new_artifact("image/png", "h1")).await.unwrap();
        assert_eq!(created.media_type, MediaType::Image);

        let found = catalog.find_by_hash("owner-1", "h1").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(created.id));
    }

    #[tokio::test]
    async fn videos_match_only_after_processing() {
        let catalog = MemoryArtifactCatalog::new();
        let created = catalog.create(new_artifact("video/mp4", "h2")).await.unwrap();
        assert!(catalog.find_by_hash("owner-1", "h2").await.unwrap().is_none());

        catalog.mark_processed(&created.id).await.unwrap();
        assert!(catalog.find_by_hash("owner-1", "h2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleted_and_foreign_artifacts_never_match() {
        let catalog = MemoryArtifactCatalog::new();
        let created = catalog.create(new_artifact("image/jpeg", "h3")).await.unwrap();
        assert!(catalog.find_by_hash("owner-2", "h3").await.unwrap().is_none());

        catalog.mark_deleted(&created.id).await.unwrap();
        assert!(catalog.find_by_hash("owner-1", "h3").await.unwrap().is_none());
    }
}
