//! # dog-upload: resumable multipart uploads for DogRS
//!
//! `dog-upload` lets large media files reach an S3-compatible store in
//! independently retryable parts. Clients PUT bytes straight to the store with
//! presigned URLs; the coordinator only keeps the books, so uploads survive
//! disconnects and can be resumed or reconciled against the store at any time.
//!
//! ## Key Features
//!
//! - **Resumable**: sessions record every acknowledged part and can be resumed from any client
//! - **Store-authoritative**: `sync_with_store` heals drift and detects uploads the store has dropped
//! - **Deduplicated**: a content hash short-circuits to an existing artifact with no transfer
//! - **Stateless coordinators**: all state lives in a shared session store with atomic updates
//! - **Client included**: [`uploader::ChunkedUploader`] drives the whole protocol with retries,
//!   cancellation and progress reporting
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dog_upload::prelude::*;
//! use dog_upload::uploader::{BytesSource, ChunkedUploader, LocalControl, UploadOptions, UploaderConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let rules = ChunkRules::default().with_bounds(4, 1024).with_default_chunk_size(4);
//! let store = MemoryBlobStore::new();
//!
//! let coordinator = Arc::new(UploadCoordinator::new(
//!     store.clone(),
//!     MemoryUploadSessionStore::new(),
//!     MemoryArtifactCatalog::new(),
//!     UploadConfig::default().with_chunk_rules(rules.clone()),
//! ));
//!
//! let uploader = ChunkedUploader::new(
//!     LocalControl::new(coordinator, "user-123"),
//!     store,
//!     UploaderConfig::default().with_chunk_rules(rules),
//! );
//!
//! let source = BytesSource::new(&b"not really a video"[..], "clip.mp4", "video/mp4");
//! let outcome = uploader.upload(&source, UploadOptions::new()).await?;
//! assert_eq!(outcome.media_type(), MediaType::Video);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   control plane   ┌───────────────────┐
//! │ ChunkedUploader  │ ────────────────▶ │ UploadCoordinator │
//! └──────────────────┘                   ├───────────────────┤
//!          │ data plane (presigned PUT)   │ UploadSessionStore│
//!          ▼                              │ ArtifactCatalog   │
//! ┌──────────────────────────────────┐    └───────────────────┘
//! │ MultipartBlobStore (S3, memory)  │ ◀──── open / list / complete / abort
//! └──────────────────────────────────┘
//! ```

mod artifact;
mod chunking;
mod config;
mod coordinator;
mod error;
mod memory_store;
mod s3_store;
mod session_store;
#[cfg(feature = "sqlite")]
mod sqlite_store;
pub mod store;
mod types;
pub mod uploader;

pub use artifact::{ArtifactCatalog, ArtifactId, MediaArtifact, MediaType, MemoryArtifactCatalog, NewArtifact};
pub use chunking::{choose_chunk_size, ChunkPlan};
pub use config::{ChunkRules, UploadConfig, ENV_PREFIX};
pub use coordinator::UploadCoordinator;
pub use error::{ErrorKind, StoreError, StoreResult, UploadError, UploadResult};
pub use memory_store::{CallCounts, MemoryBlobStore, StoredObject};
pub use s3_store::{S3CompatibleStore, S3Config};
pub use session_store::{MemoryUploadSessionStore, SessionMutation, UploadSessionStore};
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteSessionStore;
pub use store::{
    CompletedObject, CompletedPart, DefaultKeyStrategy, MultipartBlobStore, PartsPage, RemotePart, StoreKeyStrategy,
};
pub use types::{
    normalize_etag, ActiveUpload, CompletedUpload, InitiateOutcome, InitiateRequest, MoreUrlsRequest,
    MoreUrlsResponse, NewSession, PartCompleteRequest, PartCompletion, PartStatus, PresignedPartUrl, SessionId,
    SessionStatus, UploadPart, UploadSession, UploadStatusReport,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChunkRules, InitiateOutcome, InitiateRequest, MediaType, MemoryArtifactCatalog, MemoryBlobStore,
        MemoryUploadSessionStore, SessionId, UploadConfig, UploadCoordinator, UploadError, UploadResult,
    };
}
