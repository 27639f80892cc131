use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

use crate::{StoreError, StoreResult};

/// Multipart primitives of an S3-compatible object store.
///
/// Adapters report a vanished remote upload as [`StoreError::UploadGone`]
/// so the coordinator can mark the session expired instead of failing.
#[async_trait]
pub trait MultipartBlobStore: Send + Sync {
    /// Open a multipart upload and return the store's upload id
    async fn open_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StoreResult<String>;

    /// Mint a URL that authorizes a direct PUT of one part
    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> StoreResult<String>;

    /// One page of the parts the store has received
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<PartsPage>;

    /// Assemble the final object from the given parts
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<CompletedObject>;

    /// Discard the upload. Aborting an upload that no longer exists succeeds.
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()>;
}

/// A part the store has received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePart {
    pub part_number: u32,
    /// Unquoted etag
    pub etag: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// One page of a part listing
#[derive(Debug, Clone, Default)]
pub struct PartsPage {
    pub parts: Vec<RemotePart>,
    pub more: bool,
    pub next_page_token: Option<String>,
}

/// Part reference handed to `complete_multipart_upload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// The assembled object
#[derive(Debug, Clone, Default)]
pub struct CompletedObject {
    pub etag: Option<String>,
    pub location: Option<String>,
}

/// Drain every page of a part listing.
///
/// A vanished upload lists as empty; callers that care check expiry separately.
/// A page that claims more parts without a token to fetch them fails the whole
/// listing, since a partial list would read as parts missing from the store.
pub async fn list_all_parts(
    store: &dyn MultipartBlobStore,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> StoreResult<Vec<RemotePart>> {
    let mut parts = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = match store.list_parts(bucket, key, upload_id, token.as_deref()).await {
            Ok(page) => page,
            Err(StoreError::UploadGone { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        parts.extend(page.parts);

        match (page.more, page.next_page_token) {
            (true, Some(next)) => token = Some(next),
            (true, None) => {
                tracing::warn!(upload_id, listed = parts.len(), "store reported more parts without a page token");
                return Err(StoreError::invalid_response(
                    "part listing is truncated but carries no page token",
                ));
            }
            (false, _) => break,
        }
    }

    parts.sort_by_key(|p| p.part_number);
    Ok(parts)
}

/// Chooses the object key for a new upload
pub trait StoreKeyStrategy: Send + Sync {
    fn object_key(&self, owner_id: &str, filename: &str) -> String;
}

/// `uploads/{owner}/{unix_millis}-{random}-{sanitized filename}`
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy {
    prefix: String,
}

impl DefaultKeyStrategy {
    pub fn new() -> Self {
        Self::with_prefix("uploads")
    }

    pub fn with_prefix<S: Into<String>>(prefix: S) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for DefaultKeyStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreKeyStrategy for DefaultKeyStrategy {
    fn object_key(&self, owner_id: &str, filename: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();

        format!(
            "{}/{}/{}-{}-{}",
            self.prefix,
            sanitize_filename(owner_id),
            Utc::now().timestamp_millis(),
            suffix,
            sanitize_filename(filename)
        )
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
