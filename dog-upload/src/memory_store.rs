//! In-process stand-in for an S3-compatible store.
//!
//! Implements both sides of the protocol: the multipart primitives the
//! coordinator calls and the presigned PUT the uploader performs, so a whole
//! upload can run without a network. Test hooks let callers expire uploads,
//! inject transient PUT failures and force pagination.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::{CompletedObject, CompletedPart, MultipartBlobStore, PartsPage, RemotePart};
use crate::uploader::PartTransport;
use crate::{normalize_etag, StoreError, StoreResult, UploadError, UploadResult};

#[derive(Debug, Clone)]
struct StoredPart {
    etag: String,
    data: Bytes,
    modified_at: DateTime<Utc>,
}

#[derive(Debug)]
struct OpenUpload {
    bucket: String,
    key: String,
    content_type: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Clone)]
struct MintedUrl {
    upload_id: String,
    part_number: u32,
    expires_at: DateTime<Utc>,
}

/// An assembled object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub etag: String,
}

/// How many times each primitive has been called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub opened: usize,
    pub presigned: usize,
    pub listed: usize,
    pub completed: usize,
    pub aborted: usize,
    pub part_puts: usize,
}

#[derive(Debug)]
struct State {
    uploads: HashMap<String, OpenUpload>,
    objects: HashMap<(String, String), StoredObject>,
    urls: HashMap<String, MintedUrl>,
    calls: CallCounts,
    page_size: usize,
    failing_puts: u32,
    omit_etags: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            uploads: HashMap::new(),
            objects: HashMap::new(),
            urls: HashMap::new(),
            calls: CallCounts::default(),
            page_size: 1000,
            failing_puts: 0,
            omit_etags: false,
        }
    }
}

/// Memory-backed multipart store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size used by `list_parts`
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().page_size = page_size.max(1);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Forget a multipart upload as if the store's lifecycle rule removed it.
    pub fn expire_upload(&self, upload_id: &str) {
        self.state.lock().uploads.remove(upload_id);
    }

    pub fn has_upload(&self, upload_id: &str) -> bool {
        self.state.lock().uploads.contains_key(upload_id)
    }

    /// Part numbers the store holds for an open upload
    pub fn stored_parts(&self, upload_id: &str) -> Vec<u32> {
        self.state
            .lock()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Put a part directly, bypassing presigned URLs. Returns the unquoted etag.
    pub fn insert_part(&self, upload_id: &str, part_number: u32, data: Bytes) -> StoreResult<String> {
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::upload_gone(upload_id))?;
        let etag = content_etag(&data);
        upload.parts.insert(
            part_number,
            StoredPart {
                etag: etag.clone(),
                data,
                modified_at: Utc::now(),
            },
        );
        Ok(etag)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// The next `count` part PUTs fail with a transient error.
    pub fn fail_next_part_puts(&self, count: u32) {
        self.state.lock().failing_puts = count;
    }

    /// Part PUTs succeed but return no etag header.
    pub fn omit_etags(&self, omit: bool) {
        self.state.lock().omit_etags = omit;
    }
}

fn content_etag(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[async_trait]
impl MultipartBlobStore for MemoryBlobStore {
    async fn open_multipart_upload(&self, bucket: &str, key: &str, content_type: &str) -> StoreResult<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let mut state = self.state.lock();
        state.calls.opened += 1;
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> StoreResult<String> {
        let ttl = chrono::Duration::from_std(ttl).map_err(StoreError::backend)?;
        let url = format!(
            "memory://{}/{}?uploadId={}&partNumber={}&signature={}",
            bucket,
            key,
            upload_id,
            part_number,
            Uuid::new_v4().simple()
        );

        let mut state = self.state.lock();
        state.calls.presigned += 1;
        state.urls.insert(
            url.clone(),
            MintedUrl {
                upload_id: upload_id.to_string(),
                part_number,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(url)
    }

    async fn list_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<PartsPage> {
        let marker = match page_token {
            Some(token) => token
                .parse::<u32>()
                .map_err(|_| StoreError::invalid_response(format!("bad page token {:?}", token)))?,
            None => 0,
        };

        let mut state = self.state.lock();
        state.calls.listed += 1;
        let page_size = state.page_size;
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StoreError::upload_gone(upload_id))?;

        let mut remaining = upload.parts.range(marker.saturating_add(1)..);
        let parts: Vec<RemotePart> = remaining
            .by_ref()
            .take(page_size)
            .map(|(number, part)| RemotePart {
                part_number: *number,
                etag: part.etag.clone(),
                size: part.data.len() as u64,
                modified_at: Some(part.modified_at),
            })
            .collect();
        let more = remaining.next().is_some();
        let next_page_token = if more {
            parts.last().map(|p| p.part_number.to_string())
        } else {
            None
        };

        Ok(PartsPage {
            parts,
            more,
            next_page_token,
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<CompletedObject> {
        let mut state = self.state.lock();
        state.calls.completed += 1;

        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| StoreError::upload_gone(upload_id))?;

        if parts.is_empty() {
            return Err(StoreError::invalid_response("no parts given"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::invalid_response("parts must be in ascending order"));
        }

        let mut body = BytesMut::new();
        for part in parts {
            let stored = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::invalid_response(format!("part {} was never uploaded", part.part_number))
            })?;
            if stored.etag != normalize_etag(&part.etag) {
                return Err(StoreError::invalid_response(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            body.extend_from_slice(&stored.data);
        }

        let data = body.freeze();
        let etag = format!("{}-{}", content_etag(&data), parts.len());
        let content_type = upload.content_type.clone();
        let (upload_bucket, upload_key) = (upload.bucket.clone(), upload.key.clone());
        if upload_bucket != bucket || upload_key != key {
            return Err(StoreError::invalid_response("upload belongs to another object"));
        }

        state.uploads.remove(upload_id);
        state.urls.retain(|_, minted| minted.upload_id != upload_id);
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type,
                etag: etag.clone(),
            },
        );

        Ok(CompletedObject {
            etag: Some(etag),
            location: Some(format!("memory://{}/{}", bucket, key)),
        })
    }

    async fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.calls.aborted += 1;
        state.uploads.remove(upload_id);
        state.urls.retain(|_, minted| minted.upload_id != upload_id);
        Ok(())
    }
}

#[async_trait]
impl PartTransport for MemoryBlobStore {
    async fn put_part(&self, url: &str, body: Bytes) -> UploadResult<Option<String>> {
        let mut state = self.state.lock();
        state.calls.part_puts += 1;

        if state.failing_puts > 0 {
            state.failing_puts -= 1;
            return Err(UploadError::transient("connection reset by peer"));
        }

        let minted = state
            .urls
            .get(url)
            .cloned()
            .ok_or_else(|| UploadError::url_rejected("403 Forbidden: unknown signature"))?;
        if minted.expires_at <= Utc::now() {
            return Err(UploadError::url_rejected("403 Forbidden: request has expired"));
        }

        let omit_etags = state.omit_etags;
        let upload = state
            .uploads
            .get_mut(&minted.upload_id)
            .ok_or_else(|| UploadError::permanent("404 Not Found: NoSuchUpload"))?;

        let etag = content_etag(&body);
        upload.parts.insert(
            minted.part_number,
            StoredPart {
                etag: etag.clone(),
                data: body,
                modified_at: Utc::now(),
            },
        );

        if omit_etags {
            Ok(None)
        } else {
            Ok(Some(format!("\"{}\"", etag)))
        }
    }
}
