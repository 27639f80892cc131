//! Client half of the protocol.
//!
//! The [`ChunkedUploader`] slices a source into parts, PUTs each part straight
//! to the blob store through a presigned URL and reports it to the
//! coordinator. A cancelled or failed run leaves every already-reported part
//! in place, so [`ChunkedUploader::resume_upload`] picks up where it stopped.

mod control;
mod hash;
mod progress;
mod retry;
mod source;
mod transport;
mod url_cache;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    choose_chunk_size, ArtifactId, ChunkPlan, ChunkRules, CompletedUpload, InitiateOutcome, InitiateRequest,
    MediaType, PresignedPartUrl, SessionId, UploadError, UploadResult,
};

#[cfg(feature = "http-client")]
pub use control::HttpControl;
pub use control::{LocalControl, UploadControl, OWNER_HEADER};
pub use hash::content_hash;
pub use progress::{progress_fn, FnProgress, NoOpProgress, ProgressCallback, UploadProgress};
pub use retry::{ExponentialBackoff, FixedBackoff, RetryPolicy};
pub use source::{BytesSource, FileSource, UploadSource};
#[cfg(feature = "http-client")]
pub use transport::HttpPartTransport;
pub use transport::PartTransport;
pub use url_cache::PresignedUrlCache;

use progress::ProgressTracker;

/// Configuration for the chunked uploader
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Retries per part after the first attempt
    pub max_retries: u32,

    pub retry_policy: Arc<dyn RetryPolicy>,

    /// Upper bound on any single network call
    pub request_timeout: Duration,

    /// Hash the whole source before initiating, enabling dedup
    pub compute_hash: bool,

    /// Parts in flight at once (1 = sequential)
    pub part_concurrency: usize,

    /// URLs requested per refill
    pub url_batch_size: usize,

    /// Must match the coordinator's rules so part counts agree
    pub chunk_rules: ChunkRules,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_policy: Arc::new(ExponentialBackoff::default()),
            request_timeout: Duration::from_secs(30),
            compute_hash: true,
            part_concurrency: 1,
            url_batch_size: 50,
            chunk_rules: ChunkRules::default(),
        }
    }
}

impl UploaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_compute_hash(mut self, enabled: bool) -> Self {
        self.compute_hash = enabled;
        self
    }

    pub fn with_part_concurrency(mut self, parts: usize) -> Self {
        self.part_concurrency = parts.max(1);
        self
    }

    pub fn with_url_batch_size(mut self, size: usize) -> Self {
        self.url_batch_size = size.max(1);
        self
    }

    pub fn with_chunk_rules(mut self, rules: ChunkRules) -> Self {
        self.chunk_rules = rules;
        self
    }
}

/// Per-call options
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Preferred chunk size, clamped by the chunk rules
    pub chunk_size: Option<u64>,

    /// Precomputed content hash; skips hashing the source
    pub content_hash: Option<String>,

    pub progress: Option<Arc<dyn ProgressCallback>>,

    /// Cancels every network call of the upload
    pub cancel: CancellationToken,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn with_content_hash<S: Into<String>>(mut self, hash: S) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_progress<P: ProgressCallback + 'static>(mut self, progress: P) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// How an upload finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Bytes were transferred and the object assembled
    Uploaded {
        session_id: SessionId,
        result: CompletedUpload,
    },
    /// Content already existed; nothing was transferred
    Duplicate {
        artifact_id: ArtifactId,
        media_type: MediaType,
    },
}

impl UploadOutcome {
    pub fn artifact_id(&self) -> &ArtifactId {
        match self {
            Self::Uploaded { result, .. } => &result.artifact_id,
            Self::Duplicate { artifact_id, .. } => artifact_id,
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Uploaded { result, .. } => result.media_type,
            Self::Duplicate { media_type, .. } => *media_type,
        }
    }
}

/// URL bookkeeping shared by the parts of one run
struct RunState {
    urls: PresignedUrlCache,
    pending: Vec<u32>,
    done: HashSet<u32>,
}

/// Drives resumable uploads against an [`UploadControl`] and a [`PartTransport`]
pub struct ChunkedUploader {
    control: Arc<dyn UploadControl>,
    transport: Arc<dyn PartTransport>,
    config: UploaderConfig,
}

impl ChunkedUploader {
    pub fn new<C, T>(control: C, transport: T, config: UploaderConfig) -> Self
    where
        C: UploadControl + 'static,
        T: PartTransport + 'static,
    {
        Self::from_parts(Arc::new(control), Arc::new(transport), config)
    }

    pub fn from_parts(control: Arc<dyn UploadControl>, transport: Arc<dyn PartTransport>, config: UploaderConfig) -> Self {
        Self {
            control,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Upload a whole source, or return the existing artifact if its content is known.
    pub async fn upload(&self, source: &dyn UploadSource, options: UploadOptions) -> UploadResult<UploadOutcome> {
        let cancel = options.cancel.clone();
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let chunk_size = choose_chunk_size(source.len(), options.chunk_size, &self.config.chunk_rules);
        let content_hash = match options.content_hash.clone() {
            Some(hash) => Some(hash),
            None if self.config.compute_hash => self.hash_source(source, &cancel).await?,
            None => None,
        };

        let mut request = InitiateRequest::new(source.name(), source.mime_type(), source.len()).with_chunk_size(chunk_size);
        request.content_hash = content_hash;

        let outcome = self
            .guarded(&cancel, "initiate", self.control.initiate(request))
            .await?;

        let session = match outcome {
            InitiateOutcome::DuplicateFound {
                artifact_id,
                media_type,
            } => {
                info!(artifact_id = %artifact_id, "content already uploaded, nothing to transfer");
                return Ok(UploadOutcome::Duplicate {
                    artifact_id,
                    media_type,
                });
            }
            InitiateOutcome::NewSession(session) => session,
        };

        if session.chunk_size != chunk_size {
            debug!(
                requested = chunk_size,
                assigned = session.chunk_size,
                "coordinator assigned a different chunk size"
            );
        }

        let plan = ChunkPlan::new(source.len(), session.chunk_size)?;
        if plan.total_parts != session.total_parts {
            return Err(UploadError::integrity(format!(
                "coordinator expects {} parts but the source splits into {}",
                session.total_parts, plan.total_parts
            )));
        }

        info!(session_id = %session.session_id, total_parts = plan.total_parts, "uploading parts");
        let pending: Vec<u32> = plan.part_numbers().collect();
        self.run(&session.session_id, source, &plan, pending, session.presigned_urls, &options)
            .await?;

        self.finish(session.session_id, &cancel).await
    }

    /// Continue an interrupted session with the same source.
    pub async fn resume_upload(
        &self,
        session_id: &SessionId,
        source: &dyn UploadSource,
        options: UploadOptions,
    ) -> UploadResult<UploadOutcome> {
        let cancel = options.cancel.clone();
        let status = self
            .guarded(&cancel, "status", self.control.status(session_id, true))
            .await?;

        if status.status.is_terminal() {
            return Err(UploadError::conflict(format!("Upload session is {}", status.status)));
        }
        if status.total_size != source.len() {
            return Err(UploadError::bad_request(format!(
                "source is {} bytes but the session expects {}",
                source.len(),
                status.total_size
            )));
        }

        let plan = ChunkPlan::new(status.total_size, status.chunk_size)?;
        info!(
            session_id = %session_id,
            remaining = status.pending_part_numbers.len(),
            total_parts = plan.total_parts,
            "resuming upload"
        );

        self.run(
            session_id,
            source,
            &plan,
            status.pending_part_numbers,
            status.presigned_urls.unwrap_or_default(),
            &options,
        )
        .await?;

        self.finish(session_id.clone(), &cancel).await
    }

    /// Give up on a session and discard its parts
    pub async fn abort(&self, session_id: &SessionId) -> UploadResult<()> {
        self.control.abort(session_id).await
    }

    async fn finish(&self, session_id: SessionId, cancel: &CancellationToken) -> UploadResult<UploadOutcome> {
        let result = self
            .guarded(cancel, "complete", self.control.complete(&session_id))
            .await?;
        info!(session_id = %session_id, artifact_id = %result.artifact_id, "upload finished");
        Ok(UploadOutcome::Uploaded { session_id, result })
    }

    async fn hash_source(&self, source: &dyn UploadSource, cancel: &CancellationToken) -> UploadResult<Option<String>> {
        let hashed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            hashed = content_hash(source) => hashed,
        };

        match hashed {
            Ok(hash) => Ok(Some(hash)),
            Err(e) => {
                warn!(error = %e, "content hash failed, uploading without dedup");
                Ok(None)
            }
        }
    }

    async fn run(
        &self,
        session_id: &SessionId,
        source: &dyn UploadSource,
        plan: &ChunkPlan,
        pending: Vec<u32>,
        urls: Vec<PresignedPartUrl>,
        options: &UploadOptions,
    ) -> UploadResult<()> {
        let cancel = &options.cancel;
        let already_done = plan.total_parts.saturating_sub(pending.len() as u32);
        let remaining: HashSet<u32> = pending.iter().copied().collect();
        let already_bytes: u64 = plan
            .part_numbers()
            .filter(|n| !remaining.contains(n))
            .filter_map(|n| plan.part_size(n))
            .sum();
        let mut tracker = ProgressTracker::new(plan.total_parts, plan.total_size, already_done, already_bytes);

        let mut cache = PresignedUrlCache::default();
        cache.extend(urls);
        let state = Mutex::new(RunState {
            urls: cache,
            pending: pending.clone(),
            done: HashSet::new(),
        });

        let mut parts = stream::iter(pending)
            .map(|n| self.upload_part(session_id, source, plan, n, &state, cancel))
            .buffer_unordered(self.config.part_concurrency.max(1));

        while let Some(result) = parts.next().await {
            let (part_number, bytes) = result?;
            let progress = tracker.record_part(bytes);
            debug!(part_number, percent = progress.percent, "part uploaded");

            if let Some(callback) = &options.progress {
                if !callback.on_progress(&progress) {
                    info!(session_id = %session_id, "upload cancelled by progress callback");
                    cancel.cancel();
                    return Err(UploadError::Cancelled);
                }
            }
        }

        Ok(())
    }

    async fn upload_part(
        &self,
        session_id: &SessionId,
        source: &dyn UploadSource,
        plan: &ChunkPlan,
        part_number: u32,
        state: &Mutex<RunState>,
        cancel: &CancellationToken,
    ) -> UploadResult<(u32, u64)> {
        let range = plan
            .part_range(part_number)
            .ok_or_else(|| UploadError::bad_request(format!("Invalid part number: {}", part_number)))?;
        let size = range.end - range.start;
        let body = source.read_range(range).await?;

        let etag = self
            .put_with_retries(session_id, part_number, body, state, cancel)
            .await?;

        let mut attempt = 0;
        loop {
            let reported = self
                .guarded(
                    cancel,
                    "part complete",
                    self.control.part_complete(session_id, part_number, &etag),
                )
                .await;
            match reported {
                Ok(_) => break,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(part_number, attempt, error = %e, "reporting part failed, retrying");
                    self.backoff(attempt, cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }

        state.lock().await.done.insert(part_number);
        Ok((part_number, size))
    }

    async fn put_with_retries(
        &self,
        session_id: &SessionId,
        part_number: u32,
        body: Bytes,
        state: &Mutex<RunState>,
        cancel: &CancellationToken,
    ) -> UploadResult<String> {
        let mut attempt = 0;
        let mut reminted = false;
        loop {
            let url = self.url_for(session_id, part_number, state, cancel).await?;
            let result = self
                .guarded(cancel, "part upload", self.transport.put_part(&url, body.clone()))
                .await;

            match result {
                Ok(Some(etag)) => return Ok(etag),
                Ok(None) => {
                    return Err(UploadError::integrity(format!(
                        "store response for part {} carried no etag",
                        part_number
                    )))
                }
                Err(e) if e.is_url_rejected() && !reminted => {
                    reminted = true;
                    warn!(part_number, error = %e, "presigned url rejected, minting a fresh one");
                    state.lock().await.urls.invalidate(part_number);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(part_number, attempt, error = %e, "part upload failed, retrying");
                    state.lock().await.urls.invalidate(part_number);
                    self.backoff(attempt, cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A fresh URL for `part_number`, refilling the cache in one batch when needed.
    async fn url_for(
        &self,
        session_id: &SessionId,
        part_number: u32,
        state: &Mutex<RunState>,
        cancel: &CancellationToken,
    ) -> UploadResult<String> {
        let mut state = state.lock().await;
        let now = Utc::now();
        if let Some(url) = state.urls.fresh(part_number, now) {
            return Ok(url.to_string());
        }

        let mut batch = vec![part_number];
        batch.extend(
            state
                .pending
                .iter()
                .copied()
                .filter(|&n| n != part_number && !state.done.contains(&n) && !state.urls.is_fresh(n, now))
                .take(self.config.url_batch_size.saturating_sub(1)),
        );

        debug!(part_number, count = batch.len(), "requesting presigned urls");
        let urls = self
            .guarded(cancel, "more urls", self.control.more_urls(session_id, &batch))
            .await?;
        state.urls.evict_stale(now);
        state.urls.extend(urls);

        // A URL minted just now is used even if its lifetime is shorter than the staleness margin
        let now = Utc::now();
        state
            .urls
            .fresh(part_number, now)
            .or_else(|| state.urls.unexpired(part_number, now))
            .map(str::to_string)
            .ok_or_else(|| {
                UploadError::integrity(format!("coordinator returned no usable URL for part {}", part_number))
            })
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> UploadResult<()> {
        let delay = self.config.retry_policy.delay(attempt);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Run one network call under the shared cancellation signal and the request timeout
    async fn guarded<T, F>(&self, cancel: &CancellationToken, operation: &'static str, call: F) -> UploadResult<T>
    where
        F: Future<Output = UploadResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = tokio::time::timeout(self.config.request_timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(UploadError::timeout(operation)),
            },
        }
    }
}
