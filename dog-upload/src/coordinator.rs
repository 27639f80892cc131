use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::store::{list_all_parts, CompletedPart, DefaultKeyStrategy, MultipartBlobStore, StoreKeyStrategy};
use crate::{
    normalize_etag, ActiveUpload, ArtifactCatalog, ChunkPlan, CompletedUpload, InitiateOutcome, InitiateRequest,
    NewArtifact, NewSession, PartCompletion, PresignedPartUrl, SessionId, SessionStatus, StoreError, StoreResult,
    UploadConfig, UploadError, UploadResult, UploadSession, UploadSessionStore, UploadStatusReport,
};

const REMOTE_EXPIRED: &str = "Remote multipart upload expired";

/// Server-side state machine for resumable multipart uploads.
///
/// Holds no per-upload state of its own: every operation reads and writes the
/// shared session store, so any number of coordinators may serve one store.
/// Bytes never pass through here; clients PUT parts straight to the blob store
/// using presigned URLs minted by the coordinator.
pub struct UploadCoordinator {
    store: Arc<dyn MultipartBlobStore>,
    sessions: Arc<dyn UploadSessionStore>,
    artifacts: Arc<dyn ArtifactCatalog>,
    keys: Arc<dyn StoreKeyStrategy>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new<S, SS, A>(store: S, sessions: SS, artifacts: A, config: UploadConfig) -> Self
    where
        S: MultipartBlobStore + 'static,
        SS: UploadSessionStore + 'static,
        A: ArtifactCatalog + 'static,
    {
        Self::from_parts(Arc::new(store), Arc::new(sessions), Arc::new(artifacts), config)
    }

    /// Build from already-shared collaborators
    pub fn from_parts(
        store: Arc<dyn MultipartBlobStore>,
        sessions: Arc<dyn UploadSessionStore>,
        artifacts: Arc<dyn ArtifactCatalog>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            artifacts,
            keys: Arc::new(DefaultKeyStrategy::new()),
            config,
        }
    }

    pub fn with_key_strategy<K: StoreKeyStrategy + 'static>(mut self, keys: K) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<dyn UploadSessionStore> {
        &self.sessions
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactCatalog> {
        &self.artifacts
    }

    /// Start an upload, or short-circuit to an existing artifact with the same content.
    #[instrument(skip(self, request), fields(owner_id = %owner_id, filename = %request.filename))]
    pub async fn initiate(&self, owner_id: &str, request: InitiateRequest) -> UploadResult<InitiateOutcome> {
        validate_initiate(&request)?;

        if let Some(hash) = request.content_hash.as_deref().filter(|h| !h.is_empty()) {
            if let Some(artifact) = self.artifacts.find_by_hash(owner_id, hash).await? {
                info!(artifact_id = %artifact.id, "duplicate content, skipping upload");
                return Ok(InitiateOutcome::DuplicateFound {
                    artifact_id: artifact.id,
                    media_type: artifact.media_type,
                });
            }
        }

        let plan = ChunkPlan::for_upload(request.total_size, request.chunk_size, &self.config.chunk_rules)?;
        let store_key = self.keys.object_key(owner_id, &request.filename);

        let remote_upload_id = self
            .bounded(
                "open multipart upload",
                self.store
                    .open_multipart_upload(&self.config.bucket, &store_key, &request.mime_type),
            )
            .await?;

        let session = UploadSession::new(
            owner_id.to_string(),
            remote_upload_id,
            store_key,
            self.config.bucket.clone(),
            self.config.region.clone(),
            &request,
            &plan,
            deadline(Utc::now(), self.config.session_ttl),
        );

        let session = match self.sessions.create(session.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.abort_remote(&session).await;
                return Err(e);
            }
        };

        let first_batch: Vec<u32> = plan.part_numbers().take(self.config.url_batch_size).collect();
        let presigned_urls = self.mint_urls(&session, &first_batch).await?;

        info!(
            session_id = %session.id,
            total_parts = session.total_parts,
            chunk_size = session.chunk_size,
            "upload session created"
        );

        Ok(InitiateOutcome::NewSession(NewSession {
            session_id: session.id,
            remote_upload_id: session.remote_upload_id,
            total_parts: session.total_parts,
            chunk_size: session.chunk_size,
            expires_at: session.expires_at,
            presigned_urls,
        }))
    }

    /// Progress snapshot, optionally with fresh URLs for the next pending parts.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn get_status(
        &self,
        owner_id: &str,
        session_id: &SessionId,
        include_urls: bool,
    ) -> UploadResult<UploadStatusReport> {
        let session = self.load_owned(owner_id, session_id).await?;
        self.status_report(&session, include_urls).await
    }

    /// Mint URLs for specific parts
    #[instrument(skip(self, part_numbers), fields(owner_id = %owner_id, session_id = %session_id, count = part_numbers.len()))]
    pub async fn get_more_urls(
        &self,
        owner_id: &str,
        session_id: &SessionId,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartUrl>> {
        if part_numbers.is_empty() {
            return Err(UploadError::bad_request("Invalid part numbers provided"));
        }
        if part_numbers.len() > self.config.url_batch_size {
            return Err(UploadError::bad_request(format!(
                "Maximum {} URLs per request",
                self.config.url_batch_size
            )));
        }

        let session = self.load_owned(owner_id, session_id).await?;
        ensure_active(&session)?;

        let mut wanted = Vec::with_capacity(part_numbers.len());
        for &n in part_numbers {
            if session.part(n).is_none() {
                return Err(invalid_part(n));
            }
            if !wanted.contains(&n) {
                wanted.push(n);
            }
        }

        self.mint_urls(&session, &wanted).await
    }

    /// Record that the store acknowledged one part.
    ///
    /// Re-reporting the same etag is a no-op. A different etag for a completed
    /// part replaces it, since the store keeps the latest PUT of a part number.
    #[instrument(skip(self, etag), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn mark_part_completed(
        &self,
        owner_id: &str,
        session_id: &SessionId,
        part_number: u32,
        etag: &str,
    ) -> UploadResult<PartCompletion> {
        let etag = normalize_etag(etag);
        if etag.is_empty() {
            return Err(UploadError::bad_request("etag is required"));
        }

        self.load_owned(owner_id, session_id).await?;

        let mut replaced = false;
        let updated = self
            .sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                replaced = false;
                ensure_active(session)?;
                self.ensure_not_completing(session)?;

                let now = Utc::now();
                let part = session.part_mut(part_number).ok_or_else(|| invalid_part(part_number))?;

                if part.is_completed() {
                    if part.etag.as_deref() == Some(etag.as_str()) {
                        return Ok(());
                    }
                    replaced = true;
                }
                part.complete(etag.clone(), now);

                if session.status == SessionStatus::Pending {
                    session.status = SessionStatus::InProgress;
                }
                Ok(())
            })
            .await?;

        if replaced {
            warn!(part_number, "completed part re-reported with a different etag, keeping the latest");
        } else {
            debug!(part_number, "part completed");
        }

        Ok(PartCompletion {
            completed_parts: updated.completed_parts(),
            total_parts: updated.total_parts,
            progress: updated.progress(),
            replaced,
        })
    }

    /// Assemble the object from all parts and register the artifact.
    ///
    /// The caller first claims the session, so a second completion arriving
    /// while the store assembles the object is refused instead of racing it.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn complete_upload(&self, owner_id: &str, session_id: &SessionId) -> UploadResult<CompletedUpload> {
        let session = self.load_owned(owner_id, session_id).await?;
        ensure_completable(&session)?;

        let claim = Utc::now();
        let session = self
            .sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                ensure_completable(session)?;
                self.ensure_not_completing(session)?;

                let missing = session.pending_part_numbers();
                if !missing.is_empty() {
                    let listed: Vec<String> = missing.iter().map(u32::to_string).collect();
                    return Err(UploadError::bad_request(format!(
                        "Upload incomplete. Missing parts: {}",
                        listed.join(", ")
                    )));
                }

                session.completing_since = Some(claim);
                Ok(())
            })
            .await?;

        match self.complete_claimed(&session).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                self.release_claim(session_id, claim).await;
                Err(e)
            }
        }
    }

    async fn complete_claimed(&self, session: &UploadSession) -> UploadResult<CompletedUpload> {
        let mut parts: Vec<CompletedPart> = session
            .parts
            .iter()
            .filter_map(|p| {
                p.etag.as_ref().map(|etag| CompletedPart {
                    part_number: p.part_number,
                    etag: etag.clone(),
                })
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);

        let completed = self
            .bounded(
                "complete multipart upload",
                self.store.complete_multipart_upload(
                    &session.bucket,
                    &session.store_key,
                    &session.remote_upload_id,
                    &parts,
                ),
            )
            .await;

        let object = match completed {
            Ok(object) => object,
            Err(UploadError::Store {
                source: StoreError::UploadGone { .. },
            }) => {
                self.expire_session(&session.id, REMOTE_EXPIRED, session.completing_since)
                    .await;
                return Err(UploadError::conflict("Remote multipart upload has expired"));
            }
            Err(e) => return Err(e),
        };

        let artifact = self
            .artifacts
            .create(NewArtifact {
                owner_id: session.owner_id.clone(),
                mime_type: session.mime_type.clone(),
                filename: session.filename.clone(),
                size: session.total_size,
                store_key: session.store_key.clone(),
                bucket: session.bucket.clone(),
                content_hash: session.content_hash.clone(),
            })
            .await?;

        let artifact_id = artifact.id.clone();
        let marked = self
            .sessions
            .update(&session.id, &mut |session: &mut UploadSession| {
                ensure_active(session)?;
                session.status = SessionStatus::Completed;
                session.artifact_id = Some(artifact_id.clone());
                session.error_message = None;
                session.completing_since = None;
                Ok(())
            })
            .await;

        if let Err(e) = marked {
            warn!(artifact_id = %artifact.id, error = %e, "session changed during completion, retracting artifact");
            self.artifacts.mark_deleted(&artifact.id).await?;
            return Err(e);
        }

        info!(artifact_id = %artifact.id, media_type = artifact.media_type.as_str(), "upload completed");

        Ok(CompletedUpload {
            artifact_id: artifact.id,
            media_type: artifact.media_type,
            etag: object.etag,
            location: object.location,
        })
    }

    /// Discard an upload. A remote upload that is already gone counts as aborted.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn abort_upload(&self, owner_id: &str, session_id: &SessionId) -> UploadResult<()> {
        let session = self.load_owned(owner_id, session_id).await?;
        if session.status == SessionStatus::Completed {
            return Err(UploadError::conflict("Cannot abort a completed upload"));
        }
        ensure_active(&session)?;
        self.ensure_not_completing(&session)?;

        let aborted = self
            .bounded(
                "abort multipart upload",
                self.store
                    .abort_multipart_upload(&session.bucket, &session.store_key, &session.remote_upload_id),
            )
            .await;
        match aborted {
            Ok(()) => {}
            Err(UploadError::Store {
                source: StoreError::UploadGone { .. },
            }) => debug!("remote upload already gone"),
            Err(e) => return Err(e),
        }

        self.sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                ensure_active(session)?;
                self.ensure_not_completing(session)?;
                session.status = SessionStatus::Aborted;
                Ok(())
            })
            .await?;

        info!("upload aborted");
        Ok(())
    }

    /// Resumable sessions of one owner
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn list_active(&self, owner_id: &str) -> UploadResult<Vec<ActiveUpload>> {
        let now = Utc::now();
        let sessions = self.sessions.list_by_owner(owner_id).await?;

        Ok(sessions
            .iter()
            .filter(|s| matches!(s.status, SessionStatus::Pending | SessionStatus::InProgress))
            .filter(|s| s.expires_at > now)
            .map(ActiveUpload::from_session)
            .collect())
    }

    /// Reconcile local part state with the store's authoritative part list.
    ///
    /// Parts the store holds are marked completed with the store's etag; parts
    /// marked locally but missing remotely go back to pending. If the store
    /// lists nothing while parts were recorded, the remote upload is gone and
    /// the session expires.
    #[instrument(skip(self), fields(owner_id = %owner_id, session_id = %session_id))]
    pub async fn sync_with_store(&self, owner_id: &str, session_id: &SessionId) -> UploadResult<UploadStatusReport> {
        let session = self.load_owned(owner_id, session_id).await?;
        ensure_active(&session)?;
        self.ensure_not_completing(&session)?;

        let remote = self
            .bounded(
                "list parts",
                list_all_parts(
                    self.store.as_ref(),
                    &session.bucket,
                    &session.store_key,
                    &session.remote_upload_id,
                ),
            )
            .await?;

        if remote.is_empty() && session.has_completed_parts() {
            warn!("store lists no parts for a session with completed parts, expiring it");
            self.expire_session(session_id, REMOTE_EXPIRED, None).await;
            return Err(UploadError::conflict("Remote multipart upload has expired"));
        }

        let remote: HashMap<u32, _> = remote.into_iter().map(|p| (p.part_number, p)).collect();
        let mut healed = 0usize;

        let updated = self
            .sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                healed = 0;
                ensure_active(session)?;
                self.ensure_not_completing(session)?;

                let now = Utc::now();
                for part in session.parts.iter_mut() {
                    match remote.get(&part.part_number) {
                        Some(found) => {
                            let same = part.is_completed() && part.etag.as_deref() == Some(found.etag.as_str());
                            if !same {
                                part.complete(found.etag.clone(), found.modified_at.unwrap_or(now));
                            }
                        }
                        None if part.is_completed() => {
                            part.reset();
                            healed += 1;
                        }
                        None => {}
                    }
                }

                if session.status == SessionStatus::Pending && session.has_completed_parts() {
                    session.status = SessionStatus::InProgress;
                }
                Ok(())
            })
            .await?;

        if healed > 0 {
            warn!(healed, "parts recorded locally were missing from the store, reset to pending");
        }
        debug!(completed = updated.completed_parts(), total = updated.total_parts, "session synced");

        self.status_report(&updated, true).await
    }

    /// Expire every non-terminal session whose deadline has passed.
    ///
    /// Remote uploads are aborted best-effort. Returns how many sessions expired.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> UploadResult<usize> {
        let stale = self.sessions.list_expired(now).await?;
        let mut expired = 0;

        for session in stale {
            let result = self
                .sessions
                .update(&session.id, &mut |s: &mut UploadSession| {
                    ensure_active(s)?;
                    self.ensure_not_completing(s)?;
                    s.status = SessionStatus::Expired;
                    s.error_message = Some("Upload session expired".to_string());
                    Ok(())
                })
                .await;

            match result {
                Ok(_) => {
                    expired += 1;
                    self.abort_remote(&session).await;
                }
                Err(UploadError::Conflict { .. }) | Err(UploadError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if expired > 0 {
            info!(expired, "expired stale upload sessions");
        }
        Ok(expired)
    }

    async fn load_owned(&self, owner_id: &str, session_id: &SessionId) -> UploadResult<UploadSession> {
        let session = self.sessions.get(session_id).await?;
        if !session.is_owned_by(owner_id) {
            return Err(UploadError::forbidden("Not authorized to access this upload session"));
        }
        Ok(session)
    }

    async fn status_report(&self, session: &UploadSession, include_urls: bool) -> UploadResult<UploadStatusReport> {
        let presigned_urls = if include_urls && session.status.is_active() {
            let pending: Vec<u32> = session
                .pending_part_numbers()
                .into_iter()
                .take(self.config.url_batch_size)
                .collect();
            Some(self.mint_urls(session, &pending).await?)
        } else {
            None
        };

        Ok(UploadStatusReport::from_session(session, presigned_urls))
    }

    async fn mint_urls(&self, session: &UploadSession, part_numbers: &[u32]) -> UploadResult<Vec<PresignedPartUrl>> {
        let ttl = self.config.presign_ttl;
        let expires_at = deadline(Utc::now(), ttl);

        let urls = try_join_all(part_numbers.iter().map(|&part_number| async move {
            let url = self
                .bounded(
                    "presign part",
                    self.store.presign_part(
                        &session.bucket,
                        &session.store_key,
                        &session.remote_upload_id,
                        part_number,
                        ttl,
                    ),
                )
                .await?;
            Ok::<_, UploadError>(PresignedPartUrl {
                part_number,
                url,
                expires_at,
            })
        }))
        .await?;

        debug!(count = urls.len(), "minted presigned part urls");
        Ok(urls)
    }

    /// Expire a session unless someone else holds its completion claim
    async fn expire_session(&self, session_id: &SessionId, message: &str, claim: Option<DateTime<Utc>>) {
        let result = self
            .sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                ensure_active(session)?;
                if session.completing_since != claim {
                    self.ensure_not_completing(session)?;
                }
                session.status = SessionStatus::Expired;
                session.error_message = Some(message.to_string());
                session.completing_since = None;
                Ok(())
            })
            .await;

        if let Err(e) = result {
            debug!(error = %e, "session not expired");
        }
    }

    async fn release_claim(&self, session_id: &SessionId, claim: DateTime<Utc>) {
        let result = self
            .sessions
            .update(session_id, &mut |session: &mut UploadSession| {
                if session.completing_since == Some(claim) {
                    session.completing_since = None;
                }
                Ok(())
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "completion claim not released");
        }
    }

    /// How long a completion claim shuts out other callers
    fn completion_lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.store_timeout.saturating_mul(2))
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }

    fn ensure_not_completing(&self, session: &UploadSession) -> UploadResult<()> {
        if session.completion_claimed(Utc::now(), self.completion_lease()) {
            return Err(UploadError::conflict("Upload completion in progress"));
        }
        Ok(())
    }

    async fn abort_remote(&self, session: &UploadSession) {
        let result = self
            .bounded(
                "abort multipart upload",
                self.store
                    .abort_multipart_upload(&session.bucket, &session.store_key, &session.remote_upload_id),
            )
            .await;

        if let Err(e) = result {
            warn!(session_id = %session.id, error = %e, "failed to abort remote upload");
        }
    }

    /// Run one store call under the configured timeout
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> UploadResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(UploadError::from),
            Err(_) => {
                warn!(operation, timeout = ?self.config.store_timeout, "blob store call timed out");
                Err(UploadError::timeout(operation))
            }
        }
    }
}

fn ensure_active(session: &UploadSession) -> UploadResult<()> {
    if session.status.is_terminal() {
        return Err(UploadError::conflict(format!("Upload session is {}", session.status)));
    }
    Ok(())
}

fn ensure_completable(session: &UploadSession) -> UploadResult<()> {
    if session.status == SessionStatus::Completed {
        return Err(UploadError::conflict("Upload already completed"));
    }
    ensure_active(session)
}

fn invalid_part(part_number: u32) -> UploadError {
    UploadError::bad_request(format!("Invalid part number: {}", part_number))
}

fn deadline(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| from.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn validate_initiate(request: &InitiateRequest) -> UploadResult<()> {
    if request.filename.trim().is_empty() {
        return Err(UploadError::bad_request("filename is required"));
    }
    if !is_supported_mime(&request.mime_type) {
        return Err(UploadError::bad_request(format!(
            "Unsupported mimeType {:?}: only video/* and image/* are accepted",
            request.mime_type
        )));
    }
    if request.total_size == 0 {
        return Err(UploadError::bad_request("totalSize must be at least 1 byte"));
    }
    Ok(())
}

/// `video/<subtype>` or `image/<subtype>` with a lowercase token subtype
fn is_supported_mime(mime: &str) -> bool {
    let Some((kind, subtype)) = mime.split_once('/') else {
        return false;
    };
    matches!(kind, "video" | "image")
        && !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '+' | '-'))
}
