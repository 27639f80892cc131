use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dog_upload::{
    ArtifactCatalog, CompletedObject, CompletedPart, InitiateOutcome, InitiateRequest, MediaType,
    MemoryArtifactCatalog, MemoryBlobStore, MemoryUploadSessionStore, MultipartBlobStore, NewArtifact, NewSession,
    PartStatus, PartsPage, SessionId, SessionStatus, StoreResult, UploadConfig, UploadCoordinator, UploadError,
};

const MIB: u64 = 1024 * 1024;
const OWNER: &str = "user-1";

struct Harness {
    store: MemoryBlobStore,
    artifacts: Arc<MemoryArtifactCatalog>,
    coordinator: Arc<UploadCoordinator>,
}

fn harness_with(config: UploadConfig, store: MemoryBlobStore) -> Harness {
    harness_over(config, store.clone(), Arc::new(store))
}

/// `store` stays reachable for test hooks while the coordinator talks to `blobs`
fn harness_over(config: UploadConfig, store: MemoryBlobStore, blobs: Arc<dyn MultipartBlobStore>) -> Harness {
    let artifacts = Arc::new(MemoryArtifactCatalog::new());
    let coordinator = Arc::new(UploadCoordinator::from_parts(
        blobs,
        Arc::new(MemoryUploadSessionStore::new()),
        artifacts.clone(),
        config,
    ));
    Harness {
        store,
        artifacts,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(UploadConfig::default(), MemoryBlobStore::new())
}

async fn start(h: &Harness, mime: &str, total: u64, chunk: u64) -> NewSession {
    let request = InitiateRequest::new("clip", mime, total).with_chunk_size(chunk);
    match h.coordinator.initiate(OWNER, request).await.unwrap() {
        InitiateOutcome::NewSession(session) => session,
        other => panic!("expected a new session, got {:?}", other),
    }
}

/// Land a part in the store and report it, returning the etag as the store sent it
async fn land_part(h: &Harness, session: &NewSession, part_number: u32) -> String {
    let etag = h
        .store
        .insert_part(&session.remote_upload_id, part_number, Bytes::from(vec![part_number as u8; 8]))
        .unwrap();
    let quoted = format!("\"{}\"", etag);
    h.coordinator
        .mark_part_completed(OWNER, &session.session_id, part_number, &quoted)
        .await
        .unwrap();
    quoted
}

fn assert_conflict<T: std::fmt::Debug>(result: Result<T, UploadError>) {
    match result {
        Err(UploadError::Conflict { .. }) => {}
        other => panic!("expected Conflict, got {:?}", other),
    }
}

fn assert_bad_request<T: std::fmt::Debug>(result: Result<T, UploadError>) -> String {
    match result {
        Err(UploadError::BadRequest { message }) => message,
        other => panic!("expected BadRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn twenty_megabytes_completes_as_video_or_image() {
    for (mime, expected) in [("video/mp4", MediaType::Video), ("image/jpeg", MediaType::Image)] {
        let h = harness();
        let session = start(&h, mime, 20 * MIB, 10 * MIB).await;
        assert_eq!(session.total_parts, 2);
        assert_eq!(session.presigned_urls.len(), 2);

        land_part(&h, &session, 1).await;
        land_part(&h, &session, 2).await;

        let completed = h.coordinator.complete_upload(OWNER, &session.session_id).await.unwrap();
        assert_eq!(completed.media_type, expected);

        let status = h.coordinator.get_status(OWNER, &session.session_id, false).await.unwrap();
        assert_eq!(status.status, SessionStatus::Completed);
        assert_eq!(status.progress, 100);

        let artifact = h.artifacts.get(&completed.artifact_id).await.unwrap();
        assert_eq!(artifact.size, 20 * MIB);
        assert_eq!(artifact.owner_id, OWNER);
    }
}

#[tokio::test]
async fn first_batch_of_urls_is_capped() {
    let h = harness_with(UploadConfig::default().with_url_batch_size(3), MemoryBlobStore::new());
    let session = start(&h, "video/mp4", 50 * MIB, 5 * MIB).await;

    assert_eq!(session.total_parts, 10);
    let numbers: Vec<u32> = session.presigned_urls.iter().map(|u| u.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(session.presigned_urls.iter().all(|u| u.expires_at > Utc::now()));
}

#[tokio::test]
async fn matching_content_hash_short_circuits_without_store_calls() {
    let h = harness();
    let existing = h
        .artifacts
        .create(NewArtifact {
            owner_id: OWNER.into(),
            mime_type: "image/png".into(),
            filename: "a.png".into(),
            size: 10,
            store_key: "uploads/user-1/a.png".into(),
            bucket: "uploads".into(),
            content_hash: Some("hash-1".into()),
        })
        .await
        .unwrap();

    let request = InitiateRequest::new("again.png", "image/png", 10).with_content_hash("hash-1");
    let outcome = h.coordinator.initiate(OWNER, request).await.unwrap();

    assert_eq!(
        outcome,
        InitiateOutcome::DuplicateFound {
            artifact_id: existing.id,
            media_type: MediaType::Image,
        }
    );
    assert_eq!(h.store.calls().opened, 0);
    assert_eq!(h.store.calls().presigned, 0);
}

#[tokio::test]
async fn unprocessed_or_foreign_artifacts_do_not_dedup() {
    let h = harness();
    let video = h
        .artifacts
        .create(NewArtifact {
            owner_id: OWNER.into(),
            mime_type: "video/mp4".into(),
            filename: "a.mp4".into(),
            size: 10,
            store_key: "k".into(),
            bucket: "uploads".into(),
            content_hash: Some("hash-v".into()),
        })
        .await
        .unwrap();

    let request = InitiateRequest::new("a.mp4", "video/mp4", 10).with_content_hash("hash-v");
    let outcome = h.coordinator.initiate(OWNER, request.clone()).await.unwrap();
    assert!(!outcome.is_duplicate());

    let outcome = h.coordinator.initiate("someone-else", request.clone()).await.unwrap();
    assert!(!outcome.is_duplicate());

    h.artifacts.mark_processed(&video.id).await.unwrap();
    let outcome = h.coordinator.initiate(OWNER, request).await.unwrap();
    assert!(outcome.is_duplicate());
    assert_eq!(h.store.calls().opened, 2);
}

#[tokio::test]
async fn invalid_initiate_requests_are_rejected() {
    let h = harness();
    assert_bad_request(h.coordinator.initiate(OWNER, InitiateRequest::new("", "video/mp4", 10)).await);
    assert_bad_request(h.coordinator.initiate(OWNER, InitiateRequest::new("a.pdf", "application/pdf", 10)).await);
    assert_bad_request(h.coordinator.initiate(OWNER, InitiateRequest::new("a.mp4", "video/mp4", 0)).await);
    assert_eq!(h.store.calls().opened, 0);
}

#[tokio::test]
async fn more_urls_validates_count_range_and_state() {
    let h = harness();
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    let id = &session.session_id;

    let too_many: Vec<u32> = (1..=51).collect();
    let message = assert_bad_request(h.coordinator.get_more_urls(OWNER, id, &too_many).await);
    assert_eq!(message, "Maximum 50 URLs per request");

    assert_bad_request(h.coordinator.get_more_urls(OWNER, id, &[]).await);
    assert_bad_request(h.coordinator.get_more_urls(OWNER, id, &[3]).await);
    assert_bad_request(h.coordinator.get_more_urls(OWNER, id, &[0]).await);

    let urls = h.coordinator.get_more_urls(OWNER, id, &[2, 1, 2]).await.unwrap();
    let numbers: Vec<u32> = urls.iter().map(|u| u.part_number).collect();
    assert_eq!(numbers, vec![2, 1]);

    h.coordinator.abort_upload(OWNER, id).await.unwrap();
    assert_conflict(h.coordinator.get_more_urls(OWNER, id, &[1]).await);
}

#[tokio::test]
async fn mark_part_completed_validates_part_and_state() {
    let h = harness();
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    let id = &session.session_id;

    let message = assert_bad_request(h.coordinator.mark_part_completed(OWNER, id, 3, "etag").await);
    assert_eq!(message, "Invalid part number: 3");

    let progress = h.coordinator.mark_part_completed(OWNER, id, 1, "\"abc\"").await.unwrap();
    assert_eq!((progress.completed_parts, progress.total_parts, progress.progress), (1, 2, 50));

    let status = h.coordinator.get_status(OWNER, id, false).await.unwrap();
    assert_eq!(status.status, SessionStatus::InProgress);
    assert_eq!(status.pending_part_numbers, vec![2]);
    assert_eq!(status.uploaded_bytes, 10 * MIB);

    h.coordinator.abort_upload(OWNER, id).await.unwrap();
    assert_conflict(h.coordinator.mark_part_completed(OWNER, id, 2, "etag").await);
}

#[tokio::test]
async fn re_marking_a_part_is_idempotent_or_last_write_wins() {
    let h = harness();
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    let id = &session.session_id;

    let first = h.coordinator.mark_part_completed(OWNER, id, 1, "\"aaa\"").await.unwrap();
    let again = h.coordinator.mark_part_completed(OWNER, id, 1, "aaa").await.unwrap();
    assert!(!first.replaced);
    assert!(!again.replaced);
    assert_eq!(again.completed_parts, 1);

    let replaced = h.coordinator.mark_part_completed(OWNER, id, 1, "bbb").await.unwrap();
    assert!(replaced.replaced);
    assert_eq!(replaced.completed_parts, 1);

    let session = h.coordinator.sessions().get(id).await.unwrap();
    assert_eq!(session.part(1).and_then(|p| p.etag.clone()), Some("bbb".to_string()));
}

#[tokio::test]
async fn complete_requires_every_part() {
    let h = harness();
    let session = start(&h, "video/mp4", 30 * MIB, 10 * MIB).await;
    land_part(&h, &session, 2).await;

    let message = assert_bad_request(h.coordinator.complete_upload(OWNER, &session.session_id).await);
    assert_eq!(message, "Upload incomplete. Missing parts: 1, 3");
    assert_eq!(h.store.calls().completed, 0);
    assert!(h.artifacts.is_empty());
}

#[tokio::test]
async fn completion_submits_parts_in_ascending_order() {
    let h = harness();
    let session = start(&h, "image/png", 30 * MIB, 10 * MIB).await;
    for n in [3, 1, 2] {
        land_part(&h, &session, n).await;
    }

    // The memory store refuses unordered part lists
    let completed = h.coordinator.complete_upload(OWNER, &session.session_id).await.unwrap();
    assert!(completed.location.is_some());

    let session_record = h.coordinator.sessions().get(&session.session_id).await.unwrap();
    assert_eq!(session_record.artifact_id, Some(completed.artifact_id));
}

#[tokio::test]
async fn terminal_sessions_reject_every_mutation() {
    let h = harness();
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    let id = &session.session_id;
    land_part(&h, &session, 1).await;
    h.coordinator.complete_upload(OWNER, id).await.unwrap();

    assert_conflict(h.coordinator.mark_part_completed(OWNER, id, 1, "x").await);
    assert_conflict(h.coordinator.get_more_urls(OWNER, id, &[1]).await);
    assert_conflict(h.coordinator.complete_upload(OWNER, id).await);
    assert_conflict(h.coordinator.abort_upload(OWNER, id).await);
    assert_conflict(h.coordinator.sync_with_store(OWNER, id).await);

    let aborted = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    h.coordinator.abort_upload(OWNER, &aborted.session_id).await.unwrap();
    assert_conflict(h.coordinator.abort_upload(OWNER, &aborted.session_id).await);
    assert_conflict(h.coordinator.complete_upload(OWNER, &aborted.session_id).await);
}

#[tokio::test]
async fn ownership_is_enforced() {
    let h = harness();
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    let id = &session.session_id;

    let forbidden = h.coordinator.get_status("intruder", id, true).await;
    assert!(matches!(forbidden, Err(UploadError::Forbidden { .. })));
    let forbidden = h.coordinator.mark_part_completed("intruder", id, 1, "x").await;
    assert!(matches!(forbidden, Err(UploadError::Forbidden { .. })));
    let forbidden = h.coordinator.abort_upload("intruder", id).await;
    assert!(matches!(forbidden, Err(UploadError::Forbidden { .. })));

    let missing = h.coordinator.get_status(OWNER, &SessionId::new(), true).await;
    assert!(matches!(missing, Err(UploadError::NotFound { .. })));
}

#[tokio::test]
async fn abort_tolerates_a_vanished_remote_upload() {
    let h = harness();
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    h.store.expire_upload(&session.remote_upload_id);

    h.coordinator.abort_upload(OWNER, &session.session_id).await.unwrap();
    let status = h.coordinator.get_status(OWNER, &session.session_id, true).await.unwrap();
    assert_eq!(status.status, SessionStatus::Aborted);
    assert!(status.presigned_urls.is_none());
}

#[tokio::test]
async fn status_mints_urls_only_for_pending_parts() {
    let h = harness();
    let session = start(&h, "video/mp4", 30 * MIB, 10 * MIB).await;
    land_part(&h, &session, 2).await;

    let status = h.coordinator.get_status(OWNER, &session.session_id, true).await.unwrap();
    let numbers: Vec<u32> = status
        .presigned_urls
        .unwrap()
        .iter()
        .map(|u| u.part_number)
        .collect();
    assert_eq!(numbers, vec![1, 3]);
    assert_eq!(status.pending_part_numbers, vec![1, 3]);
    assert_eq!(status.completed_parts, 1);
    assert_eq!(status.progress, 33);

    let without = h.coordinator.get_status(OWNER, &session.session_id, false).await.unwrap();
    assert!(without.presigned_urls.is_none());
}

#[tokio::test]
async fn sync_expires_a_session_whose_remote_upload_vanished() {
    let h = harness();
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    land_part(&h, &session, 1).await;
    h.store.expire_upload(&session.remote_upload_id);

    assert_conflict(h.coordinator.sync_with_store(OWNER, &session.session_id).await);

    let status = h.coordinator.get_status(OWNER, &session.session_id, false).await.unwrap();
    assert_eq!(status.status, SessionStatus::Expired);
    assert!(status.error_message.is_some());
    assert_conflict(h.coordinator.mark_part_completed(OWNER, &session.session_id, 2, "x").await);
}

#[tokio::test]
async fn sync_with_no_local_progress_keeps_an_empty_session() {
    let h = harness();
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;

    let status = h.coordinator.sync_with_store(OWNER, &session.session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Pending);
    assert_eq!(status.completed_parts, 0);
}

#[tokio::test]
async fn sync_heals_drift_in_both_directions() {
    let h = harness();
    let session = start(&h, "video/mp4", 30 * MIB, 10 * MIB).await;
    let id = &session.session_id;

    // Recorded locally but never reached the store
    h.coordinator.mark_part_completed(OWNER, id, 1, "ghost").await.unwrap();
    // Reached the store but never reported
    let etag = h
        .store
        .insert_part(&session.remote_upload_id, 3, Bytes::from_static(b"part three"))
        .unwrap();

    let status = h.coordinator.sync_with_store(OWNER, id).await.unwrap();
    assert_eq!(status.completed_parts, 1);
    assert_eq!(status.pending_part_numbers, vec![1, 2]);
    assert_eq!(status.status, SessionStatus::InProgress);

    let record = h.coordinator.sessions().get(id).await.unwrap();
    assert_eq!(record.part(1).map(|p| p.status), Some(PartStatus::Pending));
    assert_eq!(record.part(3).and_then(|p| p.etag.clone()), Some(etag));

    let again = h.coordinator.sync_with_store(OWNER, id).await.unwrap();
    assert_eq!(again.completed_parts, status.completed_parts);
    assert_eq!(again.pending_part_numbers, status.pending_part_numbers);
}

#[tokio::test]
async fn sync_drains_every_page_of_parts() {
    let h = harness_with(UploadConfig::default(), MemoryBlobStore::new().with_page_size(2));
    let session = start(&h, "video/mp4", 70 * MIB, 10 * MIB).await;
    for n in 1..=7 {
        h.store
            .insert_part(&session.remote_upload_id, n, Bytes::from(vec![n as u8]))
            .unwrap();
    }

    let status = h.coordinator.sync_with_store(OWNER, &session.session_id).await.unwrap();
    assert_eq!(status.completed_parts, 7);
    assert!(status.pending_part_numbers.is_empty());
    assert!(h.store.calls().listed >= 4);

    h.coordinator.complete_upload(OWNER, &session.session_id).await.unwrap();
}

#[tokio::test]
async fn complete_against_a_vanished_upload_expires_the_session() {
    let h = harness();
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    land_part(&h, &session, 1).await;
    h.store.expire_upload(&session.remote_upload_id);

    assert_conflict(h.coordinator.complete_upload(OWNER, &session.session_id).await);
    let status = h.coordinator.get_status(OWNER, &session.session_id, false).await.unwrap();
    assert_eq!(status.status, SessionStatus::Expired);
    assert!(h.artifacts.is_empty());
}

#[tokio::test]
async fn list_active_shows_only_resumable_sessions_of_the_owner() {
    let h = harness();
    let pending = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    let aborted = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    h.coordinator.abort_upload(OWNER, &aborted.session_id).await.unwrap();
    h.coordinator
        .initiate("user-2", InitiateRequest::new("b.mp4", "video/mp4", MIB))
        .await
        .unwrap();

    h.coordinator
        .mark_part_completed(OWNER, &pending.session_id, 1, "e1")
        .await
        .unwrap();

    let active = h.coordinator.list_active(OWNER).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].session_id, pending.session_id);
    assert_eq!(active[0].progress, 50);
    assert_eq!(active[0].total_size, 20 * MIB);
}

#[tokio::test]
async fn expire_stale_marks_overdue_sessions_and_aborts_remotely() {
    let h = harness_with(
        UploadConfig::default().with_session_ttl(Duration::ZERO),
        MemoryBlobStore::new(),
    );
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    assert!(h.store.has_upload(&session.remote_upload_id));

    let expired = h.coordinator.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(expired, 1);
    assert!(!h.store.has_upload(&session.remote_upload_id));

    let status = h.coordinator.get_status(OWNER, &session.session_id, false).await.unwrap();
    assert_eq!(status.status, SessionStatus::Expired);
    assert!(h.coordinator.list_active(OWNER).await.unwrap().is_empty());

    assert_eq!(h.coordinator.expire_stale(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn huge_files_get_a_chunk_that_bounds_the_part_count() {
    let h = harness_with(UploadConfig::default().with_url_batch_size(1), MemoryBlobStore::new());
    let request = InitiateRequest::new("movie.mkv", "video/x-matroska", 200 * 1024 * MIB);
    let outcome = h.coordinator.initiate(OWNER, request).await.unwrap();
    let session = outcome.session().unwrap();

    assert!(session.total_parts <= 10_000);
    assert!(session.chunk_size >= 5 * MIB);
    assert_eq!(session.presigned_urls.len(), 1);
}

/// Assembles the object right away but answers only after `delay`
struct SlowAssembly {
    inner: MemoryBlobStore,
    delay: Duration,
}

#[async_trait]
impl MultipartBlobStore for SlowAssembly {
    async fn open_multipart_upload(&self, bucket: &str, key: &str, content_type: &str) -> StoreResult<String> {
        self.inner.open_multipart_upload(bucket, key, content_type).await
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> StoreResult<String> {
        self.inner.presign_part(bucket, key, upload_id, part_number, ttl).await
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<PartsPage> {
        self.inner.list_parts(bucket, key, upload_id, page_token).await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<CompletedObject> {
        let object = self.inner.complete_multipart_upload(bucket, key, upload_id, parts).await?;
        tokio::time::sleep(self.delay).await;
        Ok(object)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()> {
        self.inner.abort_multipart_upload(bucket, key, upload_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn second_complete_during_assembly_is_refused() {
    let store = MemoryBlobStore::new();
    let slow = SlowAssembly {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    };
    let h = harness_over(UploadConfig::default(), store, Arc::new(slow));
    let session = start(&h, "video/mp4", 20 * MIB, 10 * MIB).await;
    land_part(&h, &session, 1).await;
    land_part(&h, &session, 2).await;

    let first = {
        let coordinator = h.coordinator.clone();
        let id = session.session_id.clone();
        tokio::spawn(async move { coordinator.complete_upload(OWNER, &id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    match h.coordinator.complete_upload(OWNER, &session.session_id).await {
        Err(UploadError::Conflict { message }) => assert_eq!(message, "Upload completion in progress"),
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert_conflict(h.coordinator.abort_upload(OWNER, &session.session_id).await);
    assert_conflict(h.coordinator.sync_with_store(OWNER, &session.session_id).await);
    assert_conflict(
        h.coordinator
            .mark_part_completed(OWNER, &session.session_id, 1, "other")
            .await,
    );

    let completed = first.await.unwrap().unwrap();
    assert_eq!(h.store.calls().completed, 1);

    let stored = h.coordinator.sessions().get(&session.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.completing_since, None);
    assert_eq!(stored.artifact_id.as_ref(), Some(&completed.artifact_id));

    let artifact = h.artifacts.get(&completed.artifact_id).await.unwrap();
    assert!(!artifact.deleted);
    assert!(h.store.object(&stored.bucket, &stored.store_key).is_some());

    match h.coordinator.complete_upload(OWNER, &session.session_id).await {
        Err(UploadError::Conflict { message }) => assert_eq!(message, "Upload already completed"),
        other => panic!("expected Conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_completion_releases_its_claim() {
    let h = harness();
    let session = start(&h, "video/mp4", 10 * MIB, 10 * MIB).await;
    let etag = h
        .store
        .insert_part(&session.remote_upload_id, 1, Bytes::from_static(b"part one"))
        .unwrap();
    h.coordinator
        .mark_part_completed(OWNER, &session.session_id, 1, "stale-etag")
        .await
        .unwrap();

    let err = h.coordinator.complete_upload(OWNER, &session.session_id).await.unwrap_err();
    assert!(matches!(err, UploadError::Store { .. }), "unexpected error {:?}", err);

    let stored = h.coordinator.sessions().get(&session.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::InProgress);
    assert_eq!(stored.completing_since, None);

    h.coordinator
        .mark_part_completed(OWNER, &session.session_id, 1, &etag)
        .await
        .unwrap();
    h.coordinator.complete_upload(OWNER, &session.session_id).await.unwrap();
}
