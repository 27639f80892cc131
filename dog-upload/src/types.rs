use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ArtifactId, ChunkPlan, MediaType};

/// Unique identifier for an upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Status of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Aborted,
    Expired,
}

impl SessionStatus {
    /// Completed, aborted and expired sessions accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Expired)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// One numbered byte range of the source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub part_number: u32,
    pub status: PartStatus,
    /// Present only once the store has acknowledged the part
    pub etag: Option<String>,
    pub size: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl UploadPart {
    pub fn pending(part_number: u32, size: u64) -> Self {
        Self {
            part_number,
            status: PartStatus::Pending,
            etag: None,
            size,
            uploaded_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PartStatus::Completed
    }

    pub fn complete(&mut self, etag: String, at: DateTime<Utc>) {
        self.status = PartStatus::Completed;
        self.etag = Some(etag);
        self.uploaded_at = Some(at);
    }

    pub fn reset(&mut self) {
        self.status = PartStatus::Pending;
        self.etag = None;
        self.uploaded_at = None;
    }
}

/// Durable record of one resumable upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: SessionId,
    pub owner_id: String,
    pub remote_upload_id: String,
    pub store_key: String,
    pub bucket: String,
    pub region: String,

    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub content_hash: Option<String>,

    pub status: SessionStatus,
    pub parts: Vec<UploadPart>,
    pub artifact_id: Option<ArtifactId>,

    pub expires_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Set while one caller is assembling the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completing_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Fresh session with parts `1..=total_parts`, all pending.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: String,
        remote_upload_id: String,
        store_key: String,
        bucket: String,
        region: String,
        request: &InitiateRequest,
        plan: &ChunkPlan,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let parts = plan
            .part_numbers()
            .map(|n| UploadPart::pending(n, plan.part_size(n).unwrap_or_default()))
            .collect();

        Self {
            id: SessionId::new(),
            owner_id,
            remote_upload_id,
            store_key,
            bucket,
            region,
            filename: request.filename.clone(),
            mime_type: request.mime_type.clone(),
            total_size: plan.total_size,
            chunk_size: plan.chunk_size,
            total_parts: plan.total_parts,
            content_hash: request.content_hash.clone(),
            status: SessionStatus::Pending,
            parts,
            artifact_id: None,
            expires_at,
            error_message: None,
            completing_since: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a completion claim taken less than `lease` before `now` is held
    pub fn completion_claimed(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.completing_since
            .is_some_and(|since| since.checked_add_signed(lease).map_or(true, |until| until > now))
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    pub fn part(&self, part_number: u32) -> Option<&UploadPart> {
        self.parts.iter().find(|p| p.part_number == part_number)
    }

    pub fn part_mut(&mut self, part_number: u32) -> Option<&mut UploadPart> {
        self.parts.iter_mut().find(|p| p.part_number == part_number)
    }

    pub fn completed_parts(&self) -> u32 {
        self.parts.iter().filter(|p| p.is_completed()).count() as u32
    }

    /// Part numbers not yet completed, ascending
    pub fn pending_part_numbers(&self) -> Vec<u32> {
        let mut pending: Vec<u32> = self
            .parts
            .iter()
            .filter(|p| !p.is_completed())
            .map(|p| p.part_number)
            .collect();
        pending.sort_unstable();
        pending
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| p.size)
            .sum()
    }

    /// Rounded completion percentage
    pub fn progress(&self) -> u8 {
        progress_percent(self.completed_parts(), self.total_parts)
    }

    pub fn has_completed_parts(&self) -> bool {
        self.parts.iter().any(|p| p.is_completed())
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime(&self.mime_type)
    }
}

pub(crate) fn progress_percent(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((f64::from(completed) / f64::from(total)) * 100.0).round() as u8
}

/// Request to start a resumable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

impl InitiateRequest {
    pub fn new<F: Into<String>, M: Into<String>>(filename: F, mime_type: M, total_size: u64) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            total_size,
            content_hash: None,
            chunk_size: None,
        }
    }

    pub fn with_content_hash<S: Into<String>>(mut self, hash: S) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = Some(bytes);
        self
    }
}

/// A short-lived URL authorizing a direct PUT of one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPartUrl {
    pub part_number: u32,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of `initiate`: either a new session or an existing artifact with the same content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum InitiateOutcome {
    #[serde(rename = "session")]
    NewSession(NewSession),

    #[serde(rename = "duplicate", rename_all = "camelCase")]
    DuplicateFound {
        artifact_id: ArtifactId,
        media_type: MediaType,
    },
}

impl InitiateOutcome {
    pub fn session(&self) -> Option<&NewSession> {
        match self {
            Self::NewSession(session) => Some(session),
            Self::DuplicateFound { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateFound { .. })
    }
}

/// Descriptor of a freshly opened session plus its first batch of URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub session_id: SessionId,
    pub remote_upload_id: String,
    pub total_parts: u32,
    pub chunk_size: u64,
    pub expires_at: DateTime<Utc>,
    pub presigned_urls: Vec<PresignedPartUrl>,
}

/// Snapshot of a session for resume and progress display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub completed_parts: u32,
    pub uploaded_bytes: u64,
    pub progress: u8,
    pub pending_part_numbers: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_urls: Option<Vec<PresignedPartUrl>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UploadStatusReport {
    pub fn from_session(session: &UploadSession, presigned_urls: Option<Vec<PresignedPartUrl>>) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            filename: session.filename.clone(),
            mime_type: session.mime_type.clone(),
            total_size: session.total_size,
            chunk_size: session.chunk_size,
            total_parts: session.total_parts,
            completed_parts: session.completed_parts(),
            uploaded_bytes: session.uploaded_bytes(),
            progress: session.progress(),
            pending_part_numbers: session.pending_part_numbers(),
            presigned_urls,
            expires_at: session.expires_at,
            error_message: session.error_message.clone(),
        }
    }
}

/// Counters returned after a part is recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartCompletion {
    pub completed_parts: u32,
    pub total_parts: u32,
    pub progress: u8,
    /// True when an already-completed part was re-reported with a different etag
    #[serde(default)]
    pub replaced: bool,
}

/// Result of a successful `complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub artifact_id: ArtifactId,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Summary of a resumable session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUpload {
    pub session_id: SessionId,
    pub filename: String,
    pub total_size: u64,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ActiveUpload {
    pub fn from_session(session: &UploadSession) -> Self {
        Self {
            session_id: session.id.clone(),
            filename: session.filename.clone(),
            total_size: session.total_size,
            progress: session.progress(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

/// Body of a "more URLs" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreUrlsRequest {
    pub part_numbers: Vec<u32>,
}

/// Body of a "more URLs" response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreUrlsResponse {
    pub presigned_urls: Vec<PresignedPartUrl>,
}

/// Body of a part-completion report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartCompleteRequest {
    pub etag: String,
}

/// Strip surrounding quotes (and weak-validator prefix) from an etag.
pub fn normalize_etag(etag: &str) -> String {
    let trimmed = etag.trim();
    let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    trimmed.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total_size: u64, chunk: u64) -> UploadSession {
        let plan = ChunkPlan::new(total_size, chunk).unwrap();
        let request = InitiateRequest::new("clip.mp4", "video/mp4", total_size);
        UploadSession::new(
            "owner-1".into(),
            "remote-1".into(),
            "uploads/owner-1/clip.mp4".into(),
            "bucket".into(),
            "us-east-1".into(),
            &request,
            &plan,
            Utc::now(),
        )
    }

    #[test]
    fn new_session_has_contiguous_pending_parts() {
        let s = session(25, 10);
        let numbers: Vec<u32> = s.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(s.parts.iter().map(|p| p.size).sum::<u64>(), 25);
        assert_eq!(s.parts[2].size, 5);
        assert!(s.parts.iter().all(|p| p.status == PartStatus::Pending && p.etag.is_none()));
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(s.id.as_str().starts_with("upl_"));
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        let mut s = session(30, 10);
        s.part_mut(1).unwrap().complete("a".into(), Utc::now());
        assert_eq!(s.progress(), 33);
        s.part_mut(2).unwrap().complete("b".into(), Utc::now());
        assert_eq!(s.progress(), 67);
        assert_eq!(s.pending_part_numbers(), vec![3]);
        assert_eq!(s.uploaded_bytes(), 20);
    }

    #[test]
    fn completion_claims_lapse_after_their_lease() {
        let mut s = session(30, 10);
        let now = Utc::now();
        let lease = chrono::Duration::seconds(60);
        assert!(!s.completion_claimed(now, lease));

        s.completing_since = Some(now);
        assert!(s.completion_claimed(now + chrono::Duration::seconds(59), lease));
        assert!(!s.completion_claimed(now + chrono::Duration::seconds(60), lease));

        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("completingSince").is_some());
        s.completing_since = None;
        assert!(serde_json::to_value(&s).unwrap().get("completingSince").is_none());
    }

    #[test]
    fn etags_are_unquoted() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("W/\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
    }

    #[test]
    fn duplicate_outcome_is_tagged() {
        let outcome = InitiateOutcome::DuplicateFound {
            artifact_id: ArtifactId::from_string("med_1".into()),
            media_type: MediaType::Video,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "duplicate");
        assert_eq!(json["artifactId"], "med_1");
        assert_eq!(json["mediaType"], "video");

        let back: InitiateOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }
}
