use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{SessionId, UploadError, UploadResult, UploadSession};

/// A change applied to one session under the store's exclusion.
///
/// Returning an error leaves the stored session untouched.
pub type SessionMutation<'a> = dyn FnMut(&mut UploadSession) -> UploadResult<()> + Send + 'a;

/// Durable storage for upload sessions
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    async fn create(&self, session: UploadSession) -> UploadResult<UploadSession>;

    async fn get(&self, id: &SessionId) -> UploadResult<UploadSession>;

    /// Atomically read-modify-write one session and return the stored result.
    ///
    /// Concurrent updates of the same session never lose each other's changes.
    async fn update(&self, id: &SessionId, mutation: &mut SessionMutation<'_>) -> UploadResult<UploadSession>;

    /// Every session of one owner, newest first
    async fn list_by_owner(&self, owner_id: &str) -> UploadResult<Vec<UploadSession>>;

    /// Non-terminal sessions whose `expires_at` is at or before `now`
    async fn list_expired(&self, now: DateTime<Utc>) -> UploadResult<Vec<UploadSession>>;

    async fn delete(&self, id: &SessionId) -> UploadResult<()>;
}

pub(crate) fn session_not_found() -> UploadError {
    UploadError::not_found("Upload session not found")
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<SessionId, UploadSession>,
    by_owner: HashMap<String, BTreeSet<SessionId>>,
}

/// In-memory session store for single-node deployments and tests
#[derive(Debug, Default)]
pub struct MemoryUploadSessionStore {
    inner: RwLock<Sessions>,
}

impl MemoryUploadSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

#[async_trait]
impl UploadSessionStore for MemoryUploadSessionStore {
    async fn create(&self, session: UploadSession) -> UploadResult<UploadSession> {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&session.id) {
            return Err(UploadError::conflict(format!("Upload session {} already exists", session.id)));
        }

        inner
            .by_owner
            .entry(session.owner_id.clone())
            .or_default()
            .insert(session.id.clone());
        inner.by_id.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> UploadResult<UploadSession> {
        self.inner
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(session_not_found)
    }

    async fn update(&self, id: &SessionId, mutation: &mut SessionMutation<'_>) -> UploadResult<UploadSession> {
        let mut inner = self.inner.write();
        let stored = inner.by_id.get_mut(id).ok_or_else(session_not_found)?;

        let mut draft = stored.clone();
        mutation(&mut draft)?;
        draft.updated_at = Utc::now();

        *stored = draft.clone();
        Ok(draft)
    }

    async fn list_by_owner(&self, owner_id: &str) -> UploadResult<Vec<UploadSession>> {
        let inner = self.inner.read();
        let mut sessions: Vec<UploadSession> = inner
            .by_owner
            .get(owner_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> UploadResult<Vec<UploadSession>> {
        let inner = self.inner.read();
        Ok(inner
            .by_id
            .values()
            .filter(|s| !s.status.is_terminal() && s.expires_at <= now)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &SessionId) -> UploadResult<()> {
        let mut inner = self.inner.write();
        if let Some(session) = inner.by_id.remove(id) {
            if let Some(ids) = inner.by_owner.get_mut(&session.owner_id) {
                ids.remove(id);
                if ids.is_empty() {
                    inner.by_owner.remove(&session.owner_id);
                }
            }
        }
        Ok(())
    }
}
