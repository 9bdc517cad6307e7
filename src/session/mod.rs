//! Edit sessions and cursor presence.
//!
//! Sessions and cursors are ephemeral bookkeeping owned by the
//! (user, document) pair, garbage-collected independently of document
//! content. Cursor updates are best-effort presence: they may be dropped or
//! coalesced under load, and a cursor older than the idle window simply stops
//! being reported. All expiry checks take `now` in unix milliseconds so the
//! windows are testable without sleeping.

use crate::op::{AuthorId, BlockId, DocumentId, OperationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Idle window after which a cursor stops counting as present.
pub const CURSOR_IDLE_MS: u64 = 30_000;

/// Live presence marker for one user's position in one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub user: AuthorId,
    pub document: DocumentId,
    pub block: BlockId,
    pub position: usize,
    pub selection_start: usize,
    pub selection_end: usize,
    pub updated_at: u64,
    pub active: bool,
}

impl Cursor {
    pub fn is_fresh(&self, idle_ms: u64, now: u64) -> bool {
        self.active && now.saturating_sub(self.updated_at) <= idle_ms
    }

    pub fn has_selection(&self) -> bool {
        self.selection_start != self.selection_end
    }
}

/// One user's open editing context on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSession {
    pub id: SessionId,
    pub document: DocumentId,
    pub user: AuthorId,
    pub started_at: u64,
    pub last_activity: u64,
    /// Operations this session produced, in submission order.
    pub operations: Vec<OperationId>,
    pub active: bool,
}

impl EditSession {
    fn new(document: DocumentId, user: AuthorId, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            document,
            user,
            started_at: now,
            last_activity: now,
            operations: Vec::new(),
            active: true,
        }
    }

    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity)
    }
}

/// Repository of sessions and cursors.
pub trait SessionStore: Send {
    /// Get or create the active session for a (user, document) pair.
    fn start(&mut self, document: DocumentId, user: AuthorId, now: u64) -> EditSession;
    fn get(&self, id: SessionId) -> Option<EditSession>;
    /// Mark a session ended and drop the user's cursors for its document.
    fn end(&mut self, id: SessionId, now: u64) -> Option<EditSession>;
    /// Record a produced operation and bump activity.
    fn touch(&mut self, document: DocumentId, user: &str, op: OperationId, now: u64);
    /// Upsert keyed by (user, document, block).
    fn upsert_cursor(&mut self, cursor: Cursor) -> Cursor;
    fn cursors(&self, document: DocumentId) -> Vec<Cursor>;
    fn remove_cursors(&mut self, document: DocumentId, user: &str);
    /// End sessions idle past `idle_ms`, dropping their cursors. Returns the
    /// sessions that were ended.
    fn expire_idle(&mut self, idle_ms: u64, now: u64) -> Vec<EditSession>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Vec<EditSession>,
    cursors: Vec<Cursor>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn active_for(&mut self, document: DocumentId, user: &str) -> Option<&mut EditSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.active && s.document == document && s.user == user)
    }
}

impl SessionStore for MemorySessionStore {
    fn start(&mut self, document: DocumentId, user: AuthorId, now: u64) -> EditSession {
        if let Some(existing) = self.active_for(document, &user) {
            existing.last_activity = now;
            return existing.clone();
        }
        let session = EditSession::new(document, user, now);
        tracing::debug!(session = %session.id, document = %document, "session started");
        self.sessions.push(session.clone());
        session
    }

    fn get(&self, id: SessionId) -> Option<EditSession> {
        self.sessions.iter().find(|s| s.id == id).cloned()
    }

    fn end(&mut self, id: SessionId, now: u64) -> Option<EditSession> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        session.active = false;
        session.last_activity = now;
        let ended = session.clone();
        let (document, user) = (ended.document, ended.user.clone());
        self.remove_cursors(document, &user);
        tracing::debug!(session = %id, "session ended");
        Some(ended)
    }

    fn touch(&mut self, document: DocumentId, user: &str, op: OperationId, now: u64) {
        // First edit for this pair opens the session implicitly.
        if self.active_for(document, user).is_none() {
            self.start(document, user.to_string(), now);
        }
        if let Some(session) = self.active_for(document, user) {
            session.operations.push(op);
            session.last_activity = now;
        }
    }

    fn upsert_cursor(&mut self, cursor: Cursor) -> Cursor {
        // A cursor event also counts as session activity.
        if let Some(session) = self.active_for(cursor.document, &cursor.user) {
            session.last_activity = cursor.updated_at;
        } else {
            self.start(cursor.document, cursor.user.clone(), cursor.updated_at);
        }

        if let Some(existing) = self.cursors.iter_mut().find(|c| {
            c.user == cursor.user && c.document == cursor.document && c.block == cursor.block
        }) {
            *existing = cursor.clone();
        } else {
            self.cursors.push(cursor.clone());
        }
        cursor
    }

    fn cursors(&self, document: DocumentId) -> Vec<Cursor> {
        self.cursors
            .iter()
            .filter(|c| c.document == document)
            .cloned()
            .collect()
    }

    fn remove_cursors(&mut self, document: DocumentId, user: &str) {
        self.cursors
            .retain(|c| !(c.document == document && c.user == user));
    }

    fn expire_idle(&mut self, idle_ms: u64, now: u64) -> Vec<EditSession> {
        let mut ended = Vec::new();
        for session in &mut self.sessions {
            if session.active && now.saturating_sub(session.last_activity) > idle_ms {
                session.active = false;
                ended.push(session.clone());
            }
        }
        for session in &ended {
            self.remove_cursors(session.document, &session.user);
            tracing::debug!(session = %session.id, "idle session expired");
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        Uuid::new_v4()
    }

    fn cursor(user: &str, document: DocumentId, block: BlockId, pos: usize, now: u64) -> Cursor {
        Cursor {
            user: user.into(),
            document,
            block,
            position: pos,
            selection_start: pos,
            selection_end: pos,
            updated_at: now,
            active: true,
        }
    }

    #[test]
    fn test_start_is_idempotent_per_active_pair() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        let a = store.start(document, "alice".into(), 100);
        let b = store.start(document, "alice".into(), 200);
        assert_eq!(a.id, b.id);
        assert_eq!(b.last_activity, 200);
    }

    #[test]
    fn test_new_session_after_end() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        let a = store.start(document, "alice".into(), 100);
        store.end(a.id, 150);
        let b = store.start(document, "alice".into(), 200);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_end_removes_cursors_for_document() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        let block = Uuid::new_v4();
        let session = store.start(document, "alice".into(), 100);
        store.upsert_cursor(cursor("alice", document, block, 3, 110));
        store.upsert_cursor(cursor("bob", document, block, 7, 110));

        store.end(session.id, 120);
        let left: Vec<_> = store.cursors(document);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user, "bob");
    }

    #[test]
    fn test_touch_opens_session_implicitly() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        store.touch(document, "alice", Uuid::new_v4(), 50);
        let session = store.start(document, "alice".into(), 60);
        assert_eq!(session.operations.len(), 1);
        assert_eq!(session.started_at, 50);
    }

    #[test]
    fn test_cursor_upsert_replaces_by_key() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        let block = Uuid::new_v4();
        store.upsert_cursor(cursor("alice", document, block, 3, 100));
        store.upsert_cursor(cursor("alice", document, block, 9, 200));
        let cursors = store.cursors(document);
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].position, 9);
        assert_eq!(cursors[0].updated_at, 200);
    }

    #[test]
    fn test_cursor_freshness_window() {
        let document = doc();
        let block = Uuid::new_v4();
        let c = cursor("alice", document, block, 0, 100_000);
        assert!(c.is_fresh(CURSOR_IDLE_MS, 110_000), "10s old is fresh");
        assert!(c.is_fresh(CURSOR_IDLE_MS, 130_000), "exactly 30s still counts");
        assert!(!c.is_fresh(CURSOR_IDLE_MS, 131_000), "31s old has expired");
    }

    #[test]
    fn test_expire_idle_sessions_drop_cursors() {
        let mut store = MemorySessionStore::new();
        let document = doc();
        let block = Uuid::new_v4();
        store.start(document, "alice".into(), 100);
        store.upsert_cursor(cursor("alice", document, block, 3, 100));
        store.start(document, "bob".into(), 900);

        let ended = store.expire_idle(500, 1_000);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].user, "alice");
        assert!(store.cursors(document).is_empty());

        let bob = store.start(document, "bob".into(), 1_100);
        assert!(bob.active);
    }
}
