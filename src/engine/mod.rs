//! Engine façade: the library boundary collaborators integrate against.
//!
//! [`CollabEngine`] wires the transform engine, conflict detector, session
//! tracker and operation log behind the per-block serialization point. The
//! deployment supplies three collaborators: a [`ContentStore`] that owns
//! block content, an [`AccessControl`] that answers "may user U edit block
//! B", and a [`Broadcaster`] that fans results out to connected clients.
//! Repositories ([`OperationStore`], [`SessionStore`], [`ConflictStore`])
//! default to in-memory implementations and can be swapped for whatever
//! storage the deployment shards on.

use crate::conflict::{
    Conflict, ConflictId, ConflictStore, MemoryConflictStore, ResolutionChoice, merge_operations,
};
use crate::dispatch::{Dispatcher, lock};
use crate::log::{MemoryOperationStore, OperationStore};
use crate::op::{
    AuthorId, BlockId, ContentKind, DocumentId, InvalidOperation, Operation, now_ms,
};
use crate::session::{
    CURSOR_IDLE_MS, Cursor, EditSession, MemorySessionStore, SessionId, SessionStore,
};
use crate::transform::{InsertTiePolicy, TransformError, transform};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidOperation(#[from] InvalidOperation),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("user {user} lacks permission")]
    Permission { user: AuthorId },
    #[error("unknown {entity} {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("content store failure: {0}")]
    Content(String),
}

/// A block as the content store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContent {
    pub kind: ContentKind,
    pub content: String,
}

/// Owns block content. The engine only ever hands it already-transformed
/// operations.
pub trait ContentStore: Send + Sync {
    fn read_block(&self, document: DocumentId, block: BlockId) -> Result<BlockContent, EngineError>;
    fn write_block(&self, op: &Operation) -> Result<(), EngineError>;
}

/// Answers "may user U edit block B of document D".
pub trait AccessControl: Send + Sync {
    fn can_edit(&self, user: &str, document: DocumentId, block: BlockId) -> bool;
}

/// Payloads the engine pushes to the transport collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    OperationApplied { operation: Operation },
    CursorMoved { cursor: Cursor },
    ConflictDetected { conflict: Conflict },
    ConflictResolved { conflict_id: ConflictId, resolved_by: AuthorId },
}

/// Fans engine output out to connected clients. Best-effort: the engine never
/// blocks on, or fails because of, delivery.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, document: DocumentId, notice: &Notice);
    fn deliver_to_user(&self, user: &str, notice: &Notice);
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cursors older than this stop counting as presence.
    pub cursor_idle_ms: u64,
    /// Sessions idle past this window are auto-ended.
    pub session_idle_ms: u64,
    pub insert_tie: InsertTiePolicy,
    /// Bounded depth of each block's submission queue.
    pub queue_depth: usize,
    /// How long an idle block worker lingers before retiring.
    pub worker_idle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cursor_idle_ms: CURSOR_IDLE_MS,
            session_idle_ms: 10 * 60 * 1000,
            insert_tie: InsertTiePolicy::LeftWins,
            queue_depth: 64,
            worker_idle: Duration::from_secs(60),
        }
    }
}

/// Result of a submission. A conflict is a first-class outcome, not an error:
/// the operation was neither applied nor dropped, and any involved author can
/// resolve it.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Applied(Operation),
    Conflicted(Conflict),
}

impl SubmitOutcome {
    pub fn applied(&self) -> Option<&Operation> {
        match self {
            SubmitOutcome::Applied(op) => Some(op),
            SubmitOutcome::Conflicted(_) => None,
        }
    }
}

pub struct CollabEngine {
    inner: Arc<EngineInner>,
    dispatcher: Dispatcher,
}

struct EngineInner {
    config: EngineConfig,
    content: Arc<dyn ContentStore>,
    access: Arc<dyn AccessControl>,
    broadcaster: Arc<dyn Broadcaster>,
    ops: Mutex<Box<dyn OperationStore>>,
    sessions: Mutex<Box<dyn SessionStore>>,
    conflicts: Mutex<Box<dyn ConflictStore>>,
}

impl CollabEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        access: Arc<dyn AccessControl>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self::with_config(content, access, broadcaster, EngineConfig::default())
    }

    pub fn with_config(
        content: Arc<dyn ContentStore>,
        access: Arc<dyn AccessControl>,
        broadcaster: Arc<dyn Broadcaster>,
        config: EngineConfig,
    ) -> Self {
        Self::with_stores(
            content,
            access,
            broadcaster,
            config,
            Box::new(MemoryOperationStore::new()),
            Box::new(MemorySessionStore::new()),
            Box::new(MemoryConflictStore::new()),
        )
    }

    /// Swap the in-memory repositories for deployment-owned storage.
    pub fn with_stores(
        content: Arc<dyn ContentStore>,
        access: Arc<dyn AccessControl>,
        broadcaster: Arc<dyn Broadcaster>,
        config: EngineConfig,
        ops: Box<dyn OperationStore>,
        sessions: Box<dyn SessionStore>,
        conflicts: Box<dyn ConflictStore>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.queue_depth, config.worker_idle);
        Self {
            inner: Arc::new(EngineInner {
                config,
                content,
                access,
                broadcaster,
                ops: Mutex::new(ops),
                sessions: Mutex::new(sessions),
                conflicts: Mutex::new(conflicts),
            }),
            dispatcher,
        }
    }

    /// Transform and apply one operation.
    ///
    /// Validation and the permission check happen before the operation enters
    /// the block's queue; everything from the concurrent-set lookup onward is
    /// serialized per block, so the set cannot grow under the transform.
    pub fn submit_operation(&self, op: Operation) -> Result<SubmitOutcome, EngineError> {
        op.validate()?;
        if !self.inner.access.can_edit(&op.author, op.document, op.block) {
            return Err(EngineError::Permission {
                user: op.author.clone(),
            });
        }
        let inner = Arc::clone(&self.inner);
        let key = (op.document, op.block);
        self.dispatcher.execute(key, move || inner.process_submit(op))
    }

    /// Applied operations with `version > since`, ascending; replaying them
    /// from empty content reproduces the block.
    pub fn operations_since(
        &self,
        document: DocumentId,
        block: BlockId,
        since: u64,
    ) -> Vec<Operation> {
        lock(&self.inner.ops).since(document, block, since)
    }

    /// Upsert the caller's presence marker. Fire-and-forget: no permission
    /// gate, no queue, and delivery is best-effort.
    pub fn update_cursor(
        &self,
        document: DocumentId,
        block: BlockId,
        user: impl Into<AuthorId>,
        position: usize,
        selection_start: usize,
        selection_end: usize,
    ) -> Cursor {
        let cursor = Cursor {
            user: user.into(),
            document,
            block,
            position,
            selection_start,
            selection_end,
            updated_at: now_ms(),
            active: true,
        };
        let stored = lock(&self.inner.sessions).upsert_cursor(cursor);
        self.inner
            .broadcaster
            .broadcast(document, &Notice::CursorMoved {
                cursor: stored.clone(),
            });
        stored
    }

    /// All *other* users' cursors younger than the idle window.
    pub fn cursors(&self, document: DocumentId, user: &str) -> Vec<Cursor> {
        self.cursors_at(document, user, now_ms())
    }

    /// Presence query against an explicit clock, for deterministic tests.
    pub fn cursors_at(&self, document: DocumentId, user: &str, now: u64) -> Vec<Cursor> {
        lock(&self.inner.sessions)
            .cursors(document)
            .into_iter()
            .filter(|c| c.user != user && c.is_fresh(self.inner.config.cursor_idle_ms, now))
            .collect()
    }

    pub fn start_session(&self, document: DocumentId, user: impl Into<AuthorId>) -> EditSession {
        lock(&self.inner.sessions).start(document, user.into(), now_ms())
    }

    pub fn session(&self, id: SessionId) -> Option<EditSession> {
        lock(&self.inner.sessions).get(id)
    }

    /// End a session. Only the owner may end it; ending removes the user's
    /// cursors for the document but never retracts applied operations.
    pub fn end_session(&self, id: SessionId, user: &str) -> Result<bool, EngineError> {
        let mut sessions = lock(&self.inner.sessions);
        let Some(existing) = sessions.get(id) else {
            return Err(EngineError::NotFound {
                entity: "session",
                id,
            });
        };
        if existing.user != user {
            return Err(EngineError::Permission { user: user.into() });
        }
        if !existing.active {
            return Ok(false);
        }
        sessions.end(id, now_ms());
        Ok(true)
    }

    /// Auto-end sessions idle past the configured window.
    pub fn expire_idle_sessions(&self) -> Vec<EditSession> {
        lock(&self.inner.sessions).expire_idle(self.inner.config.session_idle_ms, now_ms())
    }

    pub fn conflicts(&self, document: DocumentId, block: BlockId) -> Vec<Conflict> {
        lock(&self.inner.conflicts).list(document, block)
    }

    /// Resolve a recorded conflict. Fails `NotFound` for an unknown id and
    /// `Permission` unless the caller authored either side; returns `false`
    /// if the conflict was already resolved.
    pub fn resolve_conflict(
        &self,
        conflict: ConflictId,
        user: &str,
        choice: ResolutionChoice,
    ) -> Result<bool, EngineError> {
        let record = lock(&self.inner.conflicts)
            .get(conflict)
            .ok_or(EngineError::NotFound {
                entity: "conflict",
                id: conflict,
            })?;
        if !record.involves(user) {
            return Err(EngineError::Permission { user: user.into() });
        }
        if record.resolved {
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        let user = user.to_string();
        let key = (record.document, record.block);
        self.dispatcher
            .execute(key, move || inner.process_resolution(conflict, user, choice))
    }

    /// Live block workers (observability hook).
    pub fn active_block_workers(&self) -> usize {
        self.dispatcher.active_workers()
    }
}

impl EngineInner {
    fn process_submit(&self, op: Operation) -> Result<SubmitOutcome, EngineError> {
        let block = self.content.read_block(op.document, op.block)?;
        let now = now_ms();

        let mut concurrent = lock(&self.ops).since(op.document, op.block, op.version);
        concurrent.extend(lock(&self.conflicts).pending_ops(op.document, op.block));
        // A pending operation can sit in several conflict records at once;
        // it must still rebase the submission exactly once.
        let mut seen = HashSet::new();
        concurrent.retain(|other| seen.insert(other.id) && op.concurrent_with(other));

        let transformed = transform(&op, &concurrent, block.kind, self.config.insert_tie)
            .inspect_err(|err| {
                tracing::warn!(op = %op.id, block = %op.block, %err, "transform rejected submission");
            })?;

        if let Some(first_seed) = transformed.conflicts.first().cloned() {
            // Freeze the rebased op at the block's current frame so later
            // resolution knows which applied operations it must still absorb.
            let mut frozen = transformed.op.clone();
            frozen.version = lock(&self.ops).head_version(op.document, op.block);

            let primary = Conflict::new(frozen.clone(), first_seed.concurrent, now);
            self.record_conflict(primary.clone());
            for seed in transformed.conflicts.iter().skip(1) {
                self.record_conflict(Conflict::new(frozen.clone(), seed.concurrent.clone(), now));
            }
            return Ok(SubmitOutcome::Conflicted(primary));
        }

        self.content.write_block(&transformed.op)?;
        let applied = lock(&self.ops).append(transformed.op);
        lock(&self.sessions).touch(applied.document, &applied.author, applied.id, now);
        self.broadcaster
            .broadcast(applied.document, &Notice::OperationApplied {
                operation: applied.clone(),
            });
        Ok(SubmitOutcome::Applied(applied))
    }

    fn record_conflict(&self, conflict: Conflict) {
        self.broadcaster
            .broadcast(conflict.document, &Notice::ConflictDetected {
                conflict: conflict.clone(),
            });
        for author in [&conflict.operation1.author, &conflict.operation2.author] {
            self.broadcaster
                .deliver_to_user(author, &Notice::ConflictDetected {
                    conflict: conflict.clone(),
                });
        }
        lock(&self.conflicts).insert(conflict);
    }

    fn process_resolution(
        &self,
        conflict_id: ConflictId,
        user: AuthorId,
        choice: ResolutionChoice,
    ) -> Result<bool, EngineError> {
        let now = now_ms();
        let record = {
            let mut conflicts = lock(&self.conflicts);
            let Some(record) = conflicts.get(conflict_id) else {
                return Err(EngineError::NotFound {
                    entity: "conflict",
                    id: conflict_id,
                });
            };
            if record.resolved {
                return Ok(false);
            }
            // Mark resolved first: the pending pair must leave the
            // concurrent set before its replacement operations apply.
            conflicts.resolve(conflict_id, user.clone(), now);
            record
        };

        let block = self.content.read_block(record.document, record.block)?;
        let to_apply = match choice {
            ResolutionChoice::Operation1 => pending_side(&record.operation1),
            ResolutionChoice::Operation2 => pending_side(&record.operation2),
            ResolutionChoice::Merge => merge_operations(&record, block.kind)?,
        };

        let mut last_version = None;
        for mut op in to_apply {
            // Each merge op's coordinates assume the previous one applied.
            if let Some(version) = last_version {
                op.version = version;
            }
            let applied = self.apply_resolved(op, block.kind)?;
            last_version = Some(applied.version);
        }

        self.broadcaster
            .broadcast(record.document, &Notice::ConflictResolved {
                conflict_id,
                resolved_by: user.clone(),
            });
        tracing::info!(conflict = %conflict_id, by = %user, ?choice, "conflict resolved");
        Ok(true)
    }

    /// Bring a resolution operation to the block's current frame and apply
    /// it. Resolution is authoritative: seeds raised here are logged, not
    /// re-recorded, or resolution could never terminate.
    fn apply_resolved(&self, op: Operation, kind: ContentKind) -> Result<Operation, EngineError> {
        let concurrent = lock(&self.ops).since(op.document, op.block, op.version);
        let transformed = transform(&op, &concurrent, kind, InsertTiePolicy::LeftWins)?;
        if transformed.is_conflicted() {
            tracing::warn!(op = %transformed.op.id, "resolution op re-conflicted; applying rebased form");
        }
        self.content.write_block(&transformed.op)?;
        let applied = lock(&self.ops).append(transformed.op);
        self.broadcaster
            .broadcast(applied.document, &Notice::OperationApplied {
                operation: applied.clone(),
            });
        Ok(applied)
    }
}

fn pending_side(op: &Operation) -> Vec<Operation> {
    if op.applied {
        Vec::new()
    } else {
        vec![op.clone()]
    }
}
