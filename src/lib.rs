//! block-ot: operational transformation for real-time collaborative block editing.
//!
//! Multiple users mutate the same logical document concurrently; every client
//! must converge to identical content without centralized locking. This crate
//! is the consistency core that makes that hold:
//!
//! - **Operation model** - immutable, validated edit descriptions
//! - **Transform engine** - pure pairwise rebasing per content kind, with a
//!   deterministic author tie-break instead of wall-clock trust
//! - **Conflict detection** - ambiguous pairs become resolvable data, never
//!   silent drops
//! - **Session & cursor tracking** - presence with idle expiry
//! - **Operation log & dispatch** - per-block version counters, replay
//!   queries, and a per-block serializer so different blocks edit in parallel
//!
//! Storage, identity and transport stay outside: the engine consumes a
//! [`ContentStore`], an [`AccessControl`] and a [`Broadcaster`] supplied by
//! the deployment.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use block_ot::{
//!     AllowAll, CollabEngine, ContentKind, MemoryContentStore, NullBroadcaster, Operation,
//! };
//!
//! let content = Arc::new(MemoryContentStore::new());
//! let document = uuid::Uuid::new_v4();
//! let block = uuid::Uuid::new_v4();
//! content.create_block(document, block, ContentKind::Text, "helloworld");
//!
//! let engine = CollabEngine::new(
//!     content.clone(),
//!     Arc::new(AllowAll),
//!     Arc::new(NullBroadcaster),
//! );
//!
//! engine.start_session(document, "alice");
//! let op = Operation::insert("alice", document, block, 5, " ").unwrap();
//! let outcome = engine.submit_operation(op).unwrap();
//! assert!(outcome.applied().is_some());
//! assert_eq!(content.content(document, block).unwrap(), "hello world");
//! ```

// Operation model and validation
pub mod op;

// Pairwise operational transformation
pub mod transform;

// Conflict records and resolution
pub mod conflict;

// Edit sessions and cursor presence
pub mod session;

// Per-block operation log
pub mod log;

// Per-block serializer
pub mod dispatch;

// Engine façade and collaborator traits
pub mod engine;

// Re-export operation types
pub use op::{
    Attributes, AuthorId, BlockId, ContentKind, DocumentId, InvalidOperation, Operation,
    OperationId, OperationKind,
};

// Re-export transform types
pub use transform::{ConflictSeed, InsertTiePolicy, TransformError, Transformed, transform};

// Re-export conflict types
pub use conflict::{
    Conflict, ConflictId, ConflictStore, MemoryConflictStore, ResolutionChoice, ResolutionStrategy,
    merge_operations,
};

// Re-export session types
pub use session::{CURSOR_IDLE_MS, Cursor, EditSession, MemorySessionStore, SessionId, SessionStore};

// Re-export log types
pub use log::{MemoryOperationStore, OperationStore};

// Re-export dispatch types
pub use dispatch::{BlockKey, Dispatcher};

// Re-export engine types
pub use engine::memory::{
    AllowAll, AllowList, MemoryContentStore, NullBroadcaster, RecordingBroadcaster,
};
pub use engine::{
    AccessControl, BlockContent, Broadcaster, CollabEngine, ContentStore, EngineConfig,
    EngineError, Notice, SubmitOutcome,
};
