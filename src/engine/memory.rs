//! In-memory collaborators for embedded use and tests.

use super::{AccessControl, BlockContent, Broadcaster, ContentStore, EngineError, Notice};
use crate::dispatch::lock;
use crate::op::{BlockId, ContentKind, DocumentId, Operation, OperationKind};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Content store keeping block content as plain strings: text kinds splice
/// graphemes, lists splice newline-separated items, tables keep their rows as
/// lines (column operations reshape cells, which a string store does not
/// model, so they only bump the stored block).
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blocks: Mutex<HashMap<(DocumentId, BlockId), BlockContent>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_block(
        &self,
        document: DocumentId,
        block: BlockId,
        kind: ContentKind,
        content: &str,
    ) {
        lock(&self.blocks).insert((document, block), BlockContent {
            kind,
            content: content.to_string(),
        });
    }

    pub fn content(&self, document: DocumentId, block: BlockId) -> Option<String> {
        lock(&self.blocks)
            .get(&(document, block))
            .map(|b| b.content.clone())
    }
}

impl ContentStore for MemoryContentStore {
    fn read_block(&self, document: DocumentId, block: BlockId) -> Result<BlockContent, EngineError> {
        lock(&self.blocks)
            .get(&(document, block))
            .cloned()
            .ok_or(EngineError::NotFound {
                entity: "block",
                id: block,
            })
    }

    fn write_block(&self, op: &Operation) -> Result<(), EngineError> {
        let mut blocks = lock(&self.blocks);
        let state = blocks
            .get_mut(&(op.document, op.block))
            .ok_or(EngineError::NotFound {
                entity: "block",
                id: op.block,
            })?;
        state.content = match state.kind {
            ContentKind::Text | ContentKind::RichText => op
                .apply_to_text(&state.content)
                .map_err(|e| EngineError::Content(e.to_string()))?,
            ContentKind::List | ContentKind::Table => splice_lines(&state.content, op)?,
        };
        Ok(())
    }
}

fn splice_lines(content: &str, op: &Operation) -> Result<String, EngineError> {
    if op.attributes.get("axis").and_then(|v| v.as_str()) == Some("col") {
        return Ok(content.to_string());
    }
    let mut items: Vec<&str> = if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').collect()
    };
    match op.kind {
        OperationKind::Insert => {
            if op.position > items.len() {
                return Err(EngineError::Content(format!(
                    "insert at item {} past {} items",
                    op.position,
                    items.len()
                )));
            }
            items.insert(op.position, &op.content);
        }
        OperationKind::Delete => {
            if op.end() > items.len() {
                return Err(EngineError::Content(format!(
                    "delete span {}..{} past {} items",
                    op.position,
                    op.end(),
                    items.len()
                )));
            }
            items.drain(op.position..op.end());
        }
        OperationKind::Retain | OperationKind::Format | OperationKind::Attribute => {}
    }
    Ok(items.join("\n"))
}

/// Grants everyone everything.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn can_edit(&self, _user: &str, _document: DocumentId, _block: BlockId) -> bool {
        true
    }
}

/// Grants a fixed set of users.
#[derive(Debug, Default)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessControl for AllowList {
    fn can_edit(&self, user: &str, _document: DocumentId, _block: BlockId) -> bool {
        self.users.contains(user)
    }
}

/// Discards every notice.
#[derive(Debug, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _document: DocumentId, _notice: &Notice) {}
    fn deliver_to_user(&self, _user: &str, _notice: &Notice) {}
}

/// Records every notice for assertions.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<(Option<String>, Notice)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices broadcast to a document's room.
    pub fn broadcasts(&self) -> Vec<Notice> {
        lock(&self.events)
            .iter()
            .filter(|(user, _)| user.is_none())
            .map(|(_, notice)| notice.clone())
            .collect()
    }

    /// Notices delivered privately to one user.
    pub fn deliveries(&self, user: &str) -> Vec<Notice> {
        lock(&self.events)
            .iter()
            .filter(|(target, _)| target.as_deref() == Some(user))
            .map(|(_, notice)| notice.clone())
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, _document: DocumentId, notice: &Notice) {
        lock(&self.events).push((None, notice.clone()));
    }

    fn deliver_to_user(&self, user: &str, notice: &Notice) {
        lock(&self.events).push((Some(user.to_string()), notice.clone()));
    }
}
