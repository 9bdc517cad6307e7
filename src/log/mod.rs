//! Per-block operation log.
//!
//! The log is the single source of truth for "what version is block B at".
//! Appending assigns `version = head + 1` and marks the operation applied;
//! [`OperationStore::since`] serves reconnecting clients replaying missed
//! edits in ascending version order.

use crate::op::{BlockId, DocumentId, Operation};
use std::collections::BTreeMap;

/// Repository of applied operations, ordered per (document, block).
pub trait OperationStore: Send {
    /// Append an operation: assigns the next version, marks it applied, and
    /// returns the stored form.
    fn append(&mut self, op: Operation) -> Operation;
    /// Applied operations with `version > since`, ascending.
    fn since(&self, document: DocumentId, block: BlockId, since: u64) -> Vec<Operation>;
    /// Highest version applied to a block; 0 for an untouched block.
    fn head_version(&self, document: DocumentId, block: BlockId) -> u64;
}

#[derive(Debug, Default)]
pub struct MemoryOperationStore {
    logs: BTreeMap<(DocumentId, BlockId), BlockLog>,
    /// Optional per-block cap; oldest entries are trimmed beyond it.
    cap: Option<usize>,
}

#[derive(Debug, Default)]
struct BlockLog {
    ops: Vec<Operation>,
    head: u64,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            logs: BTreeMap::new(),
            cap: Some(cap),
        }
    }
}

impl OperationStore for MemoryOperationStore {
    fn append(&mut self, mut op: Operation) -> Operation {
        let log = self.logs.entry((op.document, op.block)).or_default();
        log.head += 1;
        op.version = log.head;
        op.applied = true;
        tracing::debug!(
            op = %op.id,
            block = %op.block,
            version = op.version,
            "operation appended"
        );
        log.ops.push(op.clone());
        if let Some(cap) = self.cap
            && log.ops.len() > cap
        {
            let excess = log.ops.len() - cap;
            log.ops.drain(..excess);
        }
        op
    }

    fn since(&self, document: DocumentId, block: BlockId, since: u64) -> Vec<Operation> {
        self.logs
            .get(&(document, block))
            .map(|log| {
                log.ops
                    .iter()
                    .filter(|op| op.version > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn head_version(&self, document: DocumentId, block: BlockId) -> u64 {
        self.logs
            .get(&(document, block))
            .map(|log| log.head)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn op(author: &str, document: DocumentId, block: BlockId, pos: usize) -> Operation {
        Operation::insert(author, document, block, pos, "x").unwrap()
    }

    #[test]
    fn test_append_assigns_monotonic_versions() {
        let mut store = MemoryOperationStore::new();
        let (document, block) = (Uuid::new_v4(), Uuid::new_v4());
        let a = store.append(op("alice", document, block, 0));
        let b = store.append(op("bob", document, block, 1));
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert!(a.applied && b.applied);
        assert_eq!(store.head_version(document, block), 2);
    }

    #[test]
    fn test_blocks_version_independently() {
        let mut store = MemoryOperationStore::new();
        let document = Uuid::new_v4();
        let (block_a, block_b) = (Uuid::new_v4(), Uuid::new_v4());
        store.append(op("alice", document, block_a, 0));
        let b = store.append(op("alice", document, block_b, 0));
        assert_eq!(b.version, 1);
    }

    #[test]
    fn test_since_filters_and_orders() {
        let mut store = MemoryOperationStore::new();
        let (document, block) = (Uuid::new_v4(), Uuid::new_v4());
        for i in 0..5 {
            store.append(op("alice", document, block, i));
        }
        let tail = store.since(document, block, 2);
        let versions: Vec<u64> = tail.iter().map(|op| op.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert!(store.since(document, block, 5).is_empty());
    }

    #[test]
    fn test_since_unknown_block_is_empty() {
        let store = MemoryOperationStore::new();
        assert!(store.since(Uuid::new_v4(), Uuid::new_v4(), 0).is_empty());
        assert_eq!(store.head_version(Uuid::new_v4(), Uuid::new_v4()), 0);
    }

    #[test]
    fn test_cap_trims_oldest_but_keeps_head() {
        let mut store = MemoryOperationStore::with_cap(3);
        let (document, block) = (Uuid::new_v4(), Uuid::new_v4());
        for i in 0..5 {
            store.append(op("alice", document, block, i));
        }
        let kept = store.since(document, block, 0);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].version, 3);
        assert_eq!(store.head_version(document, block), 5);
    }
}
