//! Conflict records and resolution.
//!
//! A [`Conflict`] is data, not an error: it pairs two concurrent operations
//! the transform table refused to order on its own. The affected block keeps
//! operating while a conflict is outstanding, its pending (unapplied)
//! operations stay in every later transform's concurrent set so nobody
//! computes against stale state, and any author involved may resolve it.

use crate::op::{
    AuthorId, BlockId, ContentKind, DocumentId, InvalidOperation, Operation, OperationKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ConflictId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
    FirstWriteWins,
    Manual,
    #[default]
    Automatic,
}

/// Which side of the pair a resolving author picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    Operation1,
    Operation2,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub document: DocumentId,
    pub block: BlockId,
    pub operation1: Operation,
    pub operation2: Operation,
    pub created_at: u64,
    pub resolution_strategy: ResolutionStrategy,
    pub resolved: bool,
    pub resolved_by: Option<AuthorId>,
    pub resolved_at: Option<u64>,
}

impl Conflict {
    pub fn new(operation1: Operation, operation2: Operation, created_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            document: operation1.document,
            block: operation1.block,
            operation1,
            operation2,
            created_at,
            resolution_strategy: ResolutionStrategy::Automatic,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }

    /// Whether `user` authored either side of the pair.
    pub fn involves(&self, user: &str) -> bool {
        self.operation1.author == user || self.operation2.author == user
    }

    /// The not-yet-applied operations this conflict is holding back.
    pub fn pending_operations(&self) -> Vec<&Operation> {
        [&self.operation1, &self.operation2]
            .into_iter()
            .filter(|op| !op.applied)
            .collect()
    }
}

/// Repository of conflicts for the blocks this process serves.
pub trait ConflictStore: Send {
    fn insert(&mut self, conflict: Conflict);
    fn get(&self, id: ConflictId) -> Option<Conflict>;
    /// All conflicts recorded for a block, unresolved first, oldest first.
    fn list(&self, document: DocumentId, block: BlockId) -> Vec<Conflict>;
    /// Pending (unapplied) operations of unresolved conflicts on a block.
    fn pending_ops(&self, document: DocumentId, block: BlockId) -> Vec<Operation>;
    /// Mark a conflict resolved; returns the updated record.
    fn resolve(&mut self, id: ConflictId, by: AuthorId, now: u64) -> Option<Conflict>;
}

#[derive(Debug, Default)]
pub struct MemoryConflictStore {
    conflicts: Vec<Conflict>,
}

impl MemoryConflictStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConflictStore for MemoryConflictStore {
    fn insert(&mut self, conflict: Conflict) {
        tracing::info!(
            conflict = %conflict.id,
            block = %conflict.block,
            "conflict recorded"
        );
        self.conflicts.push(conflict);
    }

    fn get(&self, id: ConflictId) -> Option<Conflict> {
        self.conflicts.iter().find(|c| c.id == id).cloned()
    }

    fn list(&self, document: DocumentId, block: BlockId) -> Vec<Conflict> {
        let mut out: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|c| c.document == document && c.block == block)
            .cloned()
            .collect();
        out.sort_by_key(|c| (c.resolved, c.created_at));
        out
    }

    fn pending_ops(&self, document: DocumentId, block: BlockId) -> Vec<Operation> {
        self.conflicts
            .iter()
            .filter(|c| !c.resolved && c.document == document && c.block == block)
            .flat_map(|c| c.pending_operations().into_iter().cloned())
            .collect()
    }

    fn resolve(&mut self, id: ConflictId, by: AuthorId, now: u64) -> Option<Conflict> {
        let conflict = self.conflicts.iter_mut().find(|c| c.id == id)?;
        conflict.resolved = true;
        conflict.resolved_by = Some(by);
        conflict.resolved_at = Some(now);
        Some(conflict.clone())
    }
}

/// Build the operation sequence a `Merge` resolution applies.
///
/// The returned operations are in sequential coordinates: each assumes the
/// ones before it in the list have been applied. Already-applied sides of the
/// pair contribute no new operation, only the effect still missing from the
/// block. The guarantee is that after the sequence runs, both authors' edits
/// are reflected exactly once.
pub fn merge_operations(
    conflict: &Conflict,
    kind: ContentKind,
) -> Result<Vec<Operation>, InvalidOperation> {
    let op1 = &conflict.operation1;
    let op2 = &conflict.operation2;

    match (op1.kind, op2.kind) {
        (OperationKind::Delete, OperationKind::Delete) => {
            // Identical start positions; the union span must vanish once.
            if op2.applied {
                let remainder = op1.length.saturating_sub(op2.length);
                if remainder == 0 {
                    return Ok(Vec::new());
                }
                let op = Operation::delete(
                    op1.author.clone(),
                    op1.document,
                    op1.block,
                    op1.position,
                    remainder,
                )?;
                Ok(vec![op.at_version(op1.version)])
            } else {
                let op = Operation::delete(
                    op1.author.clone(),
                    op1.document,
                    op1.block,
                    op1.position,
                    op1.length.max(op2.length),
                )?;
                Ok(vec![op.at_version(op1.version.max(op2.version))])
            }
        }
        (OperationKind::Insert, OperationKind::Insert) => {
            // Smaller author first, exactly as the left-wins rule would order.
            let (first, second) = if op1.author <= op2.author {
                (op1, op2)
            } else {
                (op2, op1)
            };
            let mut out = Vec::new();
            if !first.applied {
                out.push(reissue_insert(first, first.position)?);
            }
            if !second.applied {
                let offset = first.insert_span(kind);
                out.push(reissue_insert(second, second.position + offset)?);
            }
            Ok(out)
        }
        (OperationKind::Insert, OperationKind::Delete) => merge_insert_delete(op1, op2, kind),
        (OperationKind::Delete, OperationKind::Insert) => merge_insert_delete(op2, op1, kind),
        // Remaining pairs never seed conflicts; resolve degenerates to
        // replaying whichever side is still pending.
        _ => Ok(conflict
            .pending_operations()
            .into_iter()
            .cloned()
            .collect()),
    }
}

/// Keep the insert, remove the deleted span around it exactly once.
fn merge_insert_delete(
    ins: &Operation,
    del: &Operation,
    kind: ContentKind,
) -> Result<Vec<Operation>, InvalidOperation> {
    let mut out = Vec::new();

    if del.applied {
        // The span is already gone; restore the insert into the gap.
        out.push(reissue_insert(ins, del.position)?);
        return Ok(out);
    }

    let split = ins.position.saturating_sub(del.position);
    if !ins.applied {
        out.push(reissue_insert(ins, ins.position)?);
    }
    // Left fragment: the original span up to the insert point.
    if split > 0 {
        out.push(
            Operation::delete(
                del.author.clone(),
                del.document,
                del.block,
                del.position,
                split,
            )?
            .at_version(del.version),
        );
    }
    // Right fragment: the rest of the span, now past the inserted text.
    let rest = del.length - split;
    if rest > 0 {
        out.push(
            Operation::delete(
                del.author.clone(),
                del.document,
                del.block,
                del.position + ins.insert_span(kind),
                rest,
            )?
            .at_version(del.version),
        );
    }
    Ok(out)
}

fn reissue_insert(op: &Operation, position: usize) -> Result<Operation, InvalidOperation> {
    Ok(Operation::insert(
        op.author.clone(),
        op.document,
        op.block,
        position,
        op.content.clone(),
    )?
    .at_version(op.version)
    .with_timestamp(op.timestamp))
}
