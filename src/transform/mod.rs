//! Pairwise operational transformation.
//!
//! [`transform`] rebases one incoming operation against every concurrent
//! operation already accepted for the same block, producing a new operation
//! whose position and length are valid in the block's current frame. The
//! engine is a pure function of its inputs: nothing is mutated, every rebase
//! step clones, and identical inputs always produce identical outputs, which
//! is what makes replica convergence testable by replay.
//!
//! Position arithmetic is shared by all content kinds; the kinds differ only
//! in span granularity (graphemes, list items, table rows/columns) and in
//! which operation kinds they accept. Ambiguous pairs (same-position
//! delete/delete, an insert landing strictly inside a concurrent delete's
//! span, and optionally same-position insert/insert) are never silently
//! resolved: they surface as [`ConflictSeed`]s for the conflict detector.

use crate::op::{ContentKind, Operation, OperationKind};
use serde::{Deserialize, Serialize};

/// Ordering policy for two inserts at the same position.
///
/// `LeftWins` orders the lexicographically smaller author first, which keeps
/// every replica convergent without a central sequencer. `Conflict` opts a
/// deployment out of auto-ordering and records a conflict instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertTiePolicy {
    #[default]
    LeftWins,
    Conflict,
}

/// A concurrent pair the transform table refuses to auto-resolve.
///
/// The engine pairs the fully rebased incoming operation with
/// `concurrent` to build a [`crate::conflict::Conflict`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSeed {
    pub concurrent: Operation,
}

/// Result of rebasing one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub op: Operation,
    pub conflicts: Vec<ConflictSeed>,
}

impl Transformed {
    pub fn is_conflicted(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// No transform rule exists for this kind on this content. A deployment
    /// defect, fatal to the request that hit it, never silently skipped.
    #[error("no transform rule for {op_kind:?} on {content:?} content")]
    UnsupportedKindPair {
        content: ContentKind,
        op_kind: OperationKind,
    },
}

/// Axis a table operation addresses, taken from its `"axis"` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableAxis {
    Row,
    Col,
}

fn table_axis(op: &Operation) -> TableAxis {
    match op.attributes.get("axis").and_then(|v| v.as_str()) {
        Some("col") => TableAxis::Col,
        _ => TableAxis::Row,
    }
}

fn supports(content: ContentKind, kind: OperationKind) -> bool {
    match kind {
        OperationKind::Format => content == ContentKind::RichText,
        _ => true,
    }
}

/// Rebase `incoming` against `concurrent` operations on the same block.
///
/// Concurrent operations are visited oldest first (timestamp, then author,
/// then id, so replicas agree on the order without wall-clock trust). Each
/// step clones with `version = max(inputs) + 1`; the inputs are never
/// touched.
pub fn transform(
    incoming: &Operation,
    concurrent: &[Operation],
    content: ContentKind,
    tie: InsertTiePolicy,
) -> Result<Transformed, TransformError> {
    if !supports(content, incoming.kind) {
        return Err(TransformError::UnsupportedKindPair {
            content,
            op_kind: incoming.kind,
        });
    }

    let mut ordered: Vec<&Operation> = concurrent.iter().collect();
    ordered.sort_by(|a, b| {
        (a.timestamp, &a.author, a.id.as_bytes()).cmp(&(b.timestamp, &b.author, b.id.as_bytes()))
    });

    let mut current = incoming.clone();
    let mut conflicts = Vec::new();
    for other in ordered {
        if !supports(content, other.kind) {
            return Err(TransformError::UnsupportedKindPair {
                content,
                op_kind: other.kind,
            });
        }
        rebase(&mut current, other, content, tie, &mut conflicts);
        current.version = current.version.max(other.version) + 1;
    }

    if !conflicts.is_empty() {
        tracing::debug!(
            op = %current.id,
            block = %current.block,
            conflicts = conflicts.len(),
            "transform routed ambiguous pair(s) to conflict detection"
        );
    }

    Ok(Transformed {
        op: current,
        conflicts,
    })
}

/// Adjust `current` for one concurrent operation.
fn rebase(
    current: &mut Operation,
    other: &Operation,
    content: ContentKind,
    tie: InsertTiePolicy,
    conflicts: &mut Vec<ConflictSeed>,
) {
    use OperationKind::*;

    // Block-scoped attribute ops carry no position; two of them merge.
    if current.kind == Attribute || other.kind == Attribute {
        if current.kind == Attribute && other.kind == Attribute {
            merge_attributes(current, other);
        }
        return;
    }

    // Table rows and columns are independent coordinate spaces.
    if content == ContentKind::Table && table_axis(current) != table_axis(other) {
        return;
    }

    match (current.kind, other.kind) {
        (Insert, Insert) => {
            let span = other.insert_span(content);
            if other.position < current.position {
                current.position += span;
            } else if other.position == current.position && current.author != other.author {
                match tie {
                    InsertTiePolicy::Conflict => conflicts.push(ConflictSeed {
                        concurrent: other.clone(),
                    }),
                    InsertTiePolicy::LeftWins => {
                        if other.author < current.author {
                            current.position += span;
                        }
                    }
                }
            }
        }
        (Insert, Delete) => {
            if other.end() <= current.position {
                current.position -= other.length;
            } else if other.position < current.position {
                // Insert point sits strictly inside the deleted span: no
                // single rebased op keeps the insert on both replicas.
                conflicts.push(ConflictSeed {
                    concurrent: other.clone(),
                });
            }
        }
        (Insert, Retain) | (Insert, Format) => {}
        (Delete, Insert) => span_vs_insert(current, other, content, true, conflicts),
        (Retain, Insert) | (Format, Insert) => {
            span_vs_insert(current, other, content, false, conflicts)
        }
        (Delete, Delete) => {
            if other.position == current.position {
                // Both authors deleting from the same point: genuine conflict.
                conflicts.push(ConflictSeed {
                    concurrent: other.clone(),
                });
            } else {
                span_vs_delete(current, other);
            }
        }
        (Retain, Delete) | (Format, Delete) => span_vs_delete(current, other),
        (Delete, Retain) | (Delete, Format) => {}
        (Retain, Retain) | (Retain, Format) | (Format, Retain) => {}
        (Format, Format) => {
            if current.position == other.position && current.length == other.length {
                merge_attributes(current, other);
            }
        }
        // Attribute pairs handled above.
        (Attribute, _) | (_, Attribute) => unreachable!("attribute ops handled before the table"),
    }
}

/// Remap a spanning operation (delete/retain/format) around a concurrent
/// insert. An insert strictly inside a delete's span is ambiguous and seeds a
/// conflict; inside a retain/format span it just grows the span.
fn span_vs_insert(
    current: &mut Operation,
    other: &Operation,
    content: ContentKind,
    conflict_on_inside: bool,
    conflicts: &mut Vec<ConflictSeed>,
) {
    let span = other.insert_span(content);
    if other.position <= current.position {
        current.position += span;
    } else if other.position < current.end() {
        if conflict_on_inside {
            conflicts.push(ConflictSeed {
                concurrent: other.clone(),
            });
        } else {
            current.length += span;
        }
    }
}

/// Shrink and shift a spanning operation around a concurrent delete. The
/// overlap is subtracted exactly once; a fully shadowed span degenerates to
/// length zero and applies as a no-op.
fn span_vs_delete(current: &mut Operation, other: &Operation) {
    let overlap = current
        .end()
        .min(other.end())
        .saturating_sub(current.position.max(other.position));
    let shift = other
        .end()
        .min(current.position)
        .saturating_sub(other.position);
    current.position -= shift;
    current.length -= overlap;
}

/// Key-wise last-writer-wins merge of `other`'s attributes into `current`.
/// The winner per key is the operation with the greater (timestamp, author)
/// pair, so both transform directions agree on the merged map.
fn merge_attributes(current: &mut Operation, other: &Operation) {
    let keep_current = (current.timestamp, &current.author) >= (other.timestamp, &other.author);
    for (key, value) in &other.attributes {
        if current.attributes.contains_key(key) && keep_current {
            continue;
        }
        current.attributes.insert(key.clone(), value.clone());
    }
}
