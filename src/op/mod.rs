//! Operation model for collaborative block editing.
//!
//! An [`Operation`] is the immutable description of a single edit against one
//! block of a document. Construction validates that the populated fields match
//! the operation kind; transformation (see [`crate::transform`]) always clones
//! with adjusted `position`/`length` and never mutates an existing operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

pub type OperationId = Uuid;
pub type DocumentId = Uuid;
pub type BlockId = Uuid;
pub type AuthorId = String;

/// Attribute payload for `Format`/`Attribute` operations.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Delete,
    Retain,
    Format,
    Attribute,
}

/// How a block's linear content is addressed.
///
/// `Text` and `RichText` positions count grapheme clusters; `List` positions
/// count items; `Table` positions count rows or columns on the axis named by
/// the operation's `"axis"` attribute (`"row"` when absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    RichText,
    List,
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOperation {
    #[error("insert requires non-empty content")]
    EmptyContent,
    #[error("{0:?} requires a non-empty span")]
    EmptySpan(OperationKind),
    #[error("{0:?} requires a non-empty attribute map")]
    EmptyAttributes(OperationKind),
    #[error("content not allowed on {0:?}")]
    UnexpectedContent(OperationKind),
    #[error("operation span {position}..{end} exceeds content length {len}")]
    OutOfBounds { position: usize, end: usize, len: usize },
}

/// One atomic edit. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub author: AuthorId,
    pub document: DocumentId,
    pub block: BlockId,
    pub kind: OperationKind,
    pub position: usize,
    pub length: usize,
    pub content: String,
    pub attributes: Attributes,
    pub timestamp: u64,
    /// Block version the author observed when producing this operation.
    pub version: u64,
    pub applied: bool,
}

impl Operation {
    fn base(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        kind: OperationKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.into(),
            document,
            block,
            kind,
            position: 0,
            length: 0,
            content: String::new(),
            attributes: Attributes::new(),
            timestamp: now_ms(),
            version: 0,
            applied: false,
        }
    }

    pub fn insert(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        position: usize,
        content: impl Into<String>,
    ) -> Result<Self, InvalidOperation> {
        let content = content.into();
        let mut op = Self::base(author, document, block, OperationKind::Insert);
        op.position = position;
        op.length = content.graphemes(true).count();
        op.content = content;
        op.validate()?;
        Ok(op)
    }

    pub fn delete(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        position: usize,
        length: usize,
    ) -> Result<Self, InvalidOperation> {
        let mut op = Self::base(author, document, block, OperationKind::Delete);
        op.position = position;
        op.length = length;
        op.validate()?;
        Ok(op)
    }

    pub fn retain(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        position: usize,
        length: usize,
    ) -> Result<Self, InvalidOperation> {
        let mut op = Self::base(author, document, block, OperationKind::Retain);
        op.position = position;
        op.length = length;
        op.validate()?;
        Ok(op)
    }

    pub fn format(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        position: usize,
        length: usize,
        attributes: Attributes,
    ) -> Result<Self, InvalidOperation> {
        let mut op = Self::base(author, document, block, OperationKind::Format);
        op.position = position;
        op.length = length;
        op.attributes = attributes;
        op.validate()?;
        Ok(op)
    }

    pub fn attribute(
        author: impl Into<AuthorId>,
        document: DocumentId,
        block: BlockId,
        attributes: Attributes,
    ) -> Result<Self, InvalidOperation> {
        let mut op = Self::base(author, document, block, OperationKind::Attribute);
        op.attributes = attributes;
        op.validate()?;
        Ok(op)
    }

    /// Declare the block version the author observed.
    pub fn at_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Override the creation timestamp (tests and replay tooling).
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check kind/field pairing. Constructors call this; the engine re-checks
    /// hand-built operations before any state change.
    pub fn validate(&self) -> Result<(), InvalidOperation> {
        match self.kind {
            OperationKind::Insert => {
                if self.content.is_empty() {
                    return Err(InvalidOperation::EmptyContent);
                }
            }
            OperationKind::Delete | OperationKind::Retain => {
                if self.length == 0 {
                    return Err(InvalidOperation::EmptySpan(self.kind));
                }
                if !self.content.is_empty() {
                    return Err(InvalidOperation::UnexpectedContent(self.kind));
                }
            }
            OperationKind::Format => {
                if self.length == 0 {
                    return Err(InvalidOperation::EmptySpan(self.kind));
                }
                if self.attributes.is_empty() {
                    return Err(InvalidOperation::EmptyAttributes(self.kind));
                }
            }
            OperationKind::Attribute => {
                if self.attributes.is_empty() {
                    return Err(InvalidOperation::EmptyAttributes(self.kind));
                }
            }
        }
        Ok(())
    }

    /// Length of the span this insert occupies once applied, per content kind.
    ///
    /// Text kinds count graphemes; list and table inserts occupy one slot
    /// (one item, one row or column) each.
    pub fn insert_span(&self, kind: ContentKind) -> usize {
        match kind {
            ContentKind::Text | ContentKind::RichText => self.content.graphemes(true).count(),
            ContentKind::List | ContentKind::Table => 1,
        }
    }

    /// Exclusive end of the span this operation touches.
    pub fn end(&self) -> usize {
        self.position + self.length
    }

    /// Whether `other` counts as concurrent with this operation: same block,
    /// different author, and either not yet applied or applied at a version
    /// this operation's author had not observed.
    pub fn concurrent_with(&self, other: &Operation) -> bool {
        self.block == other.block
            && self.author != other.author
            && (!other.applied || other.version > self.version)
    }

    /// Apply this operation to linear text content, splicing on grapheme
    /// boundaries. `Retain`, `Format` and `Attribute` leave content untouched.
    pub fn apply_to_text(&self, content: &str) -> Result<String, InvalidOperation> {
        let graphemes: Vec<&str> = content.graphemes(true).collect();
        let len = graphemes.len();
        match self.kind {
            OperationKind::Insert => {
                if self.position > len {
                    return Err(InvalidOperation::OutOfBounds {
                        position: self.position,
                        end: self.position,
                        len,
                    });
                }
                let mut out = String::with_capacity(content.len() + self.content.len());
                out.extend(graphemes[..self.position].iter().copied());
                out.push_str(&self.content);
                out.extend(graphemes[self.position..].iter().copied());
                Ok(out)
            }
            OperationKind::Delete => {
                if self.end() > len {
                    return Err(InvalidOperation::OutOfBounds {
                        position: self.position,
                        end: self.end(),
                        len,
                    });
                }
                let mut out = String::with_capacity(content.len());
                out.extend(graphemes[..self.position].iter().copied());
                out.extend(graphemes[self.end()..].iter().copied());
                Ok(out)
            }
            OperationKind::Retain | OperationKind::Format | OperationKind::Attribute => {
                Ok(content.to_string())
            }
        }
    }
}
