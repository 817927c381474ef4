//! Note domain model.
//!
//! # Responsibility
//! - Define the note record shared by thread roots and replies.
//! - Provide lifecycle helpers for soft-delete semantics.
//!
//! # Invariants
//! - `id` is stable and never reused for another note.
//! - `content` is never blank.
//! - A note never replies to itself.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque, non-empty note identifier.
///
/// New notes get a UUID v4 string, but any non-empty string coming from
/// storage or import paths is accepted as-is. Deserialization goes through
/// [`NoteId::parse`], so blank ids are rejected there too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier, rejecting blank values.
    pub fn parse(value: impl Into<String>) -> Result<Self, NoteValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(NoteValidationError::EmptyId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for NoteId {
    type Error = NoteValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<NoteId> for String {
    fn from(value: NoteId) -> Self {
        value.0
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shape-level validation failures for notes and mention edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    /// Identifier is empty or whitespace only.
    EmptyId,
    /// Content is empty or whitespace only.
    EmptyContent,
    /// Note names itself as its reply parent.
    SelfReply(NoteId),
    /// Mention edge points from a note to itself.
    SelfMention(NoteId),
}

impl Display for NoteValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "note id must not be empty"),
            Self::EmptyContent => write!(f, "note content must not be blank"),
            Self::SelfReply(id) => write!(f, "note {id} cannot reply to itself"),
            Self::SelfMention(id) => write!(f, "note {id} cannot mention itself"),
        }
    }
}

impl Error for NoteValidationError {}

/// Canonical domain record for a note or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Stable id used for mentions and reply links.
    pub id: NoteId,
    /// Thread parent. `None` means this note starts a thread.
    pub parent_id: Option<NoteId>,
    /// Markdown body, may contain `[[note:<id>]]` mentions.
    pub content: String,
    /// Soft delete tombstone.
    pub is_deleted: bool,
}

impl Note {
    /// Creates a thread root note with a generated id.
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_id(NoteId::generate(), content)
    }

    /// Creates a reply under `parent_id` with a generated id.
    pub fn reply(parent_id: NoteId, content: impl Into<String>) -> Self {
        let mut note = Self::new(content);
        note.parent_id = Some(parent_id);
        note
    }

    /// Creates a thread root note with a caller-provided id.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: NoteId, content: impl Into<String>) -> Self {
        Self {
            id,
            parent_id: None,
            content: content.into(),
            is_deleted: false,
        }
    }

    /// Checks shape-level invariants.
    pub fn validate(&self) -> Result<(), NoteValidationError> {
        if self.content.trim().is_empty() {
            return Err(NoteValidationError::EmptyContent);
        }
        if self.parent_id.as_ref() == Some(&self.id) {
            return Err(NoteValidationError::SelfReply(self.id.clone()));
        }
        Ok(())
    }

    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    /// Returns whether this note should be considered visible.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }

    /// Returns whether this note is a reply inside another note's thread.
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}
