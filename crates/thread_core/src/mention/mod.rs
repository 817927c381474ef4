//! Mention parsing and mention-graph validation.
//!
//! # Responsibility
//! - Extract `[[note:<id>]]` references from note content.
//! - Decide whether a proposed mention edge would close a cycle.
//!
//! # Invariants
//! - The mention graph is never held in memory here; it is read through a
//!   caller-supplied [`MentionLookup`].
//! - Validation is read-only and keeps no state between calls.

pub mod graph;
pub mod parse;

pub use graph::{
    ensure_mention_allowed, would_create_cycle, would_create_cycle_with, FnLookup, LookupError,
    LookupResult, MentionGuardConfig, MentionLookup, NoteError,
};
pub use parse::extract_mentions;
