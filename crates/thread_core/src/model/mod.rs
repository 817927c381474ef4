//! Domain model for notes, replies and mention edges.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Validate shape-level invariants before anything reaches storage.
//!
//! # Invariants
//! - Every note is identified by a stable, non-empty `NoteId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.
//! - A mention edge never points from a note to itself.

pub mod mention;
pub mod note;
