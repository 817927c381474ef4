//! Core domain logic for Thread.
//! This crate owns notes, replies and the mention graph, and is the single
//! source of truth for the "mentions never form a cycle" invariant.

pub mod db;
pub mod logging;
pub mod mention;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use mention::{
    ensure_mention_allowed, extract_mentions, would_create_cycle, would_create_cycle_with,
    FnLookup, LookupError, LookupResult, MentionGuardConfig, MentionLookup, NoteError,
};
pub use model::mention::MentionEdge;
pub use model::note::{Note, NoteId, NoteValidationError};
pub use repo::note_repo::{
    NoteListQuery, NoteRecord, NoteRepository, RepoError, RepoResult, SqliteNoteRepository,
};
pub use service::note_service::{NoteService, NoteServiceError, ThreadListResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
