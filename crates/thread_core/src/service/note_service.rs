//! Note use-case service.
//!
//! # Responsibility
//! - Provide note/reply create, update, delete and list APIs.
//! - Derive mention edges from content and keep the mention graph acyclic.
//!
//! # Invariants
//! - Every newly introduced mention edge passes cycle validation before it
//!   is persisted; a rejected write leaves storage untouched.
//! - Cycle check and edge write run under one service-wide write lock, so
//!   two overlapping writes cannot both pass against the same old graph.
//! - Mention targets must be active notes.
//! - `update_note` uses full content replacement semantics.

use crate::mention::graph::{
    ensure_mention_allowed, LookupError, MentionGuardConfig, MentionLookup, NoteError,
};
use crate::mention::parse::extract_mentions;
use crate::model::mention::MentionEdge;
use crate::model::note::{Note, NoteId, NoteValidationError};
use crate::repo::note_repo::{
    normalize_thread_limit, NoteListQuery, NoteRecord, NoteRepository, RepoError,
};
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::Mutex;

/// Service error for note use-cases.
#[derive(Debug)]
pub enum NoteServiceError {
    /// Note shape is invalid (blank content, self reply).
    InvalidNote(NoteValidationError),
    /// Target note does not exist.
    NoteNotFound(NoteId),
    /// Mentioned note does not exist or is deleted.
    MentionTargetNotFound(NoteId),
    /// Mention would close a cycle in the mention graph.
    CircularReference { source_id: NoteId, target_id: NoteId },
    /// Mention lookup failed during validation.
    Lookup(LookupError),
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for NoteServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNote(err) => write!(f, "{err}"),
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::MentionTargetNotFound(id) => write!(f, "mentioned note not found: {id}"),
            Self::CircularReference {
                source_id,
                target_id,
            } => write!(
                f,
                "circular reference: note {source_id} cannot mention note {target_id}"
            ),
            Self::Lookup(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent note state: {details}"),
        }
    }
}

impl Error for NoteServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidNote(err) => Some(err),
            Self::Lookup(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for NoteServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NoteNotFound(id),
            RepoError::Validation(err) => Self::InvalidNote(err),
            other => Self::Repo(other),
        }
    }
}

impl From<NoteValidationError> for NoteServiceError {
    fn from(value: NoteValidationError) -> Self {
        Self::InvalidNote(value)
    }
}

impl From<NoteError> for NoteServiceError {
    fn from(value: NoteError) -> Self {
        match value {
            NoteError::CircularReference {
                source_id,
                target_id,
            } => Self::CircularReference {
                source_id,
                target_id,
            },
            NoteError::Lookup(err) => Self::Lookup(err),
        }
    }
}

/// Thread list envelope used by service callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadListResult {
    /// Thread roots sorted by `updated_at DESC, id ASC`.
    pub items: Vec<NoteRecord>,
    /// Effective normalized limit used by the query.
    pub applied_limit: u32,
}

/// Note service facade over repository implementations.
///
/// The repository doubles as the mention lookup used for cycle checks.
pub struct NoteService<R: NoteRepository + MentionLookup> {
    repo: R,
    guard: MentionGuardConfig,
    /// Held from cycle check through the edge write.
    write_lock: Mutex<()>,
}

impl<R: NoteRepository + MentionLookup> NoteService<R> {
    /// Creates a service with default mention validation settings.
    pub fn new(repo: R) -> Self {
        Self::with_config(repo, MentionGuardConfig::default())
    }

    pub fn with_config(repo: R, guard: MentionGuardConfig) -> Self {
        Self {
            repo,
            guard,
            write_lock: Mutex::new(()),
        }
    }

    /// Starts a new thread.
    pub async fn create_note(
        &self,
        content: impl Into<String>,
    ) -> Result<NoteRecord, NoteServiceError> {
        self.insert(Note::new(content)).await
    }

    /// Posts a reply under an active note.
    pub async fn reply_to(
        &self,
        parent_id: &NoteId,
        content: impl Into<String>,
    ) -> Result<NoteRecord, NoteServiceError> {
        if !self.repo.note_exists(parent_id)? {
            return Err(NoteServiceError::NoteNotFound(parent_id.clone()));
        }
        self.insert(Note::reply(parent_id.clone(), content)).await
    }

    /// Replaces note content fully and re-derives its mention edges.
    ///
    /// Only mentions that are new relative to the stored edge set are
    /// validated; kept edges were validated when they were introduced.
    pub async fn update_note(
        &self,
        note_id: &NoteId,
        content: impl Into<String>,
    ) -> Result<NoteRecord, NoteServiceError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(NoteServiceError::InvalidNote(
                NoteValidationError::EmptyContent,
            ));
        }

        let _write = self.write_lock.lock().await;
        let existing = self
            .repo
            .get_note(note_id)?
            .ok_or_else(|| NoteServiceError::NoteNotFound(note_id.clone()))?;
        let mentions = extract_mentions(content.as_str());
        let kept: HashSet<&NoteId> = existing.mentions.iter().collect();
        for target_id in mentions.iter().filter(|id| !kept.contains(id)) {
            self.check_mention(note_id, target_id).await?;
        }

        self.repo
            .update_note_content(note_id, content.as_str(), &mentions)?;
        info!(
            "event=note_update module=service status=ok mentions={}",
            mentions.len()
        );
        self.read_back(note_id, "updated note not found in read-back")
    }

    /// Adds one explicit mention edge. Returns `false` when it already existed.
    pub async fn add_mention(
        &self,
        source_id: &NoteId,
        target_id: &NoteId,
    ) -> Result<bool, NoteServiceError> {
        let _write = self.write_lock.lock().await;
        if !self.repo.note_exists(source_id)? {
            return Err(NoteServiceError::NoteNotFound(source_id.clone()));
        }
        self.check_mention(source_id, target_id).await?;

        let edge = MentionEdge::try_new(source_id.clone(), target_id.clone())?;
        Ok(self.repo.add_mention(&edge)?)
    }

    /// Removes one mention edge. Returns `false` when it did not exist.
    pub fn remove_mention(
        &self,
        source_id: &NoteId,
        target_id: &NoteId,
    ) -> Result<bool, NoteServiceError> {
        Ok(self.repo.remove_mention(source_id, target_id)?)
    }

    /// Soft-deletes one note and drops its outgoing mentions.
    pub fn delete_note(&self, note_id: &NoteId) -> Result<(), NoteServiceError> {
        self.repo.soft_delete_note(note_id)?;
        info!("event=note_delete module=service status=ok");
        Ok(())
    }

    /// Gets one note by id.
    pub fn get_note(&self, note_id: &NoteId) -> Result<Option<NoteRecord>, NoteServiceError> {
        Ok(self.repo.get_note(note_id)?)
    }

    /// Lists thread roots with pagination.
    pub fn list_threads(
        &self,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<ThreadListResult, NoteServiceError> {
        let applied_limit = normalize_thread_limit(limit);
        let query = NoteListQuery {
            limit: Some(applied_limit),
            offset,
        };
        let items = self.repo.list_threads(&query)?;
        Ok(ThreadListResult {
            items,
            applied_limit,
        })
    }

    /// Lists replies of an active note, oldest first.
    pub fn list_replies(&self, parent_id: &NoteId) -> Result<Vec<NoteRecord>, NoteServiceError> {
        if !self.repo.note_exists(parent_id)? {
            return Err(NoteServiceError::NoteNotFound(parent_id.clone()));
        }
        Ok(self.repo.list_replies(parent_id)?)
    }

    /// Lists active notes that mention `note_id`.
    pub fn list_backlinks(&self, note_id: &NoteId) -> Result<Vec<NoteId>, NoteServiceError> {
        Ok(self.repo.list_backlinks(note_id)?)
    }

    async fn insert(&self, note: Note) -> Result<NoteRecord, NoteServiceError> {
        note.validate()?;
        let mentions = extract_mentions(note.content.as_str());
        let _write = self.write_lock.lock().await;
        for target_id in &mentions {
            self.check_mention(&note.id, target_id).await?;
        }

        let note_id = self.repo.create_note(&note, &mentions)?;
        info!(
            "event=note_create module=service status=ok reply={} mentions={}",
            note.is_reply(),
            mentions.len()
        );
        self.read_back(&note_id, "created note not found in read-back")
    }

    async fn check_mention(
        &self,
        source_id: &NoteId,
        target_id: &NoteId,
    ) -> Result<(), NoteServiceError> {
        // Self mentions are rejected by the validator without a lookup.
        if source_id != target_id && !self.repo.note_exists(target_id)? {
            return Err(NoteServiceError::MentionTargetNotFound(target_id.clone()));
        }

        ensure_mention_allowed(source_id, target_id, &self.repo, &self.guard)
            .await
            .map_err(|err| {
                let error_code = match &err {
                    NoteError::CircularReference { .. } => "circular_reference",
                    NoteError::Lookup(_) => "mention_lookup_failed",
                };
                warn!(
                    "event=mention_rejected module=service status=error error_code={error_code}"
                );
                NoteServiceError::from(err)
            })
    }

    fn read_back(
        &self,
        note_id: &NoteId,
        details: &'static str,
    ) -> Result<NoteRecord, NoteServiceError> {
        self.repo
            .get_note(note_id)?
            .ok_or(NoteServiceError::InconsistentState(details))
    }
}
