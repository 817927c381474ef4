//! Note/mention repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist notes, replies and mention edges.
//! - Serve as the mention lookup collaborator for cycle validation.
//!
//! # Invariants
//! - Note queries only return active (`is_deleted=0`) rows.
//! - Content updates replace the outgoing mention set in one transaction.
//! - Soft-deleting a note drops its outgoing mention edges.
//! - The shared connection lock is never held across an await point.

use crate::db::{DbError, SharedConnection};
use crate::mention::graph::{LookupError, LookupResult, MentionLookup};
use crate::model::mention::MentionEdge;
use crate::model::note::{Note, NoteId, NoteValidationError};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::MutexGuard;

const THREADS_DEFAULT_LIMIT: u32 = 20;
const THREADS_LIMIT_MAX: u32 = 100;

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    parent_id,
    content,
    created_at,
    updated_at
FROM notes";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for note persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(NoteValidationError),
    Db(DbError),
    NotFound(NoteId),
    /// Required table is missing from the connection schema.
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "note repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NoteValidationError> for RepoError {
    fn from(value: NoteValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for LookupError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => Self::Database(err),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Read model for note detail/list use-cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    pub id: NoteId,
    /// Thread parent. `None` for thread roots.
    pub parent_id: Option<NoteId>,
    /// Raw markdown source text.
    pub content: String,
    /// Outgoing mention targets, sorted by id.
    pub mentions: Vec<NoteId>,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Update timestamp in epoch milliseconds.
    pub updated_at: i64,
}

/// Query options for thread list use-cases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteListQuery {
    /// Maximum rows to return. Defaults to 20 and clamps to 100.
    pub limit: Option<u32>,
    /// Number of rows to skip.
    pub offset: u32,
}

/// Repository interface for notes and mention edges.
pub trait NoteRepository {
    /// Creates one note with its initial outgoing mentions.
    fn create_note(&self, note: &Note, mentions: &[NoteId]) -> RepoResult<NoteId>;
    /// Replaces note content and its full outgoing mention set.
    fn update_note_content(
        &self,
        note_id: &NoteId,
        content: &str,
        mentions: &[NoteId],
    ) -> RepoResult<()>;
    /// Gets one active note by id.
    fn get_note(&self, note_id: &NoteId) -> RepoResult<Option<NoteRecord>>;
    /// Lists thread roots, most recently updated first.
    fn list_threads(&self, query: &NoteListQuery) -> RepoResult<Vec<NoteRecord>>;
    /// Lists active replies under one note, oldest first; replies from the
    /// same millisecond keep insertion order.
    fn list_replies(&self, parent_id: &NoteId) -> RepoResult<Vec<NoteRecord>>;
    /// Soft-deletes a note and drops its outgoing mentions.
    fn soft_delete_note(&self, note_id: &NoteId) -> RepoResult<()>;
    /// Inserts one edge. Returns `false` when it already existed.
    fn add_mention(&self, edge: &MentionEdge) -> RepoResult<bool>;
    /// Removes one edge. Returns `false` when it did not exist.
    fn remove_mention(&self, source_id: &NoteId, target_id: &NoteId) -> RepoResult<bool>;
    /// Lists ids mentioned by `source_id`.
    fn list_mentions(&self, source_id: &NoteId) -> RepoResult<Vec<NoteId>>;
    /// Lists active notes that mention `target_id`.
    fn list_backlinks(&self, target_id: &NoteId) -> RepoResult<Vec<NoteId>>;
    /// Returns whether an active note with this id exists.
    fn note_exists(&self, note_id: &NoteId) -> RepoResult<bool>;
}

/// SQLite-backed note repository.
#[derive(Clone)]
pub struct SqliteNoteRepository {
    conn: SharedConnection,
}

impl SqliteNoteRepository {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: SharedConnection) -> RepoResult<Self> {
        let repo = Self { conn };
        {
            let guard = repo.lock()?;
            ensure_note_connection_ready(&guard)?;
        }
        Ok(repo)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepoError::Db(DbError::LockPoisoned))
    }
}

impl NoteRepository for SqliteNoteRepository {
    fn create_note(&self, note: &Note, mentions: &[NoteId]) -> RepoResult<NoteId> {
        note.validate()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO notes (id, parent_id, content, is_deleted)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                note.id.as_str(),
                note.parent_id.as_ref().map(NoteId::as_str),
                note.content.as_str(),
                bool_to_int(note.is_deleted),
            ],
        )?;
        insert_mentions(&tx, &note.id, mentions)?;
        tx.commit()?;

        Ok(note.id.clone())
    }

    fn update_note_content(
        &self,
        note_id: &NoteId,
        content: &str,
        mentions: &[NoteId],
    ) -> RepoResult<()> {
        if content.trim().is_empty() {
            return Err(RepoError::Validation(NoteValidationError::EmptyContent));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE notes
             SET
                content = ?2,
                updated_at = (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER))
             WHERE id = ?1
               AND is_deleted = 0;",
            params![note_id.as_str(), content],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(note_id.clone()));
        }

        tx.execute(
            "DELETE FROM note_mentions WHERE source_id = ?1;",
            [note_id.as_str()],
        )?;
        insert_mentions(&tx, note_id, mentions)?;
        tx.commit()?;
        Ok(())
    }

    fn get_note(&self, note_id: &NoteId) -> RepoResult<Option<NoteRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{NOTE_SELECT_SQL}
             WHERE id = ?1
               AND is_deleted = 0;"
        ))?;

        let mut rows = stmt.query([note_id.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_note_row(&conn, row)?));
        }

        Ok(None)
    }

    fn list_threads(&self, query: &NoteListQuery) -> RepoResult<Vec<NoteRecord>> {
        let limit = normalize_thread_limit(query.limit);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{NOTE_SELECT_SQL}
             WHERE parent_id IS NULL
               AND is_deleted = 0
             ORDER BY updated_at DESC, id ASC
             LIMIT ?1 OFFSET ?2;"
        ))?;

        let mut rows = stmt.query(params![i64::from(limit), i64::from(query.offset)])?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(&conn, row)?);
        }
        Ok(notes)
    }

    fn list_replies(&self, parent_id: &NoteId) -> RepoResult<Vec<NoteRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{NOTE_SELECT_SQL}
             WHERE parent_id = ?1
               AND is_deleted = 0
             ORDER BY created_at ASC, rowid ASC;"
        ))?;

        let mut rows = stmt.query([parent_id.as_str()])?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(&conn, row)?);
        }
        Ok(notes)
    }

    fn soft_delete_note(&self, note_id: &NoteId) -> RepoResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE notes
             SET
                is_deleted = 1,
                updated_at = (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER))
             WHERE id = ?1
               AND is_deleted = 0;",
            [note_id.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(note_id.clone()));
        }

        tx.execute(
            "DELETE FROM note_mentions WHERE source_id = ?1;",
            [note_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn add_mention(&self, edge: &MentionEdge) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO note_mentions (source_id, target_id) VALUES (?1, ?2);",
            params![edge.source_id().as_str(), edge.target_id().as_str()],
        )?;
        Ok(changed == 1)
    }

    fn remove_mention(&self, source_id: &NoteId, target_id: &NoteId) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM note_mentions WHERE source_id = ?1 AND target_id = ?2;",
            params![source_id.as_str(), target_id.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn list_mentions(&self, source_id: &NoteId) -> RepoResult<Vec<NoteId>> {
        let conn = self.lock()?;
        select_mentions(&conn, source_id.as_str())
    }

    fn list_backlinks(&self, target_id: &NoteId) -> RepoResult<Vec<NoteId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT m.source_id
             FROM note_mentions m
             INNER JOIN notes n ON n.id = m.source_id
             WHERE m.target_id = ?1
               AND n.is_deleted = 0
             ORDER BY m.source_id ASC;",
        )?;
        let mut rows = stmt.query([target_id.as_str()])?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next()? {
            sources.push(parse_note_id(row.get(0)?, "note_mentions.source_id")?);
        }
        Ok(sources)
    }

    fn note_exists(&self, note_id: &NoteId) -> RepoResult<bool> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM notes
                WHERE id = ?1
                  AND is_deleted = 0
            );",
            [note_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

#[async_trait]
impl MentionLookup for SqliteNoteRepository {
    async fn mentioned_note_ids(&self, note_id: &NoteId) -> LookupResult<HashSet<NoteId>> {
        let mentions = self.list_mentions(note_id)?;
        Ok(mentions.into_iter().collect())
    }
}

/// Normalizes list limit according to the thread list contract.
pub fn normalize_thread_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => THREADS_DEFAULT_LIMIT,
        Some(value) if value > THREADS_LIMIT_MAX => THREADS_LIMIT_MAX,
        Some(value) => value,
    }
}

fn insert_mentions(tx: &Transaction<'_>, source_id: &NoteId, targets: &[NoteId]) -> RepoResult<()> {
    for target_id in targets {
        let edge = MentionEdge::try_new(source_id.clone(), target_id.clone())?;
        tx.execute(
            "INSERT OR IGNORE INTO note_mentions (source_id, target_id) VALUES (?1, ?2);",
            params![edge.source_id().as_str(), edge.target_id().as_str()],
        )?;
    }
    Ok(())
}

fn select_mentions(conn: &Connection, source_id: &str) -> RepoResult<Vec<NoteId>> {
    let mut stmt = conn.prepare(
        "SELECT target_id
         FROM note_mentions
         WHERE source_id = ?1
         ORDER BY target_id ASC;",
    )?;
    let mut rows = stmt.query([source_id])?;
    let mut targets = Vec::new();
    while let Some(row) = rows.next()? {
        targets.push(parse_note_id(row.get(0)?, "note_mentions.target_id")?);
    }
    Ok(targets)
}

fn parse_note_row(conn: &Connection, row: &Row<'_>) -> RepoResult<NoteRecord> {
    let id_text: String = row.get("id")?;
    let mentions = select_mentions(conn, &id_text)?;
    let id = parse_note_id(id_text, "notes.id")?;
    let parent_id = match row.get::<_, Option<String>>("parent_id")? {
        Some(value) => Some(parse_note_id(value, "notes.parent_id")?),
        None => None,
    };

    Ok(NoteRecord {
        id,
        parent_id,
        content: row.get("content")?,
        mentions,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_note_id(value: String, column: &str) -> RepoResult<NoteId> {
    NoteId::parse(value).map_err(|_| RepoError::InvalidData(format!("empty id in {column}")))
}

fn ensure_note_connection_ready(conn: &Connection) -> RepoResult<()> {
    for table in ["notes", "note_mentions"] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
