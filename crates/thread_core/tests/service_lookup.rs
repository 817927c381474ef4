use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thread_core::db::{open_db_in_memory, share, DbError};
use thread_core::{
    LookupError, LookupResult, MentionEdge, MentionLookup, Note, NoteId, NoteListQuery,
    NoteRecord, NoteRepository, NoteService, NoteServiceError, RepoResult, SqliteNoteRepository,
};

/// SQLite repository whose mention lookups yield after reading, so
/// concurrent validations can interleave between read and write.
struct YieldingRepo {
    inner: SqliteNoteRepository,
    fail_lookups: AtomicBool,
}

impl YieldingRepo {
    fn new() -> Self {
        let conn = share(open_db_in_memory().expect("in-memory db should open"));
        Self {
            inner: SqliteNoteRepository::try_new(conn).expect("repository should initialize"),
            fail_lookups: AtomicBool::new(false),
        }
    }
}

impl NoteRepository for YieldingRepo {
    fn create_note(&self, note: &Note, mentions: &[NoteId]) -> RepoResult<NoteId> {
        self.inner.create_note(note, mentions)
    }

    fn update_note_content(
        &self,
        note_id: &NoteId,
        content: &str,
        mentions: &[NoteId],
    ) -> RepoResult<()> {
        self.inner.update_note_content(note_id, content, mentions)
    }

    fn get_note(&self, note_id: &NoteId) -> RepoResult<Option<NoteRecord>> {
        self.inner.get_note(note_id)
    }

    fn list_threads(&self, query: &NoteListQuery) -> RepoResult<Vec<NoteRecord>> {
        self.inner.list_threads(query)
    }

    fn list_replies(&self, parent_id: &NoteId) -> RepoResult<Vec<NoteRecord>> {
        self.inner.list_replies(parent_id)
    }

    fn soft_delete_note(&self, note_id: &NoteId) -> RepoResult<()> {
        self.inner.soft_delete_note(note_id)
    }

    fn add_mention(&self, edge: &MentionEdge) -> RepoResult<bool> {
        self.inner.add_mention(edge)
    }

    fn remove_mention(&self, source_id: &NoteId, target_id: &NoteId) -> RepoResult<bool> {
        self.inner.remove_mention(source_id, target_id)
    }

    fn list_mentions(&self, source_id: &NoteId) -> RepoResult<Vec<NoteId>> {
        self.inner.list_mentions(source_id)
    }

    fn list_backlinks(&self, target_id: &NoteId) -> RepoResult<Vec<NoteId>> {
        self.inner.list_backlinks(target_id)
    }

    fn note_exists(&self, note_id: &NoteId) -> RepoResult<bool> {
        self.inner.note_exists(note_id)
    }
}

#[async_trait]
impl MentionLookup for YieldingRepo {
    async fn mentioned_note_ids(&self, note_id: &NoteId) -> LookupResult<HashSet<NoteId>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(LookupError::Database(DbError::LockPoisoned));
        }
        let mentioned = self.inner.mentioned_note_ids(note_id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        mentioned
    }
}

fn mention(id: &NoteId) -> String {
    format!("[[note:{id}]]")
}

fn is_circular(result: &Result<bool, NoteServiceError>) -> bool {
    matches!(result, Err(NoteServiceError::CircularReference { .. }))
}

#[tokio::test]
async fn overlapping_opposite_mentions_cannot_both_pass() {
    let service = NoteService::new(YieldingRepo::new());
    let a = service.create_note("a").await.expect("create a").id;
    let b = service.create_note("b").await.expect("create b").id;

    let (forward, backward) = tokio::join!(service.add_mention(&a, &b), service.add_mention(&b, &a));

    let accepted = [&forward, &backward]
        .iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    let rejected = [&forward, &backward]
        .iter()
        .filter(|result| is_circular(result))
        .count();
    assert_eq!(accepted, 1, "forward={forward:?} backward={backward:?}");
    assert_eq!(rejected, 1, "forward={forward:?} backward={backward:?}");

    let a_mentions = service.get_note(&a).expect("get a").expect("a exists").mentions;
    let b_mentions = service.get_note(&b).expect("get b").expect("b exists").mentions;
    assert_eq!(a_mentions.len() + b_mentions.len(), 1);
}

#[tokio::test]
async fn overlapping_updates_cannot_close_a_cycle() {
    let service = NoteService::new(YieldingRepo::new());
    let a = service.create_note("a").await.expect("create a").id;
    let b = service.create_note("b").await.expect("create b").id;

    let (first, second) = tokio::join!(
        service.update_note(&a, format!("a -> {}", mention(&b))),
        service.update_note(&b, format!("b -> {}", mention(&a)))
    );

    let failures: Vec<_> = [first, second]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        NoteServiceError::CircularReference { .. }
    ));

    let a_mentions = service.get_note(&a).expect("get a").expect("a exists").mentions;
    let b_mentions = service.get_note(&b).expect("get b").expect("b exists").mentions;
    assert_eq!(a_mentions.len() + b_mentions.len(), 1);
}

#[tokio::test]
async fn lookup_storage_failure_surfaces_and_saves_nothing() {
    let service = NoteService::new(YieldingRepo::new());
    let a = service.create_note("a").await.expect("create a").id;
    let b = service.create_note("b").await.expect("create b").id;

    let repo = YieldingRepo::new();
    repo.fail_lookups.store(true, Ordering::SeqCst);
    let failing = NoteService::new(repo);
    let source = failing.create_note("source").await.expect("create source").id;
    let target = failing.create_note("target").await.expect("create target").id;

    let err = failing
        .add_mention(&source, &target)
        .await
        .expect_err("lookup failure must not be treated as safe");
    assert!(
        matches!(err, NoteServiceError::Lookup(LookupError::Database(_))),
        "unexpected error: {err:?}"
    );
    let stored = failing
        .get_note(&source)
        .expect("get source")
        .expect("source exists");
    assert!(stored.mentions.is_empty());
    assert!(failing
        .list_backlinks(&target)
        .expect("list backlinks")
        .is_empty());

    let err = failing
        .update_note(&source, format!("now {}", mention(&target)))
        .await
        .expect_err("update must fail with the lookup");
    assert!(matches!(
        err,
        NoteServiceError::Lookup(LookupError::Database(_))
    ));
    let stored = failing
        .get_note(&source)
        .expect("get source")
        .expect("source exists");
    assert_eq!(stored.content, "source");
    assert!(stored.mentions.is_empty());

    // Healthy lookups on a separate service still accept the same shape.
    assert!(service.add_mention(&a, &b).await.expect("healthy add"));
}
