//! Mention graph validator.
//!
//! # Responsibility
//! - Answer "would adding `source -> target` close a mention cycle?".
//! - Surface lookup failures unchanged instead of guessing a verdict.
//!
//! # Invariants
//! - `source == target` is a cycle and is decided without any lookup.
//! - Each note is looked up at most once per validation, so traversal
//!   terminates even when the stored graph already contains cycles.
//! - The visited set is owned by the traversal; concurrent lookups of one
//!   level are merged into it sequentially.

use crate::db::DbError;
use crate::model::note::NoteId;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::{Duration, Instant};

const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 8;

pub type LookupResult<T> = Result<T, LookupError>;

/// Failure reported by a mention lookup collaborator.
#[derive(Debug)]
pub enum LookupError {
    /// Storage-layer failure.
    Database(DbError),
    /// Collaborator-specific failure outside SQLite (remote store, bridge).
    Backend(String),
    /// Validation did not finish before the configured deadline.
    TimedOut(Duration),
}

impl Display for LookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(err) => write!(f, "mention lookup failed: {err}"),
            Self::Backend(message) => write!(f, "mention lookup failed: {message}"),
            Self::TimedOut(limit) => {
                write!(f, "mention lookup timed out after {}ms", limit.as_millis())
            }
        }
    }
}

impl Error for LookupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Database(err) => Some(err),
            Self::Backend(_) => None,
            Self::TimedOut(_) => None,
        }
    }
}

impl From<DbError> for LookupError {
    fn from(value: DbError) -> Self {
        Self::Database(value)
    }
}

/// Error kinds surfaced by mention validation.
#[derive(Debug)]
pub enum NoteError {
    /// Committing `source_id -> target_id` would close a cycle.
    CircularReference { source_id: NoteId, target_id: NoteId },
    /// Lookup collaborator failed; propagated as-is.
    Lookup(LookupError),
}

impl Display for NoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircularReference {
                source_id,
                target_id,
            } => write!(
                f,
                "circular reference: note {source_id} cannot mention note {target_id}"
            ),
            Self::Lookup(err) => write!(f, "{err}"),
        }
    }
}

impl Error for NoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CircularReference { .. } => None,
            Self::Lookup(err) => Some(err),
        }
    }
}

impl From<LookupError> for NoteError {
    fn from(value: LookupError) -> Self {
        Self::Lookup(value)
    }
}

/// Read-only view of the mention graph, owned by the persistence layer.
#[async_trait]
pub trait MentionLookup: Send + Sync {
    /// Returns the ids directly mentioned by `note_id`.
    ///
    /// Unknown notes have no outgoing edges and yield an empty set.
    async fn mentioned_note_ids(&self, note_id: &NoteId) -> LookupResult<HashSet<NoteId>>;
}

/// Adapts an async closure into a [`MentionLookup`].
pub struct FnLookup<F> {
    lookup: F,
}

impl<F> FnLookup<F> {
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<F, Fut> MentionLookup for FnLookup<F>
where
    F: Fn(NoteId) -> Fut + Send + Sync,
    Fut: Future<Output = LookupResult<HashSet<NoteId>>> + Send + 'static,
{
    async fn mentioned_note_ids(&self, note_id: &NoteId) -> LookupResult<HashSet<NoteId>> {
        (self.lookup)(note_id.clone()).await
    }
}

/// Tuning knobs for mention validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionGuardConfig {
    /// Upper bound on lookups in flight for one traversal level.
    /// Values below 1 are treated as 1.
    pub max_concurrent_lookups: usize,
    /// Deadline for one whole validation. Needs a Tokio timer when set.
    pub lookup_timeout: Option<Duration>,
}

impl Default for MentionGuardConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            lookup_timeout: None,
        }
    }
}

/// Decides whether persisting `source_id -> target_id` would close a cycle.
///
/// Returns `Ok(true)` when `source_id` is reachable from `target_id`
/// (or both are the same note), `Ok(false)` when the edge is safe.
///
/// # Errors
/// - `NoteError::Lookup` when any lookup fails; never reported as `false`.
pub async fn would_create_cycle<L>(
    source_id: &NoteId,
    target_id: &NoteId,
    lookup: &L,
) -> Result<bool, NoteError>
where
    L: MentionLookup + ?Sized,
{
    would_create_cycle_with(
        source_id,
        target_id,
        lookup,
        &MentionGuardConfig::default(),
    )
    .await
}

/// Same as [`would_create_cycle`] with explicit fan-out and deadline.
pub async fn would_create_cycle_with<L>(
    source_id: &NoteId,
    target_id: &NoteId,
    lookup: &L,
    config: &MentionGuardConfig,
) -> Result<bool, NoteError>
where
    L: MentionLookup + ?Sized,
{
    if source_id == target_id {
        debug!("event=mention_cycle_check module=mention status=ok verdict=self_mention");
        return Ok(true);
    }

    let started_at = Instant::now();
    let fan_out = config.max_concurrent_lookups.max(1);
    let traversal = reaches(target_id, source_id, lookup, fan_out);
    let outcome = match config.lookup_timeout {
        Some(limit) => match tokio::time::timeout(limit, traversal).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LookupError::TimedOut(limit)),
        },
        None => traversal.await,
    };

    match outcome {
        Ok(reach) => {
            debug!(
                "event=mention_cycle_check module=mention status=ok cycle={} visited={} duration_ms={}",
                reach.found,
                reach.visited,
                started_at.elapsed().as_millis()
            );
            Ok(reach.found)
        }
        Err(err) => {
            warn!(
                "event=mention_cycle_check module=mention status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(NoteError::Lookup(err))
        }
    }
}

/// Runs the validator and turns a positive verdict into
/// `NoteError::CircularReference`.
pub async fn ensure_mention_allowed<L>(
    source_id: &NoteId,
    target_id: &NoteId,
    lookup: &L,
    config: &MentionGuardConfig,
) -> Result<(), NoteError>
where
    L: MentionLookup + ?Sized,
{
    if would_create_cycle_with(source_id, target_id, lookup, config).await? {
        return Err(NoteError::CircularReference {
            source_id: source_id.clone(),
            target_id: target_id.clone(),
        });
    }
    Ok(())
}

struct Reach {
    found: bool,
    visited: usize,
}

/// Level-by-level BFS from `start` looking for `goal`.
async fn reaches<L>(
    start: &NoteId,
    goal: &NoteId,
    lookup: &L,
    fan_out: usize,
) -> LookupResult<Reach>
where
    L: MentionLookup + ?Sized,
{
    let mut visited = HashSet::from([start.clone()]);
    let mut frontier = vec![start.clone()];

    while !frontier.is_empty() {
        let level: Vec<HashSet<NoteId>> = stream::iter(frontier.iter())
            .map(|note_id| lookup.mentioned_note_ids(note_id))
            .buffer_unordered(fan_out)
            .try_collect()
            .await?;

        let mut next = Vec::new();
        for mentioned in level {
            for note_id in mentioned {
                if &note_id == goal {
                    return Ok(Reach {
                        found: true,
                        visited: visited.len(),
                    });
                }
                if visited.insert(note_id.clone()) {
                    next.push(note_id);
                }
            }
        }
        frontier = next;
    }

    Ok(Reach {
        found: false,
        visited: visited.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        ensure_mention_allowed, would_create_cycle, FnLookup, LookupError, LookupResult,
        MentionGuardConfig, NoteError,
    };
    use crate::model::note::NoteId;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    fn id(value: &str) -> NoteId {
        NoteId::parse(value).expect("test id should parse")
    }

    fn graph(edges: &[(&str, &str)]) -> Arc<HashMap<NoteId, HashSet<NoteId>>> {
        let mut map: HashMap<NoteId, HashSet<NoteId>> = HashMap::new();
        for (source, target) in edges {
            map.entry(id(source)).or_default().insert(id(target));
        }
        Arc::new(map)
    }

    fn lookup_for(
        edges: &[(&str, &str)],
    ) -> FnLookup<
        impl Fn(NoteId) -> std::future::Ready<LookupResult<HashSet<NoteId>>> + Send + Sync,
    > {
        let graph = graph(edges);
        FnLookup::new(move |note_id: NoteId| {
            std::future::ready(Ok(graph.get(&note_id).cloned().unwrap_or_default()))
        })
    }

    #[tokio::test]
    async fn self_mention_is_a_cycle_without_lookup() {
        let lookup = FnLookup::new(|_note_id: NoteId| {
            std::future::ready(Err::<HashSet<NoteId>, _>(LookupError::Backend(
                "must not be called".to_string(),
            )))
        });
        let verdict = would_create_cycle(&id("n"), &id("n"), &lookup)
            .await
            .expect("self mention needs no lookup");
        assert!(verdict);
    }

    #[tokio::test]
    async fn direct_back_edge_is_a_cycle() {
        let lookup = lookup_for(&[("t", "s")]);
        let verdict = would_create_cycle(&id("s"), &id("t"), &lookup)
            .await
            .expect("in-memory lookup should not fail");
        assert!(verdict);
    }

    #[tokio::test]
    async fn unrelated_notes_are_safe() {
        let lookup = lookup_for(&[("a", "b")]);
        let verdict = would_create_cycle(&id("x"), &id("y"), &lookup)
            .await
            .expect("in-memory lookup should not fail");
        assert!(!verdict);
    }

    #[tokio::test]
    async fn ensure_maps_cycle_to_circular_reference() {
        let lookup = lookup_for(&[("b", "a")]);
        let err = ensure_mention_allowed(&id("a"), &id("b"), &lookup, &MentionGuardConfig::default())
            .await
            .expect_err("back edge should be rejected");
        match err {
            NoteError::CircularReference {
                source_id,
                target_id,
            } => {
                assert_eq!(source_id, id("a"));
                assert_eq!(target_id, id("b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn default_config_has_bounded_fan_out_and_no_deadline() {
        let config = MentionGuardConfig::default();
        assert_eq!(config.max_concurrent_lookups, 8);
        assert!(config.lookup_timeout.is_none());
    }
}
