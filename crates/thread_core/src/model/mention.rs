//! Mention edge model.

use crate::model::note::{NoteId, NoteValidationError};
use serde::{Deserialize, Serialize};

/// Directed reference `source_id -> target_id`.
///
/// Construction and deserialization both go through
/// [`MentionEdge::try_new`], so a value of this type is never a self-loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MentionEdgeFields")]
pub struct MentionEdge {
    source_id: NoteId,
    target_id: NoteId,
}

/// Unchecked wire shape of [`MentionEdge`].
#[derive(Deserialize)]
struct MentionEdgeFields {
    source_id: NoteId,
    target_id: NoteId,
}

impl TryFrom<MentionEdgeFields> for MentionEdge {
    type Error = NoteValidationError;

    fn try_from(value: MentionEdgeFields) -> Result<Self, Self::Error> {
        Self::try_new(value.source_id, value.target_id)
    }
}

impl MentionEdge {
    pub fn try_new(source_id: NoteId, target_id: NoteId) -> Result<Self, NoteValidationError> {
        if source_id == target_id {
            return Err(NoteValidationError::SelfMention(source_id));
        }
        Ok(Self {
            source_id,
            target_id,
        })
    }

    pub fn source_id(&self) -> &NoteId {
        &self.source_id
    }

    pub fn target_id(&self) -> &NoteId {
        &self.target_id
    }
}

#[cfg(test)]
mod tests {
    use super::MentionEdge;
    use crate::model::note::{NoteId, NoteValidationError};

    fn id(value: &str) -> NoteId {
        NoteId::parse(value).expect("test id should parse")
    }

    #[test]
    fn self_loop_is_rejected() {
        let err = MentionEdge::try_new(id("a"), id("a")).expect_err("self loop must fail");
        assert_eq!(err, NoteValidationError::SelfMention(id("a")));
    }

    #[test]
    fn distinct_endpoints_are_kept() {
        let edge = MentionEdge::try_new(id("a"), id("b")).expect("distinct ids should pass");
        assert_eq!(edge.source_id().as_str(), "a");
        assert_eq!(edge.target_id().as_str(), "b");
    }

    #[test]
    fn deserialize_enforces_edge_invariants() {
        let err = serde_json::from_str::<MentionEdge>(r#"{"source_id":"a","target_id":"a"}"#)
            .expect_err("self loop must not deserialize");
        assert!(err.to_string().contains("cannot mention itself"));

        serde_json::from_str::<MentionEdge>(r#"{"source_id":"","target_id":"a"}"#)
            .expect_err("blank endpoint must not deserialize");

        let edge: MentionEdge = serde_json::from_str(r#"{"source_id":"a","target_id":"b"}"#)
            .expect("valid edge should deserialize");
        assert_eq!(edge, MentionEdge::try_new(id("a"), id("b")).expect("valid edge"));
    }
}
