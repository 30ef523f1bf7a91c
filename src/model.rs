use std::collections::BTreeMap;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form string metadata attached to a record (`filename`, `date`, ...).
pub type Metadata = BTreeMap<String, String>;

/// The atomic unit of the store. Immutable once written.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct AnalysisRecord {
    /// Unique ID, stored as the raw 128-bit value
    pub key: u128,

    /// Embedding of `document`
    pub vector: Vec<f32>,

    /// Full analysis text
    pub document: String,

    pub metadata: Metadata,
}

impl AnalysisRecord {
    pub fn new(id: Uuid, vector: Vec<f32>, document: String, metadata: Metadata) -> Self {
        Self {
            key: id.as_u128(),
            vector,
            document,
            metadata,
        }
    }

    pub fn id(&self) -> Uuid {
        Uuid::from_u128(self.key)
    }
}

/// A record returned from a nearest-neighbour query.
/// `score` is a similarity: higher means closer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: AnalysisRecord,
    pub score: f32,
}

/// What callers of `AnalysisStore::search` get back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl From<ScoredRecord> for SearchHit {
    fn from(hit: ScoredRecord) -> Self {
        Self {
            document: hit.record.document,
            metadata: hit.record.metadata,
            score: hit.score,
        }
    }
}
