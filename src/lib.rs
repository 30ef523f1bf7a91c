pub mod analysis;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod service;
pub mod storage;
pub mod vector;
pub mod vision;

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::index::FlatIndex;
use crate::model::{AnalysisRecord, ScoredRecord};
use crate::storage::Segment;

pub use crate::analysis::{AnalysisStore, IdGenerator, RandomIds, SequentialIds, StoreTimeouts, DEFAULT_SEARCH_K};
pub use crate::embedding::{EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use crate::error::{AnalysisError, BackendError, EmbedError, ServiceError, VisionError};
pub use crate::model::{Metadata, SearchHit};

/// Persistence + nearest-neighbour lookup for analysis records.
///
/// Implementations must be safe to share across threads: concurrent `upsert`
/// and `query` calls are expected. Calls may block on I/O.
pub trait VectorStore: Send + Sync {
    /// Persists one record. Either the record is fully stored or nothing is.
    fn upsert(&self, record: AnalysisRecord) -> Result<(), StoreError>;

    /// Up to `k` records closest to `vector`, closest first.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension every stored vector has.
    fn dimension(&self) -> usize;
}

/// Disk-backed vector store: one append-only segment plus an in-memory
/// exact index rebuilt from the segment on open. Cosine similarity.
pub struct LocalVectorStore {
    segment: Mutex<Segment>,
    index: RwLock<FlatIndex>,
    dimension: usize,
}

impl fmt::Debug for LocalVectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalVectorStore")
            .field("dimension", &self.dimension)
            .field("records", &self.len())
            .finish()
    }
}

impl LocalVectorStore {
    pub fn open(path: &Path, dimension: usize, strict_durability: bool) -> Result<Self, StoreError> {
        let mut segment = Segment::open(path, strict_durability)?;
        let mut index = FlatIndex::new();

        for (offset, record) in segment.replay()? {
            if record.vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            if !index.insert(record.key, record.vector, offset) {
                return Err(StoreError::DuplicateId(uuid::Uuid::from_u128(record.key)));
            }
        }

        info!(
            path = %path.display(),
            records = index.len(),
            dimension,
            strict_durability,
            "vector store opened"
        );

        Ok(Self {
            segment: Mutex::new(segment),
            index: RwLock::new(index),
            dimension,
        })
    }
}

impl VectorStore for LocalVectorStore {
    fn upsert(&self, record: AnalysisRecord) -> Result<(), StoreError> {
        if record.vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }

        // Holding the segment lock serializes writers, so the duplicate
        // check and the append cannot interleave with another upsert.
        let mut segment = self.segment.lock().map_err(|_| StoreError::Poisoned)?;
        {
            let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
            if idx.contains(record.key) {
                return Err(StoreError::DuplicateId(record.id()));
            }
        }

        let offset = segment.append(&record)?;

        let mut idx = self.index.write().map_err(|_| StoreError::Poisoned)?;
        idx.insert(record.key, record.vector, offset);
        debug!(id = %uuid::Uuid::from_u128(record.key), offset, "record appended");
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let hits: Vec<(u64, f32)> = {
            let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
            idx.search(vector, k)
                .into_iter()
                .map(|(entry, dist)| (entry.offset, dist))
                .collect()
        };

        let segment = self.segment.lock().map_err(|_| StoreError::Poisoned)?;
        hits.into_iter()
            .map(|(offset, dist)| {
                Ok(ScoredRecord {
                    record: segment.read(offset)?,
                    score: crate::vector::similarity(dist),
                })
            })
            .collect()
    }

    fn len(&self) -> usize {
        // A panicking writer never leaves the index half-updated, so the count
        // behind a poisoned lock is still accurate.
        let idx = self.index.read().unwrap_or_else(|poisoned| {
            warn!("vector index lock poisoned; reporting last known size");
            poisoned.into_inner()
        });
        idx.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
