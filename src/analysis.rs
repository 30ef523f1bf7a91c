//! The analysis store: text documents persisted with their embeddings and
//! looked up again by semantic similarity.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AnalysisError, BackendError};
use crate::model::{AnalysisRecord, Metadata, SearchHit};
use crate::{EmbeddingProvider, VectorStore};

pub const DEFAULT_SEARCH_K: usize = 5;

/// Source of record identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Random 128-bit (v4) ids. Collisions are not checked for.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Predictable ids counting up from a start value.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(start: u64) -> Self {
        Self { next: AtomicU64::new(start) }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Uuid {
        Uuid::from_u128(self.next.fetch_add(1, Ordering::Relaxed) as u128)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreTimeouts {
    pub embed: Duration,
    pub store: Duration,
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(5),
            store: Duration::from_secs(5),
        }
    }
}

/// Wraps an embedding provider and a vector store. Holds no state of its own
/// between calls; cheap to clone.
#[derive(Clone)]
pub struct AnalysisStore {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    ids: Arc<dyn IdGenerator>,
    timeouts: StoreTimeouts,
}

impl AnalysisStore {
    /// Fails when the embedder and the store disagree on the vector dimension.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        ids: Arc<dyn IdGenerator>,
        timeouts: StoreTimeouts,
    ) -> Result<Self, AnalysisError> {
        if embedder.dimension() != store.dimension() {
            return Err(AnalysisError::InvalidInput(format!(
                "embedder '{}' produces {}-d vectors but the store holds {}-d vectors",
                embedder.name(),
                embedder.dimension(),
                store.dimension()
            )));
        }
        Ok(Self { embedder, store, ids, timeouts })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Embeds and persists `document`, returning the id it was stored under.
    ///
    /// An embedding failure aborts before anything is written. A write
    /// failure discards the embedding; no partial record is left behind.
    ///
    /// The store timeout bounds the wait for the write to *start*. Once the
    /// append is underway the call waits for its real outcome, so a timeout
    /// error always means nothing was written.
    pub async fn record(&self, document: &str, metadata: Metadata) -> Result<Uuid, AnalysisError> {
        if document.trim().is_empty() {
            return Err(AnalysisError::InvalidInput("document must not be empty".into()));
        }

        let id = self.ids.next_id();
        let vector = self.embed(document).await?;
        let record = AnalysisRecord::new(id, vector, document.to_string(), metadata);

        let gate = Arc::new(WriteGate::default());
        let writer_gate = gate.clone();
        let store = self.store.clone();
        let mut write = tokio::task::spawn_blocking(move || writer_gate.begin().then(|| store.upsert(record)));

        let joined = match tokio::time::timeout(self.timeouts.store, &mut write).await {
            Ok(joined) => joined,
            Err(_) if gate.abandon() => Ok(None),
            Err(_) => {
                warn!(%id, after = ?self.timeouts.store, "vector write still running, waiting for its outcome");
                write.await
            }
        };
        let Some(written) = joined.map_err(BackendError::from)? else {
            return Err(BackendError::Timeout {
                op: "vector write",
                after: self.timeouts.store,
            }
            .into());
        };
        written.map_err(|e| {
            warn!(%id, error = %e, "vector store rejected record");
            e
        })?;

        info!(%id, chars = document.len(), "analysis recorded");
        Ok(id)
    }

    /// Up to `k` stored analyses most similar to `query_text`, closest first.
    /// An empty store yields an empty result.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>, AnalysisError> {
        if query_text.trim().is_empty() {
            return Err(AnalysisError::InvalidInput("query must not be empty".into()));
        }
        if k < 1 {
            return Err(AnalysisError::InvalidInput(format!("k must be at least 1, got {k}")));
        }

        let vector = self.embed(query_text).await?;

        let store = self.store.clone();
        let hits = bounded("vector query", self.timeouts.store, tokio::task::spawn_blocking(move || store.query(&vector, k)))
            .await?
            .map_err(BackendError::from)??;

        debug!(k, returned = hits.len(), "search served");
        Ok(hits.into_iter().map(SearchHit::from).collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AnalysisError> {
        let vector = bounded("embedding", self.timeouts.embed, self.embedder.embed(text)).await??;
        if vector.len() != self.embedder.dimension() {
            return Err(crate::error::EmbedError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }
}

/// Decides, exactly once, whether a queued blocking write runs or is dropped.
#[derive(Debug, Default)]
struct WriteGate(AtomicU8);

impl WriteGate {
    const PENDING: u8 = 0;
    const STARTED: u8 = 1;
    const ABANDONED: u8 = 2;

    /// Writer side. False when the caller has already given up.
    fn begin(&self) -> bool {
        self.0
            .compare_exchange(Self::PENDING, Self::STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Caller side, on timeout. False when the write has already started.
    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(Self::PENDING, Self::ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

async fn bounded<F: Future>(op: &'static str, after: Duration, fut: F) -> Result<F::Output, BackendError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| BackendError::Timeout { op, after })
}
