use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::analysis::AnalysisStore;
use crate::error::ServiceError;
use crate::model::{Metadata, SearchHit};
use crate::vision::{ImageUpload, VisionAnalyzer};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub id: Uuid,
    pub analysis: String,
    pub references: String,
}

/// Upload workflow: image → vision model → analysis store.
#[derive(Clone)]
pub struct AnalysisService {
    vision: Arc<dyn VisionAnalyzer>,
    store: AnalysisStore,
    clock: Arc<dyn Clock>,
}

impl AnalysisService {
    pub fn new(vision: Arc<dyn VisionAnalyzer>, store: AnalysisStore, clock: Arc<dyn Clock>) -> Self {
        Self { vision, store, clock }
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    /// Analyses the image and records the analysis with `filename` and
    /// `date` metadata. Nothing is recorded when the vision call fails.
    pub async fn analyze_upload(&self, upload: &ImageUpload) -> Result<AnalysisOutcome, ServiceError> {
        if upload.image.trim().is_empty() {
            return Err(ServiceError::InvalidInput("image must not be empty".into()));
        }
        if upload.filename.trim().is_empty() {
            return Err(ServiceError::InvalidInput("filename must not be empty".into()));
        }

        let report = self.vision.analyze(upload).await.map_err(|e| {
            error!(filename = %upload.filename, error = %e, "vision analysis failed");
            e
        })?;

        let mut metadata = Metadata::new();
        metadata.insert("filename".into(), upload.filename.clone());
        metadata.insert(
            "date".into(),
            self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let id = self.store.record(&report.analysis, metadata).await?;
        info!(%id, filename = %upload.filename, "upload analysed");

        Ok(AnalysisOutcome {
            id,
            analysis: report.analysis,
            references: report.references,
        })
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, ServiceError> {
        Ok(self.store.search(query, k).await?)
    }
}
