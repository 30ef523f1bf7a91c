use std::sync::Arc;

use scanlens::{
    AnalysisError, AnalysisStore, HashingEmbedder, LocalVectorStore, Metadata, RandomIds, StoreTimeouts, VectorStore,
};
use tempfile::TempDir;

const DIM: usize = 256;

fn open_store(dir: &TempDir) -> AnalysisStore {
    let vectors = LocalVectorStore::open(&dir.path().join("analyses.dat"), DIM, false).unwrap();
    AnalysisStore::new(
        Arc::new(HashingEmbedder::new(DIM)),
        Arc::new(vectors),
        Arc::new(RandomIds),
        StoreTimeouts::default(),
    )
    .unwrap()
}

fn meta(filename: &str) -> Metadata {
    let mut m = Metadata::new();
    m.insert("filename".into(), filename.into());
    m.insert("date".into(), "2024-01-01T00:00:00".into());
    m
}

const REPORTS: [&str; 4] = [
    "Chest X-ray shows no acute abnormality.",
    "MRI of the left knee demonstrates a complete ACL tear.",
    "CT head without contrast: no intracranial hemorrhage.",
    "Abdominal ultrasound reveals multiple gallstones without cholecystitis.",
];

#[tokio::test]
async fn recorded_document_retrieves_itself() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for (i, r) in REPORTS.iter().enumerate() {
        store.record(r, meta(&format!("scan{i}.png"))).await.unwrap();
    }

    for r in REPORTS {
        let hits = store.search(r, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, r);
    }
}

#[tokio::test]
async fn symbol_only_documents_retrieve_themselves() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.record(REPORTS[0], meta("x1.png")).await.unwrap();
    store.record("???", meta("q.png")).await.unwrap();
    store.record("\u{2014}", meta("dash.png")).await.unwrap();

    for doc in ["???", "\u{2014}"] {
        let hits = store.search(doc, 1).await.unwrap();
        assert_eq!(hits[0].document, doc);
        assert!(hits[0].score > 0.99, "{doc:?} scored {}", hits[0].score);
    }
}

#[tokio::test]
async fn enormous_k_returns_what_is_stored() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert!(store.search("anything", usize::MAX / 4).await.unwrap().is_empty());

    store.record(REPORTS[0], meta("x1.png")).await.unwrap();
    store.record(REPORTS[1], meta("k1.png")).await.unwrap();
    assert_eq!(store.search("anything", usize::MAX).await.unwrap().len(), 2);
}

#[tokio::test]
async fn results_are_capped_by_k_and_store_size() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for (i, r) in REPORTS.iter().enumerate() {
        store.record(r, meta(&format!("scan{i}.png"))).await.unwrap();
    }

    assert_eq!(store.search("knee tear", 2).await.unwrap().len(), 2);
    assert_eq!(store.search("knee tear", 50).await.unwrap().len(), REPORTS.len());
}

#[tokio::test]
async fn scores_never_increase() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for (i, r) in REPORTS.iter().enumerate() {
        store.record(r, meta(&format!("scan{i}.png"))).await.unwrap();
    }

    let hits = store.search("no acute hemorrhage on head CT", 10).await.unwrap();
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn fresh_store_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert!(store.search("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_document_leaves_store_untouched() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let err = store.record("   ", meta("blank.png")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidInput(_)));
    assert!(store.is_empty());
    assert!(store.search("blank", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn identical_documents_get_distinct_records() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let a = store.record(REPORTS[0], meta("a.png")).await.unwrap();
    let b = store.record(REPORTS[0], meta("b.png")).await.unwrap();
    assert_ne!(a, b);

    let hits = store.search(REPORTS[0], 5).await.unwrap();
    assert_eq!(hits.len(), 2);
    let mut files: Vec<_> = hits.iter().map(|h| h.metadata["filename"].as_str()).collect();
    files.sort_unstable();
    assert_eq!(files, ["a.png", "b.png"]);
}

#[tokio::test]
async fn chest_xray_scenario() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.record(REPORTS[0], meta("x1.png")).await.unwrap();

    let hits = store.search("acute abnormality chest", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document, REPORTS[0]);
    assert_eq!(hits[0].metadata, meta("x1.png"));
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        for (i, r) in REPORTS.iter().enumerate() {
            store.record(r, meta(&format!("scan{i}.png"))).await.unwrap();
        }
    }

    let store = open_store(&dir);
    assert_eq!(store.len(), REPORTS.len());
    let hits = store.search(REPORTS[1], 1).await.unwrap();
    assert_eq!(hits[0].document, REPORTS[1]);
    assert_eq!(hits[0].metadata["filename"], "scan1.png");
}

#[test]
fn reopening_with_another_dimension_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("analyses.dat");
    {
        let store = LocalVectorStore::open(&path, 3, false).unwrap();
        store
            .upsert(scanlens::model::AnalysisRecord::new(uuid::Uuid::new_v4(), vec![1.0, 0.0, 0.0], "a".into(), Metadata::new()))
            .unwrap();
    }
    assert!(LocalVectorStore::open(&path, 4, false).is_err());
}
