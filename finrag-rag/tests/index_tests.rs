//! Index build, search ordering and persistence.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use finrag_rag::mock::MockEmbeddingProvider;
use finrag_rag::{
    Chunk, EmbeddingIndex, Index, IndexLock, ProviderError, RagConfig, RagError, load_index,
    persist_index,
};
use proptest::prelude::*;

fn chunk(id: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        metadata: BTreeMap::new(),
        document_id: "doc".to_string(),
    }
}

fn chunks(n: usize) -> Vec<Chunk> {
    (0..n).map(|i| chunk(&format!("c{i}"), &format!("quarter {i} revenue summary"))).collect()
}

fn embedding_index(provider: MockEmbeddingProvider) -> EmbeddingIndex {
    let config = RagConfig::builder().embed_batch_size(3).build().unwrap();
    EmbeddingIndex::new(Arc::new(provider), &config)
}

fn arb_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim)
}

/// **Property: search results are bounded and ordered**
/// *For any* index and query, `search_vector` returns at most `top_k`
/// results with non-increasing scores.
mod prop_search_ordering {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn bounded_and_non_increasing(
            vectors in proptest::collection::vec(arb_vector(DIM), 1..30),
            query in arb_vector(DIM),
            top_k in 1usize..40,
        ) {
            let mut index = Index::new("mock", DIM);
            for (i, v) in vectors.iter().enumerate() {
                index.push(chunk(&format!("c{i}"), "t"), v.clone()).unwrap();
            }

            let results = index.search_vector(&query, top_k).unwrap();
            prop_assert_eq!(results.len(), top_k.min(vectors.len()));
            for pair in results.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}

#[tokio::test]
async fn build_embeds_every_chunk_in_order() {
    let provider = MockEmbeddingProvider::new(16);
    let embedding_index = embedding_index(provider);

    let index = embedding_index.build(chunks(7)).await.unwrap();

    assert_eq!(index.len(), 7);
    assert_eq!(index.embedding_model(), "mock:hash-16");
    let ids: Vec<&str> = index.chunks().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4", "c5", "c6"]);
}

#[tokio::test]
async fn build_fails_whole_on_provider_error() {
    let provider = MockEmbeddingProvider::new(16).failing(ProviderError::Unavailable {
        provider: "mock".into(),
        message: "connection refused".into(),
    });
    let err = embedding_index(provider).build(chunks(4)).await.unwrap_err();
    assert!(matches!(err, RagError::Embedding { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn build_rejects_vectors_of_unexpected_dimension() {
    let provider =
        MockEmbeddingProvider::new(4).with_vector("quarter 2 revenue summary", vec![1.0]);
    let err = embedding_index(provider).build(chunks(4)).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingDimensionMismatch { expected: 4, actual: 1, .. }));
}

#[tokio::test]
async fn persisted_index_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");
    let embedding_index = embedding_index(MockEmbeddingProvider::new(32));

    let built = embedding_index.build(chunks(10)).await.unwrap();
    embedding_index.persist(&built, &location).unwrap();
    let loaded = embedding_index.load(&location).unwrap();

    assert_eq!(loaded.manifest(), built.manifest());
    for question in ["quarter 3 revenue", "net income", "guidance for next year"] {
        let before = embedding_index.search(&built, question, 4).await.unwrap();
        let after = embedding_index.search(&loaded, question, 4).await.unwrap();
        assert_eq!(before, after);
    }
}

#[tokio::test]
async fn persisting_twice_replaces_the_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");
    let embedding_index = embedding_index(MockEmbeddingProvider::new(8));

    let first = embedding_index.build(chunks(2)).await.unwrap();
    persist_index(&first, &location).unwrap();
    let second = embedding_index.build(chunks(5)).await.unwrap();
    persist_index(&second, &location).unwrap();

    assert_eq!(load_index(&location).unwrap().len(), 5);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".staging-") || name.contains(".old-"))
        .collect();
    assert!(leftovers.is_empty(), "leftover directories: {leftovers:?}");
}

#[test]
fn missing_location_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_index(&dir.path().join("never-built")).unwrap_err();
    assert!(matches!(err, RagError::IndexNotFound { .. }));
}

#[test]
fn directory_without_manifest_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");
    fs::create_dir(&location).unwrap();
    fs::write(location.join("vectors.json"), "[]").unwrap();

    let err = load_index(&location).unwrap_err();
    assert!(matches!(err, RagError::IndexCorrupt { .. }));
}

#[tokio::test]
async fn tampered_store_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");
    let embedding_index = embedding_index(MockEmbeddingProvider::new(8));
    let index = embedding_index.build(chunks(3)).await.unwrap();
    persist_index(&index, &location).unwrap();

    let chunks_path = location.join("chunks.json");
    let mut stored: Vec<Chunk> = serde_json::from_slice(&fs::read(&chunks_path).unwrap()).unwrap();
    stored.pop();
    fs::write(&chunks_path, serde_json::to_vec(&stored).unwrap()).unwrap();

    let err = load_index(&location).unwrap_err();
    assert!(matches!(err, RagError::IndexCorrupt { .. }));
}

#[tokio::test]
async fn index_built_with_another_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");

    let builder = embedding_index(MockEmbeddingProvider::new(8).with_model_id("mock:old"));
    let index = builder.build(chunks(2)).await.unwrap();
    builder.persist(&index, &location).unwrap();

    let reader = embedding_index(MockEmbeddingProvider::new(8).with_model_id("mock:new"));
    let err = reader.load(&location).unwrap_err();
    assert!(matches!(err, RagError::EmbeddingModelMismatch { .. }));

    let err = reader.search(&index, "anything", 2).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingModelMismatch { .. }));
}

#[test]
fn second_lock_on_the_same_location_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("index");

    let held = IndexLock::acquire(&location).unwrap();
    assert!(held.path().ends_with("index.lock"));
    let err = IndexLock::acquire(&location).unwrap_err();
    assert!(matches!(err, RagError::IndexBusy { .. }));

    drop(held);
    assert!(IndexLock::acquire(&location).is_ok());
}
