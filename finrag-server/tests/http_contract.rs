use std::sync::Arc;

use finrag_rag::mock::{MockEmbeddingProvider, MockGenerationProvider};
use finrag_rag::{ProviderError, RagConfig, RagOrchestrator, RetrievalBackend};
use finrag_server::protocol::{ErrorBody, QueryResponse, ReadinessBody};
use finrag_server::{AppState, ServerConfig, app_router};
use serde_json::{Value, json};

struct TestServer {
    base: String,
    orchestrator: Arc<RagOrchestrator>,
    data: std::path::PathBuf,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn spawn_server(generation: MockGenerationProvider) -> TestServer {
    let dir = tempfile::tempdir().expect("temp dir");
    let data = dir.path().join("data");
    std::fs::create_dir(&data).expect("data dir");
    std::fs::write(
        data.join("q3.txt"),
        "Third quarter net revenue was 8.1 billion dollars, up 6 percent year over year.",
    )
    .expect("write doc");

    let orchestrator = Arc::new(
        RagOrchestrator::builder()
            .config(RagConfig::default())
            .embedding_provider(Arc::new(MockEmbeddingProvider::new(16)))
            .generation_provider(Arc::new(generation))
            .backend(RetrievalBackend::LocalIndex { location: dir.path().join("index") })
            .build()
            .expect("orchestrator"),
    );
    let app = app_router(AppState::new(orchestrator.clone()), &ServerConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    TestServer { base: format!("http://{addr}"), orchestrator, data, handle, _dir: dir }
}

async fn post_question(client: &reqwest::Client, base: &str, question: &str) -> reqwest::Response {
    client
        .post(format!("{base}/query"))
        .json(&json!({"question": question}))
        .send()
        .await
        .expect("query response")
}

#[tokio::test]
async fn health_is_ok_even_before_indexing() {
    let server = spawn_server(MockGenerationProvider::answering("unused")).await;

    let response = reqwest::get(format!("{}/health", server.base)).await.expect("health response");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("health json");
    assert_eq!(body, json!({"status": "OK"}));

    server.handle.abort();
}

#[tokio::test]
async fn query_before_indexing_is_service_unavailable() {
    let server = spawn_server(MockGenerationProvider::answering("unused")).await;
    let client = reqwest::Client::new();

    let response = post_question(&client, &server.base, "What was Q3 revenue?").await;
    assert_eq!(response.status(), 503);
    let body: ErrorBody = response.json().await.expect("error json");
    assert!(body.detail.contains("Please run indexing first"));

    let ready = client.get(format!("{}/ready", server.base)).send().await.expect("ready response");
    assert_eq!(ready.status(), 503);
    let body: ReadinessBody = ready.json().await.expect("ready json");
    assert_eq!(body.status, "uninitialized");

    server.handle.abort();
}

#[tokio::test]
async fn indexed_service_answers_with_sources() {
    let server = spawn_server(MockGenerationProvider::answering("Net revenue was $8.1B.")).await;
    let client = reqwest::Client::new();

    server.orchestrator.index(&server.data).await.expect("index");
    let reload =
        client.post(format!("{}/admin/reload", server.base)).send().await.expect("reload response");
    assert_eq!(reload.status(), 200);
    let ready: ReadinessBody = reload.json().await.expect("reload json");
    assert_eq!(ready.status, "ready");

    let response = post_question(&client, &server.base, "What was Q3 revenue?").await;
    assert_eq!(response.status(), 200);
    let body: QueryResponse = response.json().await.expect("query json");
    assert_eq!(body.answer, "Net revenue was $8.1B.");
    assert_eq!(body.sources.len(), 1);
    assert!(body.sources[0].source.as_deref().is_some_and(|s| s.ends_with("q3.txt")));

    server.handle.abort();
}

#[tokio::test]
async fn blank_question_is_a_bad_request() {
    let server = spawn_server(MockGenerationProvider::answering("unused")).await;
    let client = reqwest::Client::new();

    let response = post_question(&client, &server.base, "   ").await;
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{}/query", server.base))
        .header("content-type", "application/json")
        .body("{\"q\": 1}")
        .send()
        .await
        .expect("malformed response");
    assert_eq!(response.status(), 400);

    server.handle.abort();
}

#[tokio::test]
async fn provider_outage_is_a_retryable_server_error() {
    let server = spawn_server(MockGenerationProvider::failing(ProviderError::Unavailable {
        provider: "mock".into(),
        message: "HTTP 503: backend overloaded".into(),
    }))
    .await;
    let client = reqwest::Client::new();
    server.orchestrator.index(&server.data).await.expect("index");
    server.orchestrator.initialize().await;

    let response = post_question(&client, &server.base, "What was Q3 revenue?").await;
    assert_eq!(response.status(), 500);
    let body: ErrorBody = response.json().await.expect("error json");
    assert!(body.detail.starts_with("Error processing query:"));
    assert!(body.retryable);

    server.handle.abort();
}
