//! Meilisearch client against a mock HTTP server

use std::sync::Arc;

use pretty_assertions::assert_eq;
use recsis_elt::adapter::{Adapters, MeiliIndex, SearchIndex};
use recsis_elt::error::AdapterError;
use recsis_elt::test_fixtures::{numbered_docs, MemoryDestination, MemorySource};
use recsis_elt::{Loader, Operation, OperationError};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, batch_size: usize) -> MeiliIndex {
    MeiliIndex::new(&server.uri(), Some("master".to_string()), batch_size).unwrap()
}

#[tokio::test]
async fn clear_index_deletes_all_documents_with_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/courses/documents"))
        .and(header("authorization", "Bearer master"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "taskUid": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, 10).clear_index("courses").await.unwrap();
}

#[tokio::test]
async fn add_documents_is_sent_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/courses/documents"))
        .and(query_param("primaryKey", "id"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;

    client(&server, 2)
        .add_documents("courses", &numbered_docs(5), Some("id"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let sizes: Vec<usize> = requests
        .iter()
        .map(|r| r.body_json::<Vec<serde_json::Value>>().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let first: Vec<serde_json::Value> = requests[0].body_json().unwrap();
    assert_eq!(first[0], json!({ "id": 0, "name": "row-0" }));
}

#[tokio::test]
async fn rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/courses/documents"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing primary key"))
        .mount(&server)
        .await;

    let err = client(&server, 10)
        .add_documents("courses", &numbered_docs(1), None)
        .await
        .unwrap_err();

    match err {
        AdapterError::SearchRejected {
            index,
            status,
            message,
        } => {
            assert_eq!(index, "courses");
            assert_eq!(status, 400);
            assert_eq!(message, "missing primary key");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn health_reports_unavailable_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(client(&server, 10).health().await.is_err());
}

#[test]
fn rejects_non_http_endpoints() {
    let err = MeiliIndex::new("ftp://search.local", None, 10).err().unwrap();
    assert_eq!(err.code(), "ELT-031");
}

#[tokio::test]
async fn loader_publishes_working_table_through_http() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/programs/documents"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes/programs/documents"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let adapters = Adapters::new(
        Arc::new(MemorySource::new()),
        Arc::new(MemoryDestination::new().with_table("program2json", numbered_docs(3))),
        Arc::new(client(&server, 100)),
    );

    Loader::new("program2json", "programs")
        .run(&adapters)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].method.as_str(), "DELETE");
    assert_eq!(requests[1].method.as_str(), "POST");
}

#[tokio::test]
async fn loader_publish_failure_names_table_and_index() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid API key"))
        .mount(&server)
        .await;

    let adapters = Adapters::new(
        Arc::new(MemorySource::new()),
        Arc::new(MemoryDestination::new().with_table("program2json", numbered_docs(1))),
        Arc::new(client(&server, 100)),
    );

    let err = Loader::new("program2json", "programs")
        .run(&adapters)
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::Load { .. }));
    let msg = err.to_string();
    assert!(msg.contains("'program2json' -> 'programs'"), "{msg}");
    assert!(msg.contains("publish phase"), "{msg}");
    assert!(msg.contains("(401)"), "{msg}");
}
