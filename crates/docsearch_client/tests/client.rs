use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use docsearch_client::{
    CallOptions, ClientSettings, DocSearchClient, FailureKind, PollOutcome, PollSettings,
    ProgressSink, RetryPolicy,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(client_logging::initialize_for_tests);
}

fn client(server: &MockServer) -> DocSearchClient {
    init_logging();
    let settings = ClientSettings {
        base_url: server.uri(),
        user_id: 7,
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        poll: PollSettings {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_millis(10),
            max_duration: Some(Duration::from_secs(5)),
        },
        ..ClientSettings::default()
    };
    DocSearchClient::new(settings).expect("client")
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "message": "ok",
        "data": data,
        "code": 200
    }))
}

fn file_list(ids: &[u64]) -> Value {
    let files: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "original_name": format!("doc-{id}.pdf"), "file_size": 10}))
        .collect();
    json!({
        "files": files,
        "pagination": {"total": ids.len(), "page": 1, "page_size": 20, "total_pages": 1}
    })
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

#[tokio::test]
async fn concurrent_identical_reads_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .and(query_param("user_id", "7"))
        .respond_with(ok(file_list(&[1, 2])).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let (a, b) = tokio::join!(client.list_files(1, 20), client.list_files(1, 20));

    let a = a.expect("first caller");
    assert_eq!(a, b.expect("second caller"));
    assert!(a.contains(2));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn fresh_cache_entry_is_served_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/sessions"))
        .respond_with(ok(json!([{"session_id": 1, "session_name": "a"}])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let first = client.list_sessions().await.expect("first");
    let second = client.list_sessions().await.expect("cached");
    assert_eq!(first, second);
    assert_eq!(client.cache().len(), 1);

    let bypass = client.with_call_options(CallOptions {
        bypass_cache: true,
        ..CallOptions::default()
    });
    bypass.list_sessions().await.expect("bypassed");
}

#[tokio::test]
async fn delete_invalidates_cached_file_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .respond_with(ok(file_list(&[5])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .respond_with(ok(file_list(&[])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/file/delete/5"))
        .and(query_param("user_id", "7"))
        .respond_with(ok(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.list_files(1, 20).await.expect("before").contains(5));
    client.delete_file(5).await.expect("delete");

    let after = client.list_files(1, 20).await.expect("after");
    assert!(!after.contains(5));
    assert_eq!(requests_to(&server, "/api/file/list").await, 2);
}

#[tokio::test]
async fn transient_failure_is_retried_for_reads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/info/4"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/info/4"))
        .respond_with(ok(json!({"id": 4, "original_name": "x.pdf"})))
        .mount(&server)
        .await;

    let info = client(&server).file_info(4).await.expect("recovered");
    assert_eq!(info["original_name"], "x.pdf");
    assert_eq!(requests_to(&server, "/api/file/info/4").await, 2);
}

#[tokio::test]
async fn persistent_failure_is_exhausted_after_four_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/analytics"))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let err = client(&server).analytics(7).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::Exhausted {
            attempts: 4,
            last: Box::new(FailureKind::HttpStatus(502)),
        }
    );
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn mutations_are_not_retried_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/file/rename/3"))
        .and(body_partial_json(json!({"new_name": "b.pdf", "user_id": 7})))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).rename_file(3, "b.pdf").await.unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(503));
}

#[tokio::test]
async fn upload_sends_owner_and_file_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/file/upload"))
        .and(body_string_contains("name=\"user_id\""))
        .and(body_string_contains("name=\"file\"; filename=\"notes.txt\""))
        .respond_with(
            ok(json!({"file_id": 11, "filename": "notes.txt", "size": 200_000}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let sink: Arc<dyn ProgressSink> = Arc::new(move |percent: u8| record.lock().unwrap().push(percent));
    let content = vec![b'a'; 200_000];

    let client = client(&server);
    let (first, second) = tokio::join!(
        client.upload_file("notes.txt", content.clone(), Some(sink)),
        client.upload_file("notes.txt", content.clone(), None),
    );

    let receipt = first.expect("upload");
    assert_eq!(receipt.file_id, 11);
    assert_eq!(second.expect("joined upload"), receipt);

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn blank_upload_name_never_reaches_the_network() {
    let server = MockServer::start().await;
    let err = client(&server)
        .upload_file("  ", b"x".to_vec(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidRequest);
    assert_eq!(requests_to(&server, "/api/file/upload").await, 0);
}

#[tokio::test]
async fn upload_path_reads_the_file_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/file/upload"))
        .and(body_string_contains("filename=\"report.txt\""))
        .and(body_string_contains("quarterly numbers"))
        .respond_with(ok(json!({"file_id": 12, "filename": "report.txt"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("report.txt");
    std::fs::write(&file, "quarterly numbers").expect("write");

    let receipt = client(&server).upload_path(&file, None).await.expect("upload");
    assert_eq!(receipt.file_id, 12);
}

#[tokio::test]
async fn batch_delete_reports_each_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/file/batch/delete"))
        .and(body_partial_json(json!({"file_ids": [1, 2], "user_id": 7})))
        .respond_with(ok(json!({
            "results": [
                {"file_id": 1, "success": true, "message": "deleted"},
                {"file_id": 2, "success": false, "message": "not found"}
            ],
            "success_count": 1,
            "total_count": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = client(&server).batch_delete(&[1, 2]).await.expect("batch");
    assert_eq!(report.success_count, 1);
    assert!(!report.results[1].success);
}

#[tokio::test]
async fn watch_processing_polls_until_completed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/status/21"))
        .respond_with(ok(json!({"process_status": "processing", "process_progress": 40})))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/status/21"))
        .respond_with(ok(json!({"process_status": "completed", "process_progress": 100})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .respond_with(ok(file_list(&[21])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.list_files(1, 20).await.expect("list");

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let record = outcomes.clone();
    let handle = client.watch_processing(21, move |outcome| record.lock().unwrap().push(outcome));

    assert_eq!(handle.wait().await, PollOutcome::Completed);
    assert_eq!(*outcomes.lock().unwrap(), vec![PollOutcome::Completed]);
    assert_eq!(requests_to(&server, "/api/file/status/21").await, 4);

    // The finished job dropped the cached list.
    client.list_files(1, 20).await.expect("list again");
}

#[tokio::test]
async fn failed_status_check_leaves_job_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/status/22"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server).watch_processing(22, |_| {});
    match handle.wait().await {
        PollOutcome::Unknown(err) => assert_eq!(err.kind, FailureKind::HttpStatus(500)),
        other => panic!("expected unknown outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn query_returns_answer_and_drops_cached_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/history/3"))
        .respond_with(ok(json!({"messages": []})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/search/query"))
        .and(body_partial_json(json!({"session_id": 3, "user_id": 7, "query": "what"})))
        .respond_with(ok(json!({
            "answer": "this",
            "sources": [{"file_id": 1, "file_name": "a.pdf", "pages": [2], "page_count": 1}],
            "search_results_count": 1,
            "response_time": 0.4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.session_history(3, 1, 20).await.expect("history");
    let answer = client.query(3, "what", &[]).await.expect("answer");
    assert_eq!(answer.answer, "this");
    assert_eq!(answer.sources[0].pages, vec![2]);

    client.session_history(3, 1, 20).await.expect("history refetched");
}

#[tokio::test]
async fn session_mutations_refresh_the_session_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/sessions"))
        .respond_with(ok(json!([])))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/search/session/create"))
        .and(body_partial_json(json!({"user_id": 7, "session_name": "research"})))
        .respond_with(ok(json!({"session_id": 9, "session_name": "research"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/search/session/rename/9"))
        .and(body_partial_json(json!({"new_name": "archive"})))
        .respond_with(ok(Value::Null))
        .mount(&server)
        .await;

    let client = client(&server);
    client.list_sessions().await.expect("sessions");
    let session = client.create_session("research").await.expect("create");
    assert_eq!(session.session_id, 9);
    client.list_sessions().await.expect("sessions after create");
    client.rename_session(9, "archive").await.expect("rename");
    client.list_sessions().await.expect("sessions after rename");
}

#[tokio::test]
async fn read_joined_after_delete_does_not_recache_stale_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .respond_with(ok(file_list(&[5])).set_delay(Duration::from_millis(400)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/list"))
        .respond_with(ok(file_list(&[])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/file/delete/5"))
        .respond_with(ok(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let before = tokio::spawn({
        let client = client.clone();
        async move { client.list_files(1, 20).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.delete_file(5).await.expect("delete");
    let during = client.list_files(1, 20).await.expect("list after delete");
    let before = before.await.expect("task").expect("list before delete");
    let after = client.list_files(1, 20).await.expect("list once settled");

    assert!(before.contains(5));
    assert!(!during.contains(5));
    assert!(!after.contains(5));
    assert_eq!(requests_to(&server, "/api/file/list").await, 2);
}

#[tokio::test]
async fn short_cache_ttl_expires_and_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/sessions"))
        .respond_with(ok(json!([{"session_id": 1, "session_name": "a"}])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server).with_call_options(CallOptions {
        cache_ttl: Some(Duration::from_millis(100)),
        ..CallOptions::default()
    });
    client.list_sessions().await.expect("first");
    client.list_sessions().await.expect("cached");

    tokio::time::sleep(Duration::from_millis(150)).await;
    client.list_sessions().await.expect("expired");
}

#[tokio::test]
async fn retry_override_applies_to_mutations() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/file/delete/8"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/file/delete/8"))
        .respond_with(ok(Value::Null))
        .mount(&server)
        .await;

    let client = client(&server).with_call_options(CallOptions {
        retry: Some(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }),
        ..CallOptions::default()
    });
    client.delete_file(8).await.expect("retried delete");
    assert_eq!(requests_to(&server, "/api/file/delete/8").await, 2);
}

#[tokio::test]
async fn per_call_timeout_fails_with_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search/sessions"))
        .respond_with(ok(json!([])).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).with_call_options(CallOptions {
        timeout: Some(Duration::from_millis(50)),
        retry: Some(RetryPolicy::none()),
        ..CallOptions::default()
    });
    let err = client.list_sessions().await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn poll_override_controls_status_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/file/status/30"))
        .respond_with(ok(json!({"process_status": "processing", "process_progress": 10})))
        .mount(&server)
        .await;

    let client = client(&server).with_call_options(CallOptions {
        poll: Some(PollSettings {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_secs(5),
            max_duration: Some(Duration::from_millis(300)),
        }),
        ..CallOptions::default()
    });
    let handle = client.watch_processing(30, |_| {});

    assert_eq!(handle.wait().await, PollOutcome::TimedOut);
    assert_eq!(requests_to(&server, "/api/file/status/30").await, 1);
}
