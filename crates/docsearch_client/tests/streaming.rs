use std::sync::Once;
use std::time::Duration;

use docsearch_client::{
    ClientSettings, DocSearchClient, FailureKind, SourceRef, StreamUpdate,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(client_logging::initialize_for_tests);
}

fn client(server: &MockServer) -> DocSearchClient {
    init_logging();
    DocSearchClient::new(ClientSettings {
        base_url: server.uri(),
        user_id: 7,
        stream_idle_timeout: Duration::from_secs(5),
        ..ClientSettings::default()
    })
    .expect("client")
}

fn event_stream(lines: &[&str]) -> ResponseTemplate {
    let body: String = lines.iter().map(|line| format!("data: {line}\n\n")).collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn mount_stream(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/search/stream"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn streamed_answer_is_reassembled_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/search/stream"))
        .and(body_partial_json(json!({"session_id": 4, "user_id": 7, "query": "why", "file_ids": [1]})))
        .respond_with(event_stream(&[
            r#"{"type":"start","message":"searching"}"#,
            r#"{"type":"progress","message":"reading 1 file"}"#,
            r#"{"type":"content","content":"A"}"#,
            r#"{"type":"content","content":"B"}"#,
            r#"{"type":"sources","sources":[{"file_id":1,"file_name":"a.pdf","pages":[3],"page_count":1}]}"#,
            r#"{"type":"done"}"#,
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let subscription = client.stream_query(4, "why", &[1]).expect("stream opens");
    let mut updates = Vec::new();
    let answer = subscription
        .finish(|update| updates.push(update.clone()))
        .await
        .expect("answer");

    let source = SourceRef {
        file_id: 1,
        file_name: "a.pdf".to_string(),
        pages: vec![3],
        page_count: 1,
    };
    assert_eq!(answer.text, "AB");
    assert_eq!(answer.sources, vec![source.clone()]);
    assert_eq!(
        updates,
        vec![
            StreamUpdate::Started,
            StreamUpdate::Progress("reading 1 file".to_string()),
            StreamUpdate::Transcript("A".to_string()),
            StreamUpdate::Transcript("AB".to_string()),
            StreamUpdate::Sources(vec![source]),
            StreamUpdate::Finished(answer.clone()),
        ]
    );
    assert!(!client.is_streaming(4));
}

#[tokio::test]
async fn second_stream_on_a_busy_session_is_rejected() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        event_stream(&[
            r#"{"type":"start"}"#,
            r#"{"type":"content","content":"ok"}"#,
            r#"{"type":"done"}"#,
        ])
        .set_delay(Duration::from_millis(300)),
    )
    .await;

    let client = client(&server);
    let first = client.stream_query(5, "one", &[]).expect("first stream");
    assert!(client.is_streaming(5));

    let err = client.stream_query(5, "two", &[]).unwrap_err();
    assert_eq!(err.kind, FailureKind::Busy);

    // Another session is unaffected.
    let other = client.stream_query(6, "three", &[]).expect("other session");

    assert_eq!(first.finish(|_| {}).await.expect("first answer").text, "ok");
    assert_eq!(other.finish(|_| {}).await.expect("other answer").text, "ok");
    assert!(!client.is_streaming(5));

    let again = client.stream_query(5, "four", &[]).expect("slot released");
    again.finish(|_| {}).await.expect("answer after release");
}

#[tokio::test]
async fn error_event_fails_the_stream() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        event_stream(&[
            r#"{"type":"start"}"#,
            r#"{"type":"content","content":"partial"}"#,
            r#"{"type":"error","message":"model unavailable"}"#,
        ]),
    )
    .await;

    let client = client(&server);
    let err = client
        .stream_query(8, "q", &[])
        .expect("stream opens")
        .finish(|_| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::StreamFailed);
    assert_eq!(err.message, "model unavailable");
    assert!(!client.is_streaming(8));
}

#[tokio::test]
async fn body_ending_without_done_is_an_implicit_error() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        event_stream(&[r#"{"type":"start"}"#, r#"{"type":"content","content":"A"}"#]),
    )
    .await;

    let err = client(&server)
        .stream_query(9, "q", &[])
        .expect("stream opens")
        .finish(|_| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::StreamClosed);
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"type\":\"start\"}\r\n\r\n",
        "data: {not json}\n\n",
        "data: {\"type\":\"content\",\"content\":\"fine\"}\n\n",
        "data: {\"type\":\"done\"}",
    );
    mount_stream(
        &server,
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
    )
    .await;

    let answer = client(&server)
        .stream_query(10, "q", &[])
        .expect("stream opens")
        .finish(|_| {})
        .await
        .expect("answer despite the bad line");
    assert_eq!(answer.text, "fine");
}

#[tokio::test]
async fn rejected_stream_request_surfaces_status() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({"success": false, "message": "session not found"})),
    )
    .await;

    let client = client(&server);
    let err = client
        .stream_query(11, "q", &[])
        .expect("stream task starts")
        .finish(|_| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(400));
    assert_eq!(err.message, "session not found");
    assert!(!client.is_streaming(11));
}

#[tokio::test]
async fn cancelled_subscription_ends_without_an_answer() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        event_stream(&[r#"{"type":"start"}"#, r#"{"type":"done"}"#])
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let client = client(&server);
    let subscription = client.stream_query(12, "q", &[]).expect("stream opens");
    subscription.cancel();

    let err = subscription.finish(|_| {}).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Cancelled);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_streaming(12));
}

#[tokio::test]
async fn empty_query_is_rejected_before_opening() {
    let server = MockServer::start().await;
    let client = client(&server);
    let err = client.stream_query(13, "   ", &[]).unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidRequest);
    assert!(!client.is_streaming(13));
}
