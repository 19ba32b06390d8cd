//! Failure-path tests: every error kind resolves to a normalized
//! response, never a panic or an `Err` from `stream_message`, and
//! cleanup always runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pinstream::{
    LifecycleEvent, LifecycleHook, StreamConfig, StreamManager, StreamRequest,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_stream(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn ndjson(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/x-ndjson")
}

#[tokio::test]
async fn test_http_error_status_is_connection_failed() {
    let server = MockServer::start().await;
    mount_stream(&server, ResponseTemplate::new(500)).await;

    let manager = StreamManager::new(server.uri());
    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind(), "connection_failed");
    assert!(error.is_retryable());
    assert_eq!(manager.active_connections(), 0);
}

#[tokio::test]
async fn test_malformed_line_aborts_with_parse_error() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"content","id":"m1","data":"Hi"}"#,
        "\n",
        "{not json\n",
        r#"{"type":"content","id":"m1","data":"never processed"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(body)).await;

    let manager = StreamManager::new(server.uri());
    let progress_count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&progress_count);
    let hook: LifecycleHook = Arc::new(move |event: &LifecycleEvent| {
        if matches!(event, LifecycleEvent::Progress { .. }) {
            *sink.lock().unwrap() += 1;
        }
    });
    manager.add_lifecycle_hook(hook);

    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind(), "parse_error");
    // Failure responses carry only the id, never partial content.
    assert!(response.final_content.is_none());
    assert_eq!(response.message_id, "m1");
    // message_start and the first content fragment; nothing after the
    // corrupted line.
    assert_eq!(*progress_count.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_event_type_is_parse_error() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"heartbeat","id":"m1"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(body)).await;

    let response = StreamManager::new(server.uri())
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind(), "parse_error");
}

#[tokio::test]
async fn test_producer_error_event_is_server_error() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"content","id":"m1","data":"so far so good"}"#,
        "\n",
        r#"{"type":"error","id":"m1","error":"model overloaded"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(body)).await;

    let manager = StreamManager::new(server.uri());
    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind(), "server_error");
    assert!(error.to_string().contains("model overloaded"));
    assert_eq!(response.message_id, "m1");

    let stats = manager.get_stats();
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn test_failed_stream_still_counts_tool_executions() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"tool","id":"m1","tool":"create_widget","status":"running","timestamp":2}"#,
        "\n",
        r#"{"type":"tool","id":"m1","tool":"roll_dice","status":"running","timestamp":3}"#,
        "\n",
        r#"{"type":"error","id":"m1","error":"model overloaded"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(body)).await;

    let manager = StreamManager::new(server.uri());
    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    // The failure response carries no tools, but the executions that
    // happened before the producer error are still counted.
    assert!(response.tools.is_empty());
    let stats = manager.get_stats();
    assert_eq!(stats.tool_executions, 2);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn test_empty_stream_fails_without_content() {
    let server = MockServer::start().await;
    mount_stream(&server, ndjson("")).await;

    let response = StreamManager::new(server.uri())
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind(), "unknown_error");
    assert_eq!(error.to_string(), "Stream ended without content");
}

#[tokio::test]
async fn test_stream_ending_after_message_start_fails() {
    let server = MockServer::start().await;
    let body = concat!(r#"{"type":"message_start","id":"m1","timestamp":1000}"#, "\n");
    mount_stream(&server, ndjson(body)).await;

    let response = StreamManager::new(server.uri())
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    assert_eq!(
        response.error.unwrap().to_string(),
        "Stream ended without content"
    );
    assert_eq!(response.message_id, "m1");
}

#[tokio::test]
async fn test_timeout_resolves_and_cleans_up() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        ndjson(r#"{"type":"message_start","id":"m1","timestamp":1}"#)
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let manager = StreamManager::with_config(
        server.uri(),
        StreamConfig {
            timeout: Duration::from_millis(100),
            ..StreamConfig::default()
        },
    );
    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind(), "stream_timeout");
    assert!(error.is_retryable());
    // The connection must be gone from the active set.
    assert_eq!(manager.active_connections(), 0);
    assert_eq!(manager.get_stats().total_messages, 1);
}

#[tokio::test]
async fn test_stats_aggregate_across_calls() {
    let server = MockServer::start().await;
    let ok_body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"content","id":"m1","data":"hi"}"#,
        "\n",
        r#"{"type":"message_complete","id":"m1","final_content":"hi"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(ok_body)).await;

    let manager = StreamManager::new(server.uri());
    let first = manager
        .stream_message(&StreamRequest::new("one"), None)
        .await;
    assert!(first.success);

    // Second call against a dead endpoint fails.
    let failing = StreamManager::new("http://127.0.0.1:1");
    let second = failing
        .stream_message(&StreamRequest::new("two"), None)
        .await;
    assert!(!second.success);

    assert_eq!(manager.get_stats().total_messages, 1);
    assert_eq!(manager.get_stats().success_rate, 1.0);
    assert_eq!(failing.get_stats().success_rate, 0.0);

    manager.reset_stats();
    assert_eq!(manager.get_stats().total_messages, 0);
}

#[tokio::test]
async fn test_destroy_cancels_in_flight_stream() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // wiremock can only delay the whole response; a mid-body stall needs
    // a raw socket that sends headers plus one chunked line, then holds
    // the connection open.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let line = concat!(r#"{"type":"message_start","id":"m1","timestamp":1}"#, "\n");
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
            line.len(),
            line
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let manager = Arc::new(StreamManager::new(format!("http://{}", addr)));
    let worker = Arc::clone(&manager);
    let call = tokio::spawn(async move {
        worker
            .stream_message(&StreamRequest::new("hi"), None)
            .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.active_connections(), 1);
    manager.destroy();

    // The read loop observes the cancel signal at its next chunk await,
    // well before the 300 s default timeout.
    let response = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("stream should settle promptly after destroy")
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind(), "connection_failed");
    assert_eq!(manager.active_connections(), 0);
}

#[tokio::test]
async fn test_destroy_clears_hooks_and_connections() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type":"message_start","id":"m1","timestamp":1}"#,
        "\n",
        r#"{"type":"message_complete","id":"m1","final_content":"hi"}"#,
        "\n",
    );
    mount_stream(&server, ndjson(body)).await;

    let manager = StreamManager::new(server.uri());
    let calls = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&calls);
    let hook: LifecycleHook = Arc::new(move |_event: &LifecycleEvent| {
        *sink.lock().unwrap() += 1;
    });
    manager.add_lifecycle_hook(hook);

    manager.destroy();
    assert_eq!(manager.active_connections(), 0);

    // Hooks were cleared by destroy; a later call emits nothing to them.
    let response = manager
        .stream_message(&StreamRequest::new("hi"), None)
        .await;
    assert!(response.success);
    assert_eq!(*calls.lock().unwrap(), 0);
}
