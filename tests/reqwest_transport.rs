//! The executor over real HTTP against a mock server.

use bucketwise::{
    ClientConfig, FilePart, HttpError, InstantSleeper, MultipartForm, RequestDescriptor,
    RequestExecutor, ReqwestTransport, Route,
};
use http::Method;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_executor(mock_server: &MockServer) -> RequestExecutor {
    RequestExecutor::builder(Arc::new(ReqwestTransport::default()))
        .config(ClientConfig::new(mock_server.uri()).token("test-token").user_agent("bucketwise-tests"))
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap()
}

fn send_message(channel: u64) -> RequestDescriptor {
    let route = Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", channel);
    RequestDescriptor::new(route).json(serde_json::json!({"content": "hello"}))
}

#[tokio::test]
async fn json_request_round_trip_with_bucket_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/channels/10/messages"))
        .and(header("authorization", "Bot test-token"))
        .and(header("user-agent", "bucketwise-tests"))
        .and(header("content-type", "application/json"))
        .and(header("x-audit-log-reason", "welcome bot"))
        .and(body_json(serde_json::json!({"content": "hello"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-bucket", "f00d")
                .insert_header("x-ratelimit-limit", "5")
                .insert_header("x-ratelimit-remaining", "4")
                .insert_header("x-ratelimit-reset-after", "1.5")
                .set_body_json(serde_json::json!({"id": "1", "content": "hello"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = create_executor(&mock_server);
    let body = executor.execute(send_message(10).reason("welcome bot")).await.unwrap();

    assert_eq!(body.as_json().unwrap()["id"], "1");
    let bucket = executor.registry().resolve(&send_message(10).route);
    assert_eq!(bucket.key.to_string(), "f00d:10");
    assert_eq!(bucket.limiter.snapshot().limit, 5);
    assert_eq!(bucket.limiter.remaining(), 4);
}

#[tokio::test]
async fn rate_limited_then_ok() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/channels/11/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("via", "1.1 google")
                .set_body_json(serde_json::json!({
                    "message": "You are being rate limited.",
                    "retry_after": 0.05,
                    "global": false
                })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/11/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "2"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let body = create_executor(&mock_server).execute(send_message(11)).await.unwrap();
    assert_eq!(body.as_json().unwrap()["id"], "2");
}

#[tokio::test]
async fn not_found_keeps_the_text_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/channels/12"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such channel"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let route = Route::new(Method::GET, "/channels/{channel_id}").param("channel_id", 12);
    let err = create_executor(&mock_server).execute(RequestDescriptor::new(route)).await.unwrap_err();

    match err {
        HttpError::NotFound { body } => assert_eq!(body.as_text(), Some("no such channel")),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn multipart_field_names_are_sent_verbatim() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/channels/13/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "3"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let form = MultipartForm::new()
        .payload_json(&serde_json::json!({"content": "see attached"}))
        .unwrap()
        .file("files[0]", FilePart::from_bytes("notes.txt", "file body").content_type("text/plain"));
    let route = Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", 13);
    create_executor(&mock_server)
        .execute(RequestDescriptor::new(route).multipart(form))
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"name="files[0]"; filename="notes.txt""#));
    assert!(body.contains(r#"name="payload_json""#));
    assert!(body.contains("file body"));
    let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
}
