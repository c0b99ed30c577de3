//! HTTP-level tests for the request transport against a mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use agora_transport::upload::{UPLOADS_PATH, UploadFile};
use agora_transport::{ClientConfig, Method, RequestTransport, TransportError};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CSRF_PATH: &str = "/api/v1/auth/csrf";

fn transport_for(server: &MockServer) -> RequestTransport {
    RequestTransport::new(ClientConfig::new(server.uri())).unwrap()
}

/// Hands out `tok-1`, `tok-2`, ... on successive token fetches
struct SequentialTokens {
    issued: AtomicUsize,
}

impl SequentialTokens {
    fn new() -> Self {
        Self {
            issued: AtomicUsize::new(0),
        }
    }
}

impl Respond for SequentialTokens {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_json(json!({ "token": format!("tok-{n}") }))
    }
}

fn csrf_rejection() -> ResponseTemplate {
    ResponseTemplate::new(403).set_body_json(json!({
        "error": "Invalid anti-forgery token",
        "code": "INVALID_CSRF_TOKEN"
    }))
}

#[tokio::test]
async fn test_concurrent_mutations_share_one_token_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "csrf_token": "tok-1" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/me/categories"))
        .and(header("X-CSRF-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
        .expect(5)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let body = json!({ "name": "Favorites", "kind": "bookshelf" });
    let results = futures::future::join_all(
        (0..5).map(|_| transport.request(Method::POST, "/me/categories", Some(&body))),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.csrf().cached().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_request_replayed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/posts/p1/bookshelf"))
        .and(header("X-CSRF-Token", "tok-1"))
        .respond_with(csrf_rejection())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/posts/p1/bookshelf"))
        .and(header("X-CSRF-Token", "tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "r1" })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let saved = transport
        .request(Method::PUT, "/posts/p1/bookshelf", Some(&json!({ "rating": 4 })))
        .await
        .unwrap();

    assert_eq!(saved, json!({ "id": "r1" }));
    assert_eq!(transport.csrf().cached().as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn test_second_rejection_is_surfaced_without_further_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/posts/p1/cook-log"))
        .respond_with(ResponseTemplate::new(419))
        .expect(2)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let error = transport
        .request(Method::DELETE, "/posts/p1/cook-log", None)
        .await
        .unwrap_err();

    assert_eq!(error.status(), Some(419));
    assert_eq!(error.api().unwrap().code, "UNKNOWN_ERROR");
}

#[tokio::test]
async fn test_get_is_never_retried_and_carries_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me/bookshelf"))
        .respond_with(csrf_rejection())
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let error = transport
        .request(Method::GET, "/me/bookshelf", None)
        .await
        .unwrap_err();

    assert_eq!(error.status(), Some(403));
}

#[tokio::test]
async fn test_exempt_paths_are_sent_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(|request: &Request| !request.headers.contains_key("x-csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user_id": "u1" })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let session: Value = transport
        .post("/auth/login", &json!({ "email": "a@b.c", "password": "pw" }))
        .await
        .unwrap();

    assert_eq!(session["user_id"], "u1");
    assert!(transport.csrf().cached().is_none());
}

#[tokio::test]
async fn test_no_content_is_an_empty_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/me/categories/c1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let removed = transport
        .request(Method::DELETE, "/me/categories/c1", None)
        .await
        .unwrap();
    assert_eq!(removed, Value::Null);

    let () = transport.delete("/me/categories/c1").await.unwrap();
}

#[tokio::test]
async fn test_error_envelopes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me/read-log"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me/watch-log"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Verify it's you",
            "code": "MFA_REQUIRED",
            "mfa_required": true
        })))
        .mount(&server)
        .await;

    let transport = transport_for(&server);

    let server_error = transport
        .request(Method::GET, "/me/read-log", None)
        .await
        .unwrap_err();
    let api = server_error.api().unwrap();
    assert_eq!(api.code, "UNKNOWN_ERROR");
    assert_eq!(api.message, "Request failed with status 500");
    assert_eq!(server_error.user_message("Failed to load."), "Failed to load.");

    let mfa = transport
        .request(Method::GET, "/me/watch-log", None)
        .await
        .unwrap_err();
    assert!(mfa.mfa_required());
    assert_eq!(mfa.user_message("Failed to load."), "Verify it's you");
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    let transport = RequestTransport::new(ClientConfig::new("http://127.0.0.1:9")).unwrap();

    let error = transport
        .request(Method::GET, "/me/bookshelf", None)
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Network(_)));
}

#[tokio::test]
async fn test_query_and_typed_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me/categories"))
        .and(query_param("kind", "quote"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "categories": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let options = agora_transport::RequestOptions::new().query("kind", "quote");
    let listed: Value = transport.get("/me/categories", &options).await.unwrap();

    assert_eq!(listed, json!({ "categories": [] }));
}

#[tokio::test]
async fn test_typed_put_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/me/categories/order"))
        .and(body_json(json!({ "kind": "bookshelf", "ids": ["catB_id", "catA_id"] })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let () = transport
        .put(
            "/me/categories/order",
            &json!({ "kind": "bookshelf", "ids": ["catB_id", "catA_id"] }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upload_reports_progress_and_maps_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .respond_with(SequentialTokens::new())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/uploads"))
        .and(header("X-CSRF-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "f1",
            "url": "https://cdn.agora.example/f1.png",
            "content_type": "image/png",
            "size": 200_000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let file = UploadFile::new("cover.png", "image/png", vec![0u8; 200_000]);
    let progress = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&progress);

    let uploaded = transport
        .upload(UPLOADS_PATH, &file, move |update| {
            recorder.lock().unwrap().push(update);
        })
        .await
        .unwrap();

    assert_eq!(uploaded.id, "f1");
    assert_eq!(uploaded.size, 200_000);

    let progress = progress.lock().unwrap();
    assert!(progress.len() > 1);
    assert!(progress.windows(2).all(|pair| pair[0].sent < pair[1].sent));
    assert_eq!(progress.last().unwrap().sent, 200_000);
}

#[tokio::test]
async fn test_embed_fetch_is_time_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/embeds"))
        .and(query_param("url", "https://slow.example"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": "https://slow.example" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/embeds"))
        .and(query_param("url", "https://gone.example"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/embeds"))
        .and(query_param("url", "https://video.example/v/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://video.example/v/1",
            "title": "A video",
            "provider_name": "Video"
        })))
        .mount(&server)
        .await;

    let mut config = ClientConfig::new(server.uri());
    config.embed_timeout_secs = 1;
    let transport = RequestTransport::new(config).unwrap();

    let slow = transport.fetch_embed("https://slow.example").await;
    assert!(matches!(slow, Err(TransportError::Timeout)));

    assert!(transport.fetch_embed("https://gone.example").await.unwrap().is_none());

    let preview = transport
        .fetch_embed("https://video.example/v/1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(preview.title.as_deref(), Some("A video"));
    assert_eq!(preview.provider.as_deref(), Some("Video"));
}
