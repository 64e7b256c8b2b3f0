use axum::body::{to_bytes, Body, Bytes};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

use droppr_tap::config::Config;
use droppr_tap::notify::RecentShares;
use droppr_tap::server::build_router;
use droppr_tap::share::{FileBrowserShares, ShareCreator, ShareError, ShareTrigger};
use droppr_tap::state::{AppState, Upstream};
use droppr_tap::tap::{AuthToken, FormPart, HyperEventTransport, RequestBody, TappedRequest, UploadTap};

const API_KEY: &str = "test-key";

// (raw path, X-Auth) of every share call the stub saw
type ShareLog = Arc<Mutex<Vec<(String, Option<String>)>>>;

// minimal file manager: accepts uploads, creates shares, rejects encoded slashes
async fn stub_filebrowser(log: ShareLog, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let auth = req
        .headers()
        .get("x-auth")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let method = req.method().clone();
    let _ = to_bytes(req.into_body(), usize::MAX).await;

    let Some(target) = path.strip_prefix("/api/share") else {
        return if method == Method::PUT || method == Method::POST {
            StatusCode::OK.into_response()
        } else {
            (StatusCode::OK, "[]").into_response()
        };
    };

    log.lock().unwrap().push((target.to_string(), auth.clone()));
    if auth.is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if target.contains("%2F") {
        return (StatusCode::NOT_FOUND, "404 Not Found").into_response();
    }
    if target.contains("broken") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if target.contains("nohash") {
        return (StatusCode::OK, r#"{"path":"x"}"#).into_response();
    }
    (StatusCode::OK, r#"{"hash":"abc","path":"x"}"#).into_response()
}

async fn spawn_stub() -> (String, ShareLog) {
    let log: ShareLog = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    let app = Router::new().fallback(move |req: Request| {
        let log = handler_log.clone();
        async move { stub_filebrowser(log, req).await }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), log)
}

fn test_config(upstream_url: &str) -> Config {
    Config {
        upstream_url: upstream_url.to_string(),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        public_origin: "https://drop.example".to_string(),
        filebrowser_token: None,
        api_key_hash: Config::hash_api_key(API_KEY),
        max_buffered_upload: 1024 * 1024,
        worker_threads: 1,
        tus_idle_ms: 200,
        batch_finalize_ms: 50,
        dedup_window_ms: 5000,
        recent_shares: 10,
    }
}

fn app_state(config: &Config) -> Arc<AppState> {
    let upstream = Upstream::new(&config.upstream_url).unwrap();
    let auth = AuthToken::default();
    let recent = Arc::new(RecentShares::new(config.recent_shares));
    let shares = Arc::new(FileBrowserShares::new(
        upstream.clone(),
        config.filebrowser_token.clone(),
        auth.clone(),
    ));
    let trigger = ShareTrigger::new(shares, recent.clone(), config.public_origin.clone());
    let tap = Arc::new(UploadTap::new(config.timings(), trigger, auth));
    Arc::new(AppState::new(upstream, tap, recent))
}

fn proxy_app(config: &Config) -> Router {
    build_router(app_state(config), config)
}

async fn feed(app: &Router) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/__droppr/auto-shares")
                .header("X-API-Key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// poll the feed until it has an entry or the deadline passes
async fn wait_for_feed(app: &Router) -> serde_json::Value {
    for _ in 0..40 {
        let json = feed(app).await;
        if json["total"].as_u64().unwrap_or(0) > 0 {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    feed(app).await
}

#[tokio::test]
async fn test_proxied_upload_creates_share_with_observed_token() {
    let (url, log) = spawn_stub().await;
    let app = proxy_app(&test_config(&url));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/api/resources/photos/a%20b.jpg?override=true")
                .header("X-Auth", "tok-1")
                .header("Content-Type", "image/jpeg")
                .body(Body::from("jpeg"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = wait_for_feed(&app).await;
    assert_eq!(json["total"], 1);
    let event = &json["events"][0];
    assert_eq!(event["kind"], "ready");
    assert_eq!(event["path"], "/photos/a%20b.jpg");
    assert_eq!(event["share_hash"], "abc");
    assert_eq!(event["file_label"], "a b.jpg");
    assert_eq!(event["stream_url"], "https://drop.example/stream/abc");

    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("/photos/a%20b.jpg".to_string(), Some("tok-1".to_string()))]
    );
}

#[tokio::test]
async fn test_non_upload_requests_are_proxied_without_share() {
    let (url, log) = spawn_stub().await;
    let app = proxy_app(&test_config(&url));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/resources/photos")
                .header("X-Auth", "tok-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"[]");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(feed(&app).await["total"], 0);
}

#[tokio::test]
async fn test_upstream_down_returns_bad_gateway() {
    // nothing listens on port 1
    let app = proxy_app(&test_config("http://127.0.0.1:1"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/api/resources/a.jpg")
                .header("X-Auth", "tok-1")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().starts_with("Upstream request failed"));

    // the failed upload never reaches the share step
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(feed(&app).await["total"], 0);
}

#[tokio::test]
async fn test_admin_routes_require_api_key() {
    let (url, _log) = spawn_stub().await;
    let app = proxy_app(&test_config(&url));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/__droppr/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/__droppr/health")
                .header("X-API-Key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["live_tus_sessions"], 0);
    assert_eq!(json["pending_uploads"], 0);
}

fn shares_client(url: &str, token: Option<&str>) -> FileBrowserShares {
    FileBrowserShares::new(
        Upstream::new(url).unwrap(),
        token.map(str::to_string),
        AuthToken::default(),
    )
}

#[tokio::test]
async fn test_share_api_success_returns_hash() {
    let (url, log) = spawn_stub().await;
    let shares = shares_client(&url, Some("static-token"));

    let hash = shares.create_share("/docs/report.pdf").await.unwrap();
    assert_eq!(hash, "abc");
    assert_eq!(
        log.lock().unwrap().clone(),
        vec![("/docs/report.pdf".to_string(), Some("static-token".to_string()))]
    );
}

#[tokio::test]
async fn test_share_without_token_is_not_logged_in() {
    let (url, log) = spawn_stub().await;
    let shares = shares_client(&url, None);

    let err = shares.create_share("/a.jpg").await.unwrap_err();
    assert!(matches!(err, ShareError::NotLoggedIn));
    assert_eq!(err.to_string(), "Not logged in");
    // no request goes out without a token
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_share_observed_token_is_used() {
    let (url, log) = spawn_stub().await;
    let observed = AuthToken::default();
    let shares = FileBrowserShares::new(Upstream::new(&url).unwrap(), None, observed.clone());

    observed.set("seen-token");
    assert_eq!(shares.create_share("/a.jpg").await.unwrap(), "abc");
    assert_eq!(log.lock().unwrap()[0].1.as_deref(), Some("seen-token"));
}

#[tokio::test]
async fn test_share_api_errors() {
    let (url, _log) = spawn_stub().await;
    let shares = shares_client(&url, Some("t"));

    let err = shares.create_share("/broken.jpg").await.unwrap_err();
    assert_eq!(err.to_string(), "Share API failed (500): boom");

    let err = shares.create_share("/nohash.jpg").await.unwrap_err();
    assert!(matches!(err, ShareError::MissingHash));
}

#[tokio::test]
async fn test_share_retries_encoded_slash_per_segment() {
    let (url, log) = spawn_stub().await;
    let shares = shares_client(&url, Some("t"));

    let hash = shares.create_share("/dir%2Fclip%20one.mp4").await.unwrap();
    assert_eq!(hash, "abc");

    let paths: Vec<String> = log.lock().unwrap().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths, vec!["/dir%2Fclip%20one.mp4", "/dir/clip%20one.mp4"]);
}

#[tokio::test]
async fn test_share_without_encoded_slash_is_not_retried() {
    let (url, log) = spawn_stub().await;
    let shares = shares_client(&url, Some("t"));

    assert!(shares.create_share("/broken.jpg").await.is_err());
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_transport_upload_creates_share() {
    let (url, log) = spawn_stub().await;
    let state = app_state(&test_config(&url));
    let transport = Arc::new(HyperEventTransport::new(state.upstream.client.clone(), 1024 * 1024));

    let mut req = TappedRequest::new(state.tap.clone(), transport);
    req.open(Method::POST, format!("{}/api/resources/docs/", url));
    req.set_request_header("X-Auth", "tok-2").unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    req.send(
        RequestBody::Form(vec![FormPart {
            name: "files".into(),
            file_name: Some("r.pdf".into()),
            data: Bytes::from_static(b"%PDF"),
        }]),
        move |end| {
            let _ = tx.send(end.status);
        },
    )
    .unwrap();
    assert_eq!(rx.await.unwrap(), 200);

    for _ in 0..40 {
        if !state.recent.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let events = state.recent.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.path(), "/docs/r.pdf");
    assert_eq!(
        log.lock().unwrap().clone(),
        vec![("/docs/r.pdf".to_string(), Some("tok-2".to_string()))]
    );
}
