use axum::{
    Router,
    routing::get,
    Extension,
};
use tower_http::trace::TraceLayer;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::handlers::{health_check, proxy_request, recent_auto_shares};
use crate::middleware::{validate_api_key, ApiKeyHash};
use crate::state::AppState;
use crate::tap::UploadTapLayer;
use crate::utils::shutdown_signal;
use crate::config::Config;

/// build the proxy router: /__droppr admin routes, everything else goes upstream through the tap
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!("Building proxy router for upstream {}", config.upstream_url);

    let admin = Router::new()
        .route("/__droppr/auto-shares", get(recent_auto_shares))
        .route("/__droppr/health", get(health_check))
        .layer(axum::middleware::from_fn(validate_api_key))
        .layer(Extension(ApiKeyHash(config.api_key_hash.clone())));

    let proxy = Router::new()
        .fallback(proxy_request)
        .layer(UploadTapLayer::new(state.tap.clone(), config.max_buffered_upload));

    admin
        .merge(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind proxy listener");
    tracing::debug!("Proxy listener bound to {}", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true);

    tracing::info!("Proxy running and ready to accept connections");
    if let Err(e) = server.await {
        tracing::error!("Proxy server error: {}", e);
    }
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("droppr-tap starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 PROXY: http://{}:{}", config.listen_host, config.listen_port);
    tracing::info!("📁 UPSTREAM FILE MANAGER: {}", config.upstream_url);
    tracing::info!("🔗 STREAM LINKS: {}/stream/<hash>", config.public_origin);
    tracing::info!(
        "⏱  tus idle {}ms, batch finalize {}ms, dedup window {}ms",
        config.tus_idle_ms,
        config.batch_finalize_ms,
        config.dedup_window_ms
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
