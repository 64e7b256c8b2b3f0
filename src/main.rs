use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use droppr_tap::config::Config;
use droppr_tap::notify::RecentShares;
use droppr_tap::server::{build_router, print_startup_banner, start_server};
use droppr_tap::share::{FileBrowserShares, ShareTrigger};
use droppr_tap::state::{AppState, Upstream};
use droppr_tap::tap::{AuthToken, UploadTap};

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    // load configuration from environment variables
    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let upstream = Upstream::new(&config.upstream_url).expect("Invalid UPSTREAM_URL");
        let auth = AuthToken::default();
        let recent = Arc::new(RecentShares::new(config.recent_shares));

        // one pipeline per process, shared by every request
        let shares = Arc::new(FileBrowserShares::new(
            upstream.clone(),
            config.filebrowser_token.clone(),
            auth.clone(),
        ));
        let trigger = ShareTrigger::new(shares, recent.clone(), config.public_origin.clone());
        let tap = Arc::new(UploadTap::new(config.timings(), trigger, auth));

        let state = Arc::new(AppState::new(upstream, tap, recent));
        let app = build_router(state, &config);

        let addr = SocketAddr::from((
            config.listen_host.parse::<std::net::IpAddr>()
                .expect("Invalid LISTEN_HOST"),
            config.listen_port,
        ));

        print_startup_banner(&config);
        start_server(app, addr).await;
    });
}

