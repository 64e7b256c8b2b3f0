use sha2::{Sha256, Digest};
use std::time::Duration;

/// timing knobs of the upload pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// quiet period after which an open tus session counts as finished
    pub tus_idle: Duration,
    /// grace period between the last settle of a batch and its evaluation
    pub batch_finalize: Duration,
    /// window in which the same path will not auto-share twice
    pub dedup_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tus_idle: Duration::from_millis(1800),
            batch_finalize: Duration::from_millis(700),
            dedup_window: Duration::from_millis(5000),
        }
    }
}

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// base url of the proxied file manager
    pub upstream_url: String,
    /// proxy listen address
    pub listen_host: String,
    /// proxy listen port
    pub listen_port: u16,
    /// origin used when building stream links for recipients
    pub public_origin: String,
    /// static file manager token for share creation (falls back to the observed X-Auth)
    pub filebrowser_token: Option<String>,
    /// api key for the /__droppr endpoints (hashed)
    pub api_key_hash: String,
    /// largest multipart body buffered to read its file names
    pub max_buffered_upload: usize,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// resumable idle fallback in milliseconds
    pub tus_idle_ms: u64,
    /// batch finalize delay in milliseconds
    pub batch_finalize_ms: u64,
    /// auto-share dedup window in milliseconds
    pub dedup_window_ms: u64,
    /// how many auto-share events the feed keeps
    pub recent_shares: usize,
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        // get api key from env and hash it
        let api_key = std::env::var("ADMIN_API_KEY")
            .unwrap_or_else(|_| {
                tracing::warn!("⚠️  No ADMIN_API_KEY set! Using default 'changeme' - CHANGE THIS IN PRODUCTION!");
                "changeme".to_string()
            });
        let api_key_hash = Self::hash_api_key(&api_key);

        let listen_host = std::env::var("LISTEN_HOST")
            .unwrap_or_else(|_| "127.0.0.1".to_string());
        let listen_port = env_parse("LISTEN_PORT", 8081);

        let public_origin = std::env::var("PUBLIC_ORIGIN")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("http://{}:{}", listen_host, listen_port));

        let filebrowser_token = std::env::var("FILEBROWSER_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            upstream_url: std::env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            listen_host,
            listen_port,
            public_origin,
            filebrowser_token,
            api_key_hash,
            max_buffered_upload: env_parse("MAX_BUFFERED_UPLOAD", 64 * 1024 * 1024), // 64MB default
            worker_threads: env_parse("WORKER_THREADS", 8),
            tus_idle_ms: env_parse("TUS_IDLE_MS", 1800),
            batch_finalize_ms: env_parse("BATCH_FINALIZE_MS", 700),
            dedup_window_ms: env_parse("DEDUP_WINDOW_MS", 5000),
            recent_shares: env_parse("RECENT_SHARES", 50),
        }
    }

    pub fn timings(&self) -> Timings {
        Timings {
            tus_idle: Duration::from_millis(self.tus_idle_ms),
            batch_finalize: Duration::from_millis(self.batch_finalize_ms),
            dedup_window: Duration::from_millis(self.dedup_window_ms),
        }
    }

    // hash api key using sha256
    pub fn hash_api_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// unset -> default silently, unparsable -> default with a warning
fn env_parse<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}={:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
