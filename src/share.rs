//! Share trigger: turns a finished single-file upload into a public link.

use std::sync::Arc;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{AutoShareFailed, AutoShareReady};
use crate::paths::file_label;
use crate::state::Upstream;
use crate::tap::AuthToken;

/// cap on how much of a share response body is read
const MAX_SHARE_RESPONSE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Share API failed ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Share response missing hash")]
    MissingHash,

    #[error("Invalid share response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Invalid share target: {0}")]
    InvalidTarget(#[from] axum::http::Error),

    #[error("Share request failed: {0}")]
    Transport(String),
}

/// creates a public share for a path and returns its hash
#[async_trait]
pub trait ShareCreator: Send + Sync {
    async fn create_share(&self, path: &str) -> Result<String, ShareError>;
}

/// receives the outcome of every auto-share attempt
pub trait AutoShareNotifier: Send + Sync {
    fn ready(&self, event: AutoShareReady);
    fn failed(&self, event: AutoShareFailed);
}

/// one-shot share call plus notification, never retried
#[derive(Clone)]
pub struct ShareTrigger {
    creator: Arc<dyn ShareCreator>,
    notifier: Arc<dyn AutoShareNotifier>,
    public_origin: String,
}

impl ShareTrigger {
    pub fn new(
        creator: Arc<dyn ShareCreator>,
        notifier: Arc<dyn AutoShareNotifier>,
        public_origin: impl Into<String>,
    ) -> Self {
        Self {
            creator,
            notifier,
            public_origin: public_origin.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fire(&self, path: String) {
        match self.creator.create_share(&path).await {
            Ok(hash) => {
                tracing::info!("🔗 Auto-share ready for {} ({})", path, hash);
                self.notifier.ready(AutoShareReady {
                    file_label: file_label(&path),
                    stream_url: format!("{}/stream/{}", self.public_origin, hash),
                    share_hash: hash,
                    path,
                });
            }
            Err(e) => {
                tracing::warn!("Auto-share failed for {}: {}", path, e);
                self.notifier.failed(AutoShareFailed {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[derive(Deserialize)]
struct ShareResponse {
    #[serde(default)]
    hash: Option<String>,
}

/// share creation against the file manager's `/api/share` endpoint
pub struct FileBrowserShares {
    upstream: Upstream,
    static_token: Option<String>,
    observed: AuthToken,
}

impl FileBrowserShares {
    pub fn new(upstream: Upstream, static_token: Option<String>, observed: AuthToken) -> Self {
        Self { upstream, static_token, observed }
    }

    fn token(&self) -> Option<String> {
        self.static_token.clone().or_else(|| self.observed.get())
    }

    async fn post_share(&self, encoded_path: &str, token: &str) -> Result<String, ShareError> {
        let uri = self.upstream.uri_for(&format!("/api/share{}", encoded_path))?;
        let body = serde_json::json!({ "expires": "", "password": "" }).to_string();
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("X-Auth", token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))?;

        let resp = self
            .upstream
            .client
            .request(req)
            .await
            .map_err(|e| ShareError::Transport(e.to_string()))?;
        let status = resp.status();
        let bytes = axum::body::to_bytes(Body::new(resp.into_body()), MAX_SHARE_RESPONSE)
            .await
            .map_err(|e| ShareError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ShareError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let parsed: ShareResponse = serde_json::from_slice(&bytes)?;
        parsed
            .hash
            .filter(|h| !h.is_empty())
            .ok_or(ShareError::MissingHash)
    }
}

#[async_trait]
impl ShareCreator for FileBrowserShares {
    async fn create_share(&self, path: &str) -> Result<String, ShareError> {
        let token = self.token().ok_or(ShareError::NotLoggedIn)?;

        let err = match self.post_share(path, &token).await {
            Ok(hash) => return Ok(hash),
            Err(e) => e,
        };

        // names with an encoded slash get one more try, encoded segment by segment
        if !path.contains("%2F") {
            return Err(err);
        }
        let Ok(decoded) = urlencoding::decode(path) else {
            return Err(err);
        };
        let normalized = encode_path_segments(&decoded);
        if normalized.is_empty() || normalized == path {
            return Err(err);
        }
        tracing::debug!("Retrying share for {} as {}", path, normalized);
        self.post_share(&normalized, &token).await
    }
}

/// percent-encode each segment of a decoded path, keeping the separators
pub fn encode_path_segments(decoded: &str) -> String {
    let trimmed = decoded.trim_start_matches('/');
    let path = format!("/{}", trimmed);
    path.split('/')
        .map(|seg| if seg.is_empty() { String::new() } else { urlencoding::encode(seg).into_owned() })
        .collect::<Vec<_>>()
        .join("/")
}
