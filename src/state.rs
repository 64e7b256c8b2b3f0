use std::sync::Arc;
use axum::body::Body;
use axum::http::uri::{InvalidUri, PathAndQuery};
use axum::http::Uri;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::notify::RecentShares;
use crate::tap::UploadTap;

pub type HttpClient = Client<HttpConnector, Body>;

/// the proxied file manager
#[derive(Clone)]
pub struct Upstream {
    base: Uri,
    pub client: HttpClient,
}

impl Upstream {
    pub fn new(base_url: &str) -> Result<Self, InvalidUri> {
        let base: Uri = base_url.trim_end_matches('/').parse()?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { base, client })
    }

    /// absolute upstream uri for an origin-form path and query
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, axum::http::Error> {
        let prefix = self.base.path().trim_end_matches('/');
        let pq: PathAndQuery = format!("{}{}", prefix, path_and_query).parse()?;

        let mut builder = Uri::builder().path_and_query(pq);
        if let Some(scheme) = self.base.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.base.authority() {
            builder = builder.authority(authority.clone());
        }
        builder.build()
    }
}

/// shared application state
#[derive(Clone)]
pub struct AppState {
    pub upstream: Upstream,
    pub tap: Arc<UploadTap>,
    /// feed of auto-share outcomes for the panel
    pub recent: Arc<RecentShares>,
}

impl AppState {
    pub fn new(upstream: Upstream, tap: Arc<UploadTap>, recent: Arc<RecentShares>) -> Self {
        Self { upstream, tap, recent }
    }
}
