#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::{Arc, Mutex};

use droppr_tap::config::Timings;
use droppr_tap::models::AutoShareEvent;
use droppr_tap::notify::RecentShares;
use droppr_tap::paths::Payload;
use droppr_tap::share::{ShareCreator, ShareError, ShareTrigger};
use droppr_tap::tap::{AuthToken, CallOutcome, Observation, RequestInfo, UploadTap};

// share creator that records every call
pub struct FakeShares {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeShares {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShareCreator for FakeShares {
    async fn create_share(&self, path: &str) -> Result<String, ShareError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(path.to_string());
        if self.fail {
            return Err(ShareError::Api { status: 500, body: "boom".to_string() });
        }
        Ok(format!("hash{}", calls.len()))
    }
}

pub struct Harness {
    pub tap: Arc<UploadTap>,
    pub shares: Arc<FakeShares>,
    pub feed: Arc<RecentShares>,
    pub auth: AuthToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn failing() -> Self {
        Self::build(true)
    }

    fn build(fail: bool) -> Self {
        let shares = Arc::new(FakeShares { calls: Mutex::new(Vec::new()), fail });
        let feed = Arc::new(RecentShares::new(16));
        let auth = AuthToken::default();
        let trigger = ShareTrigger::new(shares.clone(), feed.clone(), "https://drop.example");
        let tap = Arc::new(UploadTap::new(Timings::default(), trigger, auth.clone()));
        Self { tap, shares, feed, auth }
    }

    pub fn begin(&self, method: Method, target: &str, headers: &HeaderMap, payload: Payload) -> Option<Observation> {
        self.tap.begin(&RequestInfo {
            method: &method,
            target,
            headers,
            payload: &payload,
        })
    }

    /// single-shot simple upload that is settled right away
    pub fn put(&self, path: &str, status: StatusCode) {
        let target = format!("/api/resources{}", path);
        let obs = self
            .begin(Method::PUT, &target, &HeaderMap::new(), blob())
            .expect("resource PUT is an upload");
        obs.settle(status_only(status));
    }

    pub fn tus_create(&self, path: &str, length: u64) -> Observation {
        let mut headers = HeaderMap::new();
        headers.insert("Upload-Length", HeaderValue::from(length));
        self.begin(Method::POST, &format!("/api/tus{}", path), &headers, Payload::Empty)
            .expect("tus POST is tracked")
    }

    pub fn tus_append(&self, path: &str) -> Observation {
        self.begin(Method::PATCH, &format!("/api/tus{}", path), &HeaderMap::new(), blob())
            .expect("tus PATCH is tracked")
    }

    pub fn events(&self) -> Vec<AutoShareEvent> {
        self.feed.snapshot().into_iter().map(|r| r.event).collect()
    }
}

pub fn blob() -> Payload {
    Payload::Binary { name: None }
}

pub fn status_only(status: StatusCode) -> CallOutcome {
    CallOutcome::from_response(status, &HeaderMap::new())
}

pub fn offset_reply(offset: u64) -> CallOutcome {
    let mut headers = HeaderMap::new();
    headers.insert("Upload-Offset", HeaderValue::from(offset));
    CallOutcome::from_response(StatusCode::NO_CONTENT, &headers)
}
