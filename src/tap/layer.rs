use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use axum::body::{Body, HttpBody};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::util::ServiceExt;
use tower::{service_fn, Layer, Service};

use super::{CallOutcome, RequestInfo, UploadTap};
use crate::paths::{extract_api_path, Payload, RESOURCE_PREFIX};
use crate::utils::content_disposition_filename;

/// observes uploads flowing through the wrapped service
#[derive(Clone)]
pub struct UploadTapLayer {
    tap: Arc<UploadTap>,
    buffer_limit: usize,
}

impl UploadTapLayer {
    /// `buffer_limit` caps how large a multipart body may be to have its
    /// part names read; larger bodies stream through unread
    pub fn new(tap: Arc<UploadTap>, buffer_limit: usize) -> Self {
        Self { tap, buffer_limit }
    }
}

impl<S> Layer<S> for UploadTapLayer {
    type Service = UploadTapService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UploadTapService {
            inner,
            tap: self.tap.clone(),
            buffer_limit: self.buffer_limit,
        }
    }
}

#[derive(Clone)]
pub struct UploadTapService<S> {
    inner: S,
    tap: Arc<UploadTap>,
    buffer_limit: usize,
}

impl<S> Service<Request<Body>> for UploadTapService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // the clone may not be ready, keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tap = self.tap.clone();
        let buffer_limit = self.buffer_limit;

        Box::pin(async move {
            let (req, payload) = match read_payload(req, buffer_limit).await {
                Ok(read) => read,
                Err(resp) => return Ok(resp),
            };

            let target = req.uri().to_string();
            let observation = tap.begin(&RequestInfo {
                method: req.method(),
                target: &target,
                headers: req.headers(),
                payload: &payload,
            });

            let result = inner.call(req).await;
            if let Some(observation) = observation {
                match &result {
                    Ok(resp) => observation.settle(CallOutcome::from_response(resp.status(), resp.headers())),
                    Err(_) => observation.settle(CallOutcome::transport_error()),
                }
            }
            result
        })
    }
}

/// classify the body, buffering multipart uploads just long enough to read part names
async fn read_payload(req: Request<Body>, limit: usize) -> Result<(Request<Body>, Payload), Response> {
    let headers = req.headers();
    let size = req.body().size_hint();
    if size.exact() == Some(0) {
        return Ok((req, Payload::Empty));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if !content_type.starts_with("multipart/form-data") {
        let payload = if is_textual(&content_type) {
            Payload::Text
        } else {
            Payload::Binary { name: blob_name(headers) }
        };
        return Ok((req, payload));
    }

    let wants_names = (req.method() == Method::POST || req.method() == Method::PUT)
        && extract_api_path(req.uri().path(), RESOURCE_PREFIX).is_some();
    let fits = size.upper().is_some_and(|upper| upper <= limit as u64);
    if !wants_names || !fits {
        if wants_names {
            tracing::debug!("Multipart upload to {} too large to inspect, part names unknown", req.uri().path());
        }
        return Ok((req, Payload::Multipart { file_names: None }));
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read multipart upload body for {}: {}", parts.uri.path(), e);
            return Err(StatusCode::BAD_REQUEST.into_response());
        }
    };

    let file_names = multipart_file_names(&parts.headers, bytes.clone()).await;
    tracing::trace!("Multipart parts for {}: {:?}", parts.uri.path(), file_names);
    Ok((Request::from_parts(parts, Body::from(bytes)), Payload::Multipart { file_names }))
}

async fn multipart_file_names(headers: &HeaderMap, bytes: axum::body::Bytes) -> Option<Vec<String>> {
    let mut parse_req = Request::new(Body::from(bytes));
    if let Some(ct) = headers.get(header::CONTENT_TYPE) {
        parse_req.headers_mut().insert(header::CONTENT_TYPE, ct.clone());
    }

    // the body is already capped by our own buffer limit, axum's 2MB default must not apply
    let parser = DefaultBodyLimit::disable().layer(service_fn(read_part_names));
    match parser.oneshot(parse_req).await {
        Ok(names) => names,
        Err(never) => match never {},
    }
}

async fn read_part_names(req: Request<Body>) -> Result<Option<Vec<String>>, Infallible> {
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::debug!("Unreadable multipart upload: {}", e);
            return Ok(None);
        }
    };

    let mut names = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if let Some(name) = field.file_name() {
                    names.push(name.to_string());
                }
            }
            Ok(None) => return Ok(Some(names)),
            Err(e) => {
                tracing::debug!("Malformed multipart upload: {}", e);
                return Ok(None);
            }
        }
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("application/json")
        || content_type.starts_with("application/x-www-form-urlencoded")
}

fn blob_name(headers: &HeaderMap) -> Option<String> {
    if let Some(name) = headers.get("x-file-name").and_then(|v| v.to_str().ok()) {
        return Some(name.to_string());
    }
    headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
}
