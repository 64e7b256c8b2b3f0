//! Event-style request object.
//!
//! Mirrors the older stateful request API: `open` a method and url, set
//! headers one at a time, then `send` a body and get exactly one `loadend`
//! event back. Headers are recorded as they are set because the transport
//! only sees them at send time.
//!
//! The proxy binary only uses the tower layer; this adapter is for embedders
//! that issue upload requests themselves, such as a desktop shell or a
//! scripted uploader linking this crate.

use std::sync::Arc;
use axum::body::{Body, Bytes};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use thiserror::Error;

use super::{CallOutcome, RequestInfo, UploadTap};
use crate::paths::Payload;
use crate::state::HttpClient;

#[derive(Error, Debug)]
pub enum LegacyRequestError {
    #[error("request not opened")]
    NotOpened,

    #[error("invalid header {0:?}")]
    InvalidHeader(String),
}

/// one part of a form body
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    /// set for file parts
    pub file_name: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Text(String),
    Blob { data: Bytes, name: Option<String> },
    Form(Vec<FormPart>),
}

impl RequestBody {
    fn payload(&self) -> Payload {
        match self {
            RequestBody::Empty => Payload::Empty,
            RequestBody::Text(_) => Payload::Text,
            RequestBody::Blob { name, .. } => Payload::Binary { name: name.clone() },
            RequestBody::Form(parts) => Payload::Multipart {
                file_names: Some(parts.iter().filter_map(|p| p.file_name.clone()).collect()),
            },
        }
    }
}

/// what a transport is asked to send
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// completion event, delivered once per send
#[derive(Debug, Clone, Default)]
pub struct LoadEnd {
    /// 0 when the request never got a response
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub error: Option<String>,
}

impl LoadEnd {
    pub fn network_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn outcome(&self) -> CallOutcome {
        match StatusCode::from_u16(self.status) {
            Ok(status) if self.error.is_none() => CallOutcome::from_response(status, &self.headers),
            _ => CallOutcome::transport_error(),
        }
    }
}

pub type LoadEndCallback = Box<dyn FnOnce(LoadEnd) + Send>;

/// sends a request and reports its end through a callback
pub trait EventTransport: Send + Sync {
    fn dispatch(&self, request: OutboundRequest, on_loadend: LoadEndCallback);
}

/// a stateful request whose upload traffic is observed by the tap
pub struct TappedRequest {
    tap: Arc<UploadTap>,
    transport: Arc<dyn EventTransport>,
    opened: Option<(Method, String)>,
    headers: HeaderMap,
}

impl TappedRequest {
    pub fn new(tap: Arc<UploadTap>, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            tap,
            transport,
            opened: None,
            headers: HeaderMap::new(),
        }
    }

    /// (re)initialize; recorded headers from an earlier open are dropped
    pub fn open(&mut self, method: Method, url: impl Into<String>) {
        self.opened = Some((method, url.into()));
        self.headers.clear();
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), LegacyRequestError> {
        if self.opened.is_none() {
            return Err(LegacyRequestError::NotOpened);
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| LegacyRequestError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| LegacyRequestError::InvalidHeader(name.to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn send<F>(self, body: RequestBody, on_loadend: F) -> Result<(), LegacyRequestError>
    where
        F: FnOnce(LoadEnd) + Send + 'static,
    {
        let (method, url) = self.opened.ok_or(LegacyRequestError::NotOpened)?;

        let payload = body.payload();
        let observation = self.tap.begin(&RequestInfo {
            method: &method,
            target: &url,
            headers: &self.headers,
            payload: &payload,
        });

        let request = OutboundRequest {
            method,
            url,
            headers: self.headers,
            body,
        };
        self.transport.dispatch(
            request,
            Box::new(move |end: LoadEnd| {
                if let Some(observation) = observation {
                    observation.settle(end.outcome());
                }
                on_loadend(end);
            }),
        );
        Ok(())
    }
}

/// event transport on the hyper client, each send runs on its own task
#[derive(Clone)]
pub struct HyperEventTransport {
    client: HttpClient,
    max_response: usize,
}

impl HyperEventTransport {
    pub fn new(client: HttpClient, max_response: usize) -> Self {
        Self { client, max_response }
    }

    async fn roundtrip(&self, request: OutboundRequest) -> LoadEnd {
        let req = match build_request(request) {
            Ok(req) => req,
            Err(e) => return LoadEnd::network_error(e.to_string()),
        };
        let resp = match self.client.request(req).await {
            Ok(resp) => resp,
            Err(e) => return LoadEnd::network_error(e.to_string()),
        };

        let (parts, body) = resp.into_parts();
        match axum::body::to_bytes(Body::new(body), self.max_response).await {
            Ok(body) => LoadEnd {
                status: parts.status.as_u16(),
                headers: parts.headers,
                body,
                error: None,
            },
            Err(e) => LoadEnd::network_error(e.to_string()),
        }
    }
}

impl EventTransport for HyperEventTransport {
    fn dispatch(&self, request: OutboundRequest, on_loadend: LoadEndCallback) {
        let this = self.clone();
        tokio::spawn(async move {
            let end = this.roundtrip(request).await;
            on_loadend(end);
        });
    }
}

fn build_request(request: OutboundRequest) -> Result<Request<Body>, axum::http::Error> {
    let mut builder = Request::builder().method(request.method).uri(request.url);
    let mut headers = request.headers;

    let body = match request.body {
        RequestBody::Empty => Body::empty(),
        RequestBody::Text(text) => Body::from(text),
        RequestBody::Blob { data, .. } => Body::from(data),
        RequestBody::Form(parts) => {
            let boundary = format!("----droppr{}", uuid::Uuid::new_v4().simple());
            let value = HeaderValue::from_str(&format!("multipart/form-data; boundary={}", boundary))?;
            headers.insert(header::CONTENT_TYPE, value);
            Body::from(encode_form(&parts, &boundary))
        }
    };

    if let Some(h) = builder.headers_mut() {
        h.extend(headers);
    }
    builder.body(body)
}

fn encode_form(parts: &[FormPart], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        let disposition = match &part.file_name {
            Some(file) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                escape_quoted(&part.name),
                escape_quoted(file)
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quoted(&part.name)),
        };
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
