//! Network tap.
//!
//! Adapters for the two ways requests leave the host (an async request
//! service and an event-style request object) translate their calls into
//! three steps: [`UploadTap::begin`] when the request is dispatched, header
//! recording into [`RequestInfo`], and [`Observation::settle`] when the
//! outcome is known. The tap only observes; it never changes what the host
//! sends or receives.

mod layer;
mod legacy;

pub use layer::{UploadTapLayer, UploadTapService};
pub use legacy::{
    EventTransport, FormPart, HyperEventTransport, LegacyRequestError, LoadEnd, LoadEndCallback,
    OutboundRequest, RequestBody, TappedRequest,
};

use std::sync::{Arc, RwLock};
use axum::http::{HeaderMap, Method, StatusCode};

use crate::batch::{BatchCoordinator, ItemHandle};
use crate::config::Timings;
use crate::paths::{resolve, Payload, Resolution, TusCall};
use crate::share::ShareTrigger;
use crate::tus::{parse_header_u64, TusOutcome, TusTicket, TusTracker, UPLOAD_LENGTH, UPLOAD_OFFSET};

/// file manager auth header
pub const AUTH_HEADER: &str = "x-auth";

/// last file manager token seen on an upload request
#[derive(Clone, Default)]
pub struct AuthToken(Arc<RwLock<Option<String>>>);

impl AuthToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set(&self, token: &str) {
        let mut slot = self.0.write().unwrap_or_else(|p| p.into_inner());
        if slot.as_deref() != Some(token) {
            *slot = Some(token.to_string());
        }
    }
}

/// an outbound request as seen at dispatch time
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub target: &'a str,
    pub headers: &'a HeaderMap,
    pub payload: &'a Payload,
}

/// how an observed call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// `None` for transport failures
    pub status: Option<StatusCode>,
    pub upload_offset: Option<u64>,
    pub upload_length: Option<u64>,
}

impl CallOutcome {
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            status: Some(status),
            upload_offset: parse_header_u64(header(UPLOAD_OFFSET)),
            upload_length: parse_header_u64(header(UPLOAD_LENGTH)),
        }
    }

    pub fn transport_error() -> Self {
        Self {
            status: None,
            upload_offset: None,
            upload_length: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| s.is_success())
    }
}

/// state owned by the pipeline: live tus sessions and the open batch
pub struct UploadTap {
    tus: TusTracker,
    batches: BatchCoordinator,
    auth: AuthToken,
}

impl UploadTap {
    pub fn new(timings: Timings, trigger: ShareTrigger, auth: AuthToken) -> Self {
        let batches = BatchCoordinator::new(timings, trigger);
        let tus = TusTracker::new(batches.clone(), timings.tus_idle);
        Self { tus, batches, auth }
    }

    pub fn batches(&self) -> &BatchCoordinator {
        &self.batches
    }

    pub fn sessions(&self) -> &TusTracker {
        &self.tus
    }

    /// start observing a request; `None` when it is not an upload
    pub fn begin(&self, req: &RequestInfo<'_>) -> Option<Observation> {
        let route = match resolve(req.method, req.target, req.payload) {
            Resolution::Ignored => return None,
            Resolution::Resumable { path, call } => {
                let declared = match call {
                    TusCall::Create => parse_header_u64(
                        req.headers.get(UPLOAD_LENGTH).and_then(|v| v.to_str().ok()),
                    ),
                    TusCall::Append => None,
                };
                Route::Resumable {
                    tus: self.tus.clone(),
                    ticket: self.tus.begin_call(&path, call, declared),
                }
            }
            Resolution::Simple(paths) => Route::Simple {
                batches: self.batches.clone(),
                items: paths.iter().map(|p| self.batches.record_start(p)).collect(),
            },
            Resolution::Unnamed { dir } => {
                tracing::debug!("Upload into {} with unreadable file names, no auto-share for its batch", dir);
                Route::Simple {
                    batches: self.batches.clone(),
                    items: vec![self.batches.record_opaque(&dir)],
                }
            }
        };

        if let Some(token) = req.headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) {
            if !token.is_empty() {
                self.auth.set(token);
            }
        }

        Some(Observation { route: Some(route) })
    }
}

enum Route {
    Simple {
        batches: BatchCoordinator,
        items: Vec<ItemHandle>,
    },
    Resumable {
        tus: TusTracker,
        ticket: TusTicket,
    },
}

/// a dispatched upload call waiting for its outcome
///
/// Dropping it without settling counts as a transport failure, so an
/// abandoned call can't leave its batch pending forever.
pub struct Observation {
    route: Option<Route>,
}

impl Observation {
    pub fn settle(mut self, outcome: CallOutcome) {
        if let Some(route) = self.route.take() {
            settle_route(route, outcome);
        }
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(route) = self.route.take() {
            tracing::debug!("Observed upload call dropped before completion");
            settle_route(route, CallOutcome::transport_error());
        }
    }
}

fn settle_route(route: Route, outcome: CallOutcome) {
    let ok = outcome.is_success();
    match route {
        Route::Simple { batches, items } => {
            for item in items {
                batches.record_done(item, ok);
            }
        }
        Route::Resumable { tus, ticket } => {
            tus.finish_call(
                &ticket,
                TusOutcome {
                    ok,
                    offset: outcome.upload_offset,
                    length: outcome.upload_length,
                },
            );
        }
    }
}
