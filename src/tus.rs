//! Resumable ("tus") session tracking.
//!
//! A tus upload is a creation call (`POST`, declares `Upload-Length`) followed
//! by append calls (`PATCH`, answered with `Upload-Offset`). A session is done
//! when an append reports `offset >= length`, or immediately when the declared
//! length is zero.
//!
//! The protocol does not promise a final confirming call, so completion is
//! also inferred from silence: after a non-terminal append the session arms an
//! idle timer, and if no further call for the path shows up before it fires
//! the upload is taken as finished. This is best-effort inference, the only
//! place where the pipeline guesses instead of knowing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::batch::{BatchCoordinator, ItemHandle};
use crate::paths::TusCall;
use crate::utils::spawn_timer;

pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_OFFSET: &str = "upload-offset";

struct TusSession {
    generation: u64,
    item: ItemHandle,
    upload_length: Option<u64>,
    last_seen_at: Instant,
    in_flight: usize,
    idle_timer: Option<(u64, JoinHandle<()>)>,
}

/// links a started call to the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TusTicket {
    path: String,
    generation: u64,
    call: TusCall,
}

impl TusTicket {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// what the completed call reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TusOutcome {
    pub ok: bool,
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

enum Next {
    Nothing,
    Settle(bool),
}

struct Inner {
    sessions: DashMap<String, TusSession>,
    batches: BatchCoordinator,
    idle: Duration,
    counter: AtomicU64,
}

#[derive(Clone)]
pub struct TusTracker {
    inner: Arc<Inner>,
}

impl TusTracker {
    pub fn new(batches: BatchCoordinator, idle: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                batches,
                idle,
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// register a call on `path`, opening a session if none is live
    ///
    /// `declared_length` is the request's `Upload-Length`, only used by
    /// creation calls and only while the length is still unknown.
    pub fn begin_call(&self, path: &str, call: TusCall, declared_length: Option<u64>) -> TusTicket {
        let mut session = self.inner.sessions.entry(path.to_string()).or_insert_with(|| {
            tracing::debug!("Opening tus session for {}", path);
            TusSession {
                generation: self.next_id(),
                item: self.inner.batches.record_start(path),
                upload_length: None,
                last_seen_at: Instant::now(),
                in_flight: 0,
                idle_timer: None,
            }
        });

        session.in_flight += 1;
        session.last_seen_at = Instant::now();
        if let Some((_, timer)) = session.idle_timer.take() {
            timer.abort();
        }
        if call == TusCall::Create && session.upload_length.is_none() {
            session.upload_length = declared_length;
        }

        TusTicket {
            path: path.to_string(),
            generation: session.generation,
            call,
        }
    }

    /// feed the outcome of a call started with [`begin_call`](Self::begin_call)
    pub fn finish_call(&self, ticket: &TusTicket, outcome: TusOutcome) {
        let next = {
            let Some(mut session) = self.inner.sessions.get_mut(&ticket.path) else {
                return;
            };
            if session.generation != ticket.generation {
                return;
            }
            session.in_flight = session.in_flight.saturating_sub(1);
            session.last_seen_at = Instant::now();

            if !outcome.ok {
                Next::Settle(false)
            } else {
                match ticket.call {
                    TusCall::Create if session.upload_length == Some(0) => Next::Settle(true),
                    TusCall::Create => Next::Nothing,
                    TusCall::Append => {
                        if outcome.length.is_some() {
                            session.upload_length = outcome.length;
                        }
                        if reached_length(outcome.offset, session.upload_length) {
                            Next::Settle(true)
                        } else {
                            self.arm_idle(&ticket.path, &mut session, self.inner.idle);
                            Next::Nothing
                        }
                    }
                }
            }
        };

        if let Next::Settle(ok) = next {
            self.settle(&ticket.path, ticket.generation, ok);
        }
    }

    pub fn is_live(&self, path: &str) -> bool {
        self.inner.sessions.contains_key(path)
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    fn arm_idle(&self, path: &str, session: &mut TusSession, delay: Duration) {
        let token = self.next_id();
        let generation = session.generation;
        let this = self.clone();
        let path = path.to_string();
        let timer = spawn_timer(delay, move || this.idle_elapsed(&path, generation, token));
        if let Some((_, stale)) = session.idle_timer.take() {
            stale.abort();
        }
        session.idle_timer = timer.map(|t| (token, t));
    }

    fn idle_elapsed(&self, path: &str, generation: u64, token: u64) {
        {
            let Some(mut session) = self.inner.sessions.get_mut(path) else {
                return;
            };
            let current = session.generation == generation
                && session.idle_timer.as_ref().is_some_and(|(t, _)| *t == token);
            if !current {
                return;
            }
            session.idle_timer = None;

            // a call in flight re-arms on completion
            if session.in_flight > 0 {
                return;
            }
            let quiet = session.last_seen_at.elapsed();
            if quiet < self.inner.idle {
                let remaining = self.inner.idle - quiet;
                self.arm_idle(path, &mut session, remaining);
                return;
            }
        }

        tracing::debug!("Tus session {} idle, assuming complete", path);
        self.settle(path, generation, true);
    }

    // terminal: drop the session and its timer, then report to the batch
    fn settle(&self, path: &str, generation: u64, ok: bool) {
        let Some((_, session)) = self
            .inner
            .sessions
            .remove_if(path, |_, s| s.generation == generation)
        else {
            return;
        };
        if let Some((_, timer)) = session.idle_timer {
            timer.abort();
        }
        tracing::debug!("Tus session {} settled (ok={})", path, ok);
        self.inner.batches.record_done(session.item, ok);
    }

    fn next_id(&self) -> u64 {
        self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// offset reached a known, non-negative length
pub fn reached_length(offset: Option<u64>, length: Option<u64>) -> bool {
    matches!((offset, length), (Some(offset), Some(length)) if offset >= length)
}

/// numeric value of a tus header, if present and well formed
pub fn parse_header_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}
