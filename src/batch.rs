//! Batch coordination.
//!
//! Every upload that starts while a batch is open joins it. Once the last
//! pending item settles the batch waits a short grace period; if nothing new
//! starts in that window it is evaluated, and a batch that amounts to exactly
//! one successfully written path fires the share trigger.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Timings;
use crate::share::ShareTrigger;
use crate::utils::spawn_timer;

/// one observed upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub path: String,
    pub ok: bool,
    pub done: bool,
    /// the request wrote files whose names are unknown, `path` is their directory
    pub opaque: bool,
}

/// reference to an item of a specific batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHandle {
    batch: u64,
    index: usize,
}

/// read-only view of the open batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub pending: usize,
    pub items: Vec<UploadItem>,
    pub finalizing: bool,
}

struct UploadBatch {
    id: u64,
    pending: usize,
    items: Vec<UploadItem>,
    finalize: Option<(u64, JoinHandle<()>)>,
}

#[derive(Default)]
struct Dedup {
    last_path: Option<String>,
    last_at: Option<Instant>,
}

impl Dedup {
    /// records the trigger unless the same path fired within `window`
    fn admit(&mut self, path: &str, now: Instant, window: Duration) -> bool {
        if let (Some(last_path), Some(last_at)) = (&self.last_path, self.last_at) {
            if last_path == path && now.duration_since(last_at) < window {
                return false;
            }
        }
        self.last_path = Some(path.to_string());
        self.last_at = Some(now);
        true
    }
}

#[derive(Default)]
struct BatchState {
    current: Option<UploadBatch>,
    next_batch: u64,
    next_timer: u64,
    dedup: Dedup,
}

struct Inner {
    state: Mutex<BatchState>,
    trigger: ShareTrigger,
    finalize_delay: Duration,
    dedup_window: Duration,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<Inner>,
}

impl BatchCoordinator {
    pub fn new(timings: Timings, trigger: ShareTrigger) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BatchState::default()),
                trigger,
                finalize_delay: timings.batch_finalize,
                dedup_window: timings.dedup_window,
            }),
        }
    }

    /// add a new item to the open batch, opening one if needed
    pub fn record_start(&self, path: &str) -> ItemHandle {
        self.start_item(path, false)
    }

    /// add an upload into `dir` whose file names are unknown; its batch never auto-shares
    pub fn record_opaque(&self, dir: &str) -> ItemHandle {
        self.start_item(dir, true)
    }

    fn start_item(&self, path: &str, opaque: bool) -> ItemHandle {
        let mut guard = self.lock();
        let state = &mut *guard;

        let next_batch = &mut state.next_batch;
        let batch = state.current.get_or_insert_with(|| {
            *next_batch += 1;
            tracing::debug!("Opening upload batch {}", next_batch);
            UploadBatch {
                id: *next_batch,
                pending: 0,
                items: Vec::new(),
                finalize: None,
            }
        });
        if let Some((_, timer)) = batch.finalize.take() {
            tracing::debug!("Upload joined batch {} during finalize delay", batch.id);
            timer.abort();
        }

        batch.items.push(UploadItem {
            path: path.to_string(),
            ok: false,
            done: false,
            opaque,
        });
        batch.pending += 1;
        tracing::debug!("📤 Upload started: {} (batch {}, {} pending)", path, batch.id, batch.pending);

        ItemHandle {
            batch: batch.id,
            index: batch.items.len() - 1,
        }
    }

    /// settle an item; arms the finalize delay once nothing is pending
    pub fn record_done(&self, handle: ItemHandle, ok: bool) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(batch) = state.current.as_mut().filter(|b| b.id == handle.batch) else {
            tracing::debug!("Ignoring settle for finalized batch {}", handle.batch);
            return;
        };
        let Some(item) = batch.items.get_mut(handle.index) else {
            return;
        };
        if item.done {
            tracing::debug!("Ignoring repeated settle for {}", item.path);
            return;
        }

        item.done = true;
        item.ok = ok;
        batch.pending = batch.pending.saturating_sub(1);
        if ok {
            tracing::info!("✅ Upload finished: {}", item.path);
        } else {
            tracing::warn!("❌ Upload failed: {}", item.path);
        }

        if batch.pending == 0 {
            state.next_timer += 1;
            let token = state.next_timer;
            let batch_id = batch.id;
            let this = self.clone();
            let timer = spawn_timer(self.inner.finalize_delay, move || this.finalize(batch_id, token));
            if let Some((_, stale)) = batch.finalize.take() {
                stale.abort();
            }
            batch.finalize = timer.map(|t| (token, t));
        }
    }

    pub fn snapshot(&self) -> Option<BatchSnapshot> {
        self.lock().current.as_ref().map(|b| BatchSnapshot {
            pending: b.pending,
            items: b.items.clone(),
            finalizing: b.finalize.is_some(),
        })
    }

    fn finalize(&self, batch_id: u64, token: u64) {
        let path = {
            let mut state = self.lock();
            let armed = state.current.as_ref().is_some_and(|b| {
                b.id == batch_id && b.pending == 0 && b.finalize.as_ref().is_some_and(|(t, _)| *t == token)
            });
            if !armed {
                return;
            }
            let Some(batch) = state.current.take() else {
                return;
            };

            let Some(path) = single_success(&batch.items) else {
                tracing::debug!("Batch {} closed with {} item(s), no auto-share", batch.id, batch.items.len());
                return;
            };
            if !state.dedup.admit(&path, Instant::now(), self.inner.dedup_window) {
                tracing::debug!("Auto-share for {} suppressed, triggered recently", path);
                return;
            }
            path
        };

        tracing::info!("Batch {} completed single upload {}, creating share", batch_id, path);
        let trigger = self.inner.trigger.clone();
        tokio::spawn(async move {
            trigger.fire(path).await;
        });
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// the one path of a batch that attempted and completed exactly one distinct path
pub fn single_success(items: &[UploadItem]) -> Option<String> {
    if items.iter().any(|i| i.opaque) {
        return None;
    }

    let mut attempted = BTreeSet::new();
    let mut succeeded = BTreeSet::new();
    for item in items.iter().filter(|i| !i.path.is_empty()) {
        attempted.insert(item.path.as_str());
        if item.ok {
            succeeded.insert(item.path.as_str());
        }
    }

    if attempted.len() != 1 || succeeded.len() != 1 {
        return None;
    }
    succeeded.into_iter().next().map(str::to_string)
}
