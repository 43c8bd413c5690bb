use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use dashboard_core::{
    AnalysisBundle, AnalysisFetcher, CancelHandle, Clock, FetchError, FetchResult, Priority,
    RequestKey,
};

/// One submitted full-analysis request.
struct QueueItem {
    key: RequestKey,
    force_refresh: bool,
    cancel: Option<CancelHandle>,
    created_at: DateTime<Utc>,
    responder: oneshot::Sender<FetchResult<AnalysisBundle>>,
}

struct QueueState {
    pending: VecDeque<QueueItem>,
    active: usize,
    /// Waiters coalesced onto an executing fetch, per key.
    in_flight: HashMap<RequestKey, Vec<oneshot::Sender<FetchResult<AnalysisBundle>>>>,
}

/// Bounded-concurrency dispatcher for full-analysis fetches.
///
/// At most `limit` fetches execute at once. High-priority items jump to
/// the head of the pending line (a sustained stream of them may starve
/// normal items, which is the intended most-recent-detail-view-wins
/// behavior). A pending item whose key is already executing coalesces
/// onto that execution instead of fetching again.
pub struct RequestQueue {
    fetcher: Arc<dyn AnalysisFetcher>,
    clock: Arc<dyn Clock>,
    limit: usize,
    batch_timeout: Duration,
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub fn new(
        fetcher: Arc<dyn AnalysisFetcher>,
        clock: Arc<dyn Clock>,
        limit: usize,
        batch_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            clock,
            limit: limit.max(1),
            batch_timeout,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                active: 0,
                in_flight: HashMap::new(),
            }),
        })
    }

    /// Enqueue a request and kick the dispatcher. The returned receiver
    /// resolves exactly once with the fetch outcome.
    pub fn submit(
        self: &Arc<Self>,
        key: RequestKey,
        force_refresh: bool,
        priority: Priority,
        cancel: Option<CancelHandle>,
    ) -> oneshot::Receiver<FetchResult<AnalysisBundle>> {
        let (tx, rx) = oneshot::channel();
        let item = QueueItem {
            key,
            force_refresh,
            cancel,
            created_at: self.clock.now(),
            responder: tx,
        };

        {
            let mut state = self.state.lock().unwrap();
            match priority {
                Priority::High => state.pending.push_front(item),
                Priority::Normal => state.pending.push_back(item),
            }
        }

        self.dispatch();
        rx
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Admission loop. Every decision happens under the state lock, so
    /// near-simultaneous completions re-entering here cannot overshoot
    /// the bound.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let (item, registered) = {
                let mut state = self.state.lock().unwrap();
                if state.active >= self.limit {
                    return;
                }
                let Some(item) = state.pending.pop_front() else {
                    return;
                };

                let registered = if item.force_refresh {
                    // Forced refresh bypasses de-duplication: it always
                    // fetches, and becomes the coalescing target only when
                    // no execution holds the key.
                    if state.in_flight.contains_key(&item.key) {
                        false
                    } else {
                        state.in_flight.insert(item.key.clone(), Vec::new());
                        true
                    }
                } else if let Some(waiters) = state.in_flight.get_mut(&item.key) {
                    // Identical request already executing: piggyback on it
                    // without consuming a slot.
                    waiters.push(item.responder);
                    continue;
                } else {
                    state.in_flight.insert(item.key.clone(), Vec::new());
                    true
                };

                state.active += 1;
                (item, registered)
            };

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.execute(item, registered).await;
            });
        }
    }

    async fn execute(self: Arc<Self>, item: QueueItem, registered: bool) {
        let QueueItem {
            key,
            force_refresh,
            cancel,
            created_at,
            responder,
        } = item;

        let queued_ms = (self.clock.now() - created_at).num_milliseconds();
        tracing::debug!("executing analysis fetch for {key} ({queued_ms}ms queued)");

        let result = self.run_fetch(&key, force_refresh, cancel).await;

        match &result {
            Ok(_) => {}
            Err(e) if e.is_canceled() => tracing::debug!("analysis fetch for {key} canceled"),
            Err(e) => tracing::warn!("analysis fetch for {key} failed: {e}"),
        }

        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.active -= 1;
            if registered {
                state.in_flight.remove(&key).unwrap_or_default()
            } else {
                Vec::new()
            }
        };

        // Exactly-once delivery to the submitter and every coalesced
        // waiter. A failure here rejects only these futures.
        let _ = responder.send(result.clone());
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        // The freed slot is reused in this same continuation.
        self.dispatch();
    }

    async fn run_fetch(
        &self,
        key: &RequestKey,
        force_refresh: bool,
        cancel: Option<CancelHandle>,
    ) -> FetchResult<AnalysisBundle> {
        match cancel {
            Some(cancel) => {
                if cancel.is_canceled() {
                    return Err(FetchError::Canceled);
                }
                // Cancellation wins over a fetch completing in the same
                // poll; dropping the fetch future aborts the transport.
                tokio::select! {
                    biased;
                    _ = cancel.canceled() => Err(FetchError::Canceled),
                    result = self.fetcher.fetch(key, force_refresh) => result,
                }
            }
            None => {
                // No caller-owned handle: the batch ceiling bounds
                // worst-case latency, surfacing as a cancellation rather
                // than a hard error.
                tokio::select! {
                    result = self.fetcher.fetch(key, force_refresh) => result,
                    _ = tokio::time::sleep(self.batch_timeout) => {
                        tracing::warn!(
                            "analysis fetch for {key} hit the {}s ceiling",
                            self.batch_timeout.as_secs()
                        );
                        Err(FetchError::Canceled)
                    }
                }
            }
        }
    }
}
