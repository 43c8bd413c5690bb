use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use dashboard_client::SseFrameDecoder;
use dashboard_core::{
    merge_event, AnalysisBundle, AnalysisEvent, CancelHandle, Clock, Priority, StreamTransport,
};

/// Incremental and terminal outputs of one streaming session.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    /// One merged partial: the typed event plus the bundle state after
    /// folding it in.
    Partial(AnalysisEvent, AnalysisBundle),
    /// The stream finished; the bundle is final.
    Complete(AnalysisBundle),
    /// The backend sent an error record or the transport failed.
    Failed(String),
}

/// Caller's view of a session. A superseded (canceled) session delivers
/// no terminal update: the channel simply closes.
pub struct StreamHandle {
    pub code: String,
    pub updates: mpsc::UnboundedReceiver<StreamUpdate>,
    cancel: CancelHandle,
}

impl StreamHandle {
    pub(crate) fn new(
        code: String,
        updates: mpsc::UnboundedReceiver<StreamUpdate>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            code,
            updates,
            cancel,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<StreamUpdate> {
        self.updates.recv().await
    }
}

struct StreamSession {
    cancel: CancelHandle,
    started_at: DateTime<Utc>,
}

/// Runs incremental analysis sessions: at most one per subject, and a
/// high-priority start cancels every other active session whatever its
/// subject, so only the most important stream survives.
pub struct StreamManager {
    transport: Arc<dyn StreamTransport>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, StreamSession>>,
}

impl StreamManager {
    pub fn new(transport: Arc<dyn StreamTransport>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            clock,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn start(self: &Arc<Self>, code: &str, priority: Priority) -> StreamHandle {
        let cancel = CancelHandle::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let now = self.clock.now();

        {
            let mut sessions = self.sessions.lock().unwrap();
            if priority == Priority::High {
                for (subject, session) in sessions.drain() {
                    let age_ms = (now - session.started_at).num_milliseconds();
                    tracing::info!("superseding stream for {subject} ({age_ms}ms old)");
                    session.cancel.cancel();
                }
            } else if let Some(previous) = sessions.remove(code) {
                // Restarting a subject always supersedes its old session.
                let age_ms = (now - previous.started_at).num_milliseconds();
                tracing::info!("restarting stream for {code} ({age_ms}ms old)");
                previous.cancel.cancel();
            }

            sessions.insert(
                code.to_string(),
                StreamSession {
                    cancel: cancel.clone(),
                    started_at: now,
                },
            );
        }

        let manager = Arc::clone(self);
        let subject = code.to_string();
        let session_cancel = cancel.clone();
        tokio::spawn(async move {
            manager.run_session(subject, session_cancel, tx).await;
        });

        StreamHandle::new(code.to_string(), rx, cancel)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Cancel every active session (application shutdown).
    pub fn cancel_all(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        for (_, session) in sessions.drain() {
            session.cancel.cancel();
        }
    }

    async fn run_session(
        self: Arc<Self>,
        code: String,
        cancel: CancelHandle,
        tx: mpsc::UnboundedSender<StreamUpdate>,
    ) {
        let outcome = self.consume(&code, &cancel, &tx).await;
        self.unregister(&code, &cancel);

        // Cancellation wins over any simultaneously-arriving failure: a
        // superseded session ends silently, with no terminal update.
        if cancel.is_canceled() {
            tracing::debug!("stream for {code} canceled");
            return;
        }

        match outcome {
            Ok(bundle) => {
                let _ = tx.send(StreamUpdate::Complete(bundle));
            }
            Err(message) => {
                tracing::warn!("stream for {code} failed: {message}");
                let _ = tx.send(StreamUpdate::Failed(message));
            }
        }
    }

    async fn consume(
        &self,
        code: &str,
        cancel: &CancelHandle,
        tx: &mpsc::UnboundedSender<StreamUpdate>,
    ) -> Result<AnalysisBundle, String> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.canceled() => return Err("canceled".to_string()),
            opened = self.transport.open(code) => opened.map_err(|e| e.to_string())?,
        };

        let mut decoder = SseFrameDecoder::new();
        let mut bundle = AnalysisBundle::default();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.canceled() => return Err("canceled".to_string()),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else {
                return Err("stream ended before completion".to_string());
            };
            let chunk = chunk.map_err(|e| e.to_string())?;
            decoder.push(&chunk);

            while let Some(record) = decoder.next_record() {
                // Re-checked between records so a superseded session
                // stops processing data it already buffered.
                if cancel.is_canceled() {
                    return Err("canceled".to_string());
                }

                let event = match AnalysisEvent::parse(&record) {
                    Ok(event) => event,
                    Err(e) => {
                        // One bad record never kills the session.
                        tracing::warn!("skipping malformed stream record for {code}: {e}");
                        continue;
                    }
                };

                match event {
                    AnalysisEvent::Complete => return Ok(bundle),
                    AnalysisEvent::Error { message } => return Err(message),
                    partial => {
                        bundle = merge_event(bundle, &partial);
                        let _ = tx.send(StreamUpdate::Partial(partial, bundle.clone()));
                    }
                }
            }
        }
    }

    fn unregister(&self, code: &str, cancel: &CancelHandle) {
        let mut sessions = self.sessions.lock().unwrap();
        // Remove only our own registration: a superseding session for the
        // same subject may already own the slot.
        if let Some(session) = sessions.get(code) {
            if session.cancel.same_signal(cancel) {
                sessions.remove(code);
            }
        }
    }
}
