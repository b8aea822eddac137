//! The run stream consumer: owns the subscription for the tracked run
//! identity, dispatches frames to the reducer, and maintains the
//! terminal-state latch that stops dead runs from being re-subscribed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sitewright_events::{Frame, RunEvent, RunOutcome, RunState};

use crate::config::RunStreamConfig;
use crate::error::{Result, StreamError};
use crate::observer::{NoopObserver, RunObserver};
use crate::sse::{self, RawEvent, RawEventStream};

/// Consumer of one run's event stream.
///
/// At most one subscription is live at a time; `track` moves it between run
/// identities. State is exposed as snapshots only - external code observes
/// through the watch channels and mutates nothing.
pub struct RunStream {
    http: reqwest::Client,
    config: RunStreamConfig,
    shared: Arc<Shared>,
    conn: Mutex<Conn>,
}

struct Shared {
    state_tx: watch::Sender<RunState>,
    connected_tx: watch::Sender<bool>,
    /// Terminal-state latch: the run id that already finished in this
    /// consumer's lifetime, if any. Survives disconnects and re-tracks;
    /// cleared only by `reset`.
    finished_run: Mutex<Option<String>>,
    observer: Arc<dyn RunObserver>,
}

#[derive(Default)]
struct Conn {
    run_id: Option<String>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl RunStream {
    pub fn new(config: RunStreamConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(config: RunStreamConfig, observer: Arc<dyn RunObserver>) -> Self {
        let (state_tx, _) = watch::channel(RunState::new());
        let (connected_tx, _) = watch::channel(false);
        Self {
            http: reqwest::Client::new(),
            config,
            shared: Arc::new(Shared {
                state_tx,
                connected_tx,
                finished_run: Mutex::new(None),
                observer,
            }),
            conn: Mutex::new(Conn::default()),
        }
    }

    /// Follow a run. Any previous subscription is closed unconditionally;
    /// a run the latch records as finished is not re-subscribed.
    pub async fn track(&self, run_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        close_locked(&mut conn, &self.shared);
        conn.run_id = Some(run_id.to_string());

        if self.shared.finished_run.lock().await.as_deref() == Some(run_id) {
            debug!(
                target: "stream",
                run_id,
                "run already finished in this consumer; not resubscribing"
            );
            return Ok(());
        }

        let stream = sse::subscribe(&self.http, &self.config, run_id).await?;
        self.shared.connected_tx.send_replace(true);
        info!(target: "stream", run_id, "subscribed to run event stream");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(
            stream,
            run_id.to_string(),
            Arc::clone(&self.shared),
            self.config.idle_timeout,
            cancel.clone(),
        ));
        conn.cancel = Some(cancel);
        conn.task = Some(task);
        Ok(())
    }

    /// Force-close the live subscription without touching accumulated state
    /// or the terminal-state latch.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        close_locked(&mut conn, &self.shared);
        conn.run_id = None;
    }

    /// Full teardown: close the subscription, clear the latch, and restore
    /// the initial idle state with every pipeline stage pending.
    pub async fn reset(&self) {
        let mut conn = self.conn.lock().await;
        close_locked(&mut conn, &self.shared);
        conn.run_id = None;
        *self.shared.finished_run.lock().await = None;
        self.shared.state_tx.send_replace(RunState::new());
        debug!(target: "stream", "consumer reset to initial state");
    }

    /// Snapshot of the current reduced state.
    pub fn state(&self) -> RunState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver notified whenever a frame changes the reduced state.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected_tx.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    /// The identity currently tracked, if any.
    pub async fn tracked_run(&self) -> Option<String> {
        self.conn.lock().await.run_id.clone()
    }
}

/// Discard the live subscription, if any. Frames already in flight are never
/// delivered: the stream object itself is dropped with the task.
fn close_locked(conn: &mut Conn, shared: &Shared) {
    if let Some(cancel) = conn.cancel.take() {
        cancel.cancel();
    }
    if let Some(task) = conn.task.take() {
        task.abort();
    }
    shared.connected_tx.send_replace(false);
}

enum NextFrame {
    Item(Option<Result<RawEvent>>),
    Idle(Duration),
}

async fn dispatch_loop(
    mut stream: RawEventStream,
    run_id: String,
    shared: Arc<Shared>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    debug!(target: "stream", run_id = %run_id, "dispatcher started");
    loop {
        let next = async {
            match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(item) => NextFrame::Item(item),
                    Err(_) => NextFrame::Idle(limit),
                },
                None => NextFrame::Item(stream.next().await),
            }
        };

        let step = tokio::select! {
            () = cancel.cancelled() => break,
            step = next => step,
        };

        match step {
            NextFrame::Idle(limit) => {
                warn!(target: "stream", run_id = %run_id, ?limit, "run stalled; closing subscription");
                shared.observer.on_error(&StreamError::IdleTimeout(limit));
                break;
            }
            NextFrame::Item(None) => {
                let finished =
                    shared.finished_run.lock().await.as_deref() == Some(run_id.as_str());
                if finished {
                    debug!(target: "stream", run_id = %run_id, "stream closed after terminal event");
                } else {
                    warn!(target: "stream", run_id = %run_id, "stream closed while run was active");
                    shared.observer.on_error(&StreamError::Closed);
                }
                break;
            }
            NextFrame::Item(Some(Err(err))) => {
                let finished =
                    shared.finished_run.lock().await.as_deref() == Some(run_id.as_str());
                if finished {
                    debug!(target: "stream", run_id = %run_id, error = %err, "ignoring error after terminal event");
                } else {
                    warn!(target: "stream", run_id = %run_id, error = %err, "transport error");
                    shared.observer.on_error(&err);
                }
                break;
            }
            NextFrame::Item(Some(Ok(raw))) => {
                handle_frame(&raw, &run_id, &shared).await;
            }
        }
    }
    shared.connected_tx.send_replace(false);
    debug!(target: "stream", run_id = %run_id, "dispatcher ended");
}

async fn handle_frame(raw: &RawEvent, run_id: &str, shared: &Arc<Shared>) {
    let frame = match Frame::parse(&raw.data) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(target: "stream", run_id, error = %err, "dropping malformed frame");
            return;
        }
    };

    shared.observer.on_event(&frame);

    if matches!(frame.event, RunEvent::Connected { .. }) {
        shared.connected_tx.send_replace(true);
    }

    // Latch before the terminal state becomes observable, so nothing racing
    // on a state snapshot can slip a resubscription past the latch.
    if matches!(
        frame.event,
        RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. }
    ) {
        *shared.finished_run.lock().await = Some(run_id.to_string());
    }

    let mut outcome = None;
    shared.state_tx.send_modify(|state| {
        outcome = state.apply(&frame);
    });

    if let Some(RunOutcome { success }) = outcome {
        info!(target: "stream", run_id, success, "run finished");
        shared.observer.on_complete(success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewright_events::{RunStatus, StageStatus};

    #[tokio::test]
    async fn test_fresh_consumer_is_idle_and_disconnected() {
        let stream = RunStream::new(RunStreamConfig::new("http://localhost:9"));
        assert!(!stream.is_connected());
        assert!(stream.tracked_run().await.is_none());
        let state = stream.state();
        assert_eq!(state.status, RunStatus::Idle);
        assert!(state.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[tokio::test]
    async fn test_track_unreachable_endpoint_is_an_error() {
        let stream = RunStream::new(RunStreamConfig::new("http://127.0.0.1:1"));
        let result = stream.track("r1").await;
        assert!(matches!(result, Err(StreamError::Http(_))));
        assert!(!stream.is_connected());
    }
}
