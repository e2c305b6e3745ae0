use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use shared::{
    domain::{LogEntry, RunId},
    protocol::{decode_frame, ClientFrame, DecodedFrame, ExecutionEvent},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::ReconnectPolicy,
    error::TransportError,
    store::SharedExecutionStore,
    transport::{FrameConnection, FrameTransport},
};

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// The job engine reported `execution_complete`.
    Completed,
    /// Tracking was stopped by the caller.
    Stopped,
    /// Every reconnect attempt failed.
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    PhaseChanged {
        run_id: RunId,
        phase: SessionPhase,
    },
    ReconnectScheduled {
        run_id: RunId,
        attempt: u32,
        delay: Duration,
    },
    NodeUpdated {
        run_id: RunId,
        entry: LogEntry,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub run_id: RunId,
    pub phase: SessionPhase,
    pub reconnect_attempt: u32,
}

struct SessionState {
    generation: u64,
    run_id: Option<RunId>,
    phase: SessionPhase,
    reconnect_attempt: u32,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SessionState {
    /// Invalidates the running session task. Anything it still holds a
    /// generation for is discarded from here on.
    fn retire(&mut self) -> Option<JoinHandle<()>> {
        self.generation = self.generation.wrapping_add(1);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.task.take()
    }

    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.phase.is_terminal()
    }
}

enum ConnectionEnd {
    /// The channel went away on its own; reconnect unless terminal.
    Dropped,
    /// Tracking is over for this session task.
    Finished,
}

enum FrameOutcome {
    Continue,
    Finished,
}

/// Keeps one execution channel alive per tracked run and folds the events it
/// carries into the injected store.
///
/// Lock order is `store` then `session`. Nothing waits on the store while
/// holding `session`, so a caller may hold a store guard and still query
/// [`phase`](Self::phase) or [`session_info`](Self::session_info).
pub struct ExecutionTracker {
    transport: Arc<dyn FrameTransport>,
    store: SharedExecutionStore,
    options: TrackerOptions,
    session: Mutex<SessionState>,
    events: broadcast::Sender<TrackerEvent>,
}

impl ExecutionTracker {
    pub fn new(
        transport: Arc<dyn FrameTransport>,
        store: SharedExecutionStore,
        options: TrackerOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            transport,
            store,
            options,
            session: Mutex::new(SessionState {
                generation: 0,
                run_id: None,
                phase: SessionPhase::Idle,
                reconnect_attempt: 0,
                shutdown: None,
                task: None,
            }),
            events,
        })
    }

    pub fn store(&self) -> SharedExecutionStore {
        Arc::clone(&self.store)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.lock().await.phase
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        let session = self.session.lock().await;
        session.run_id.clone().map(|run_id| SessionInfo {
            run_id,
            phase: session.phase,
            reconnect_attempt: session.reconnect_attempt,
        })
    }

    /// Starts tracking `run_id`, tearing down whatever session was active.
    pub async fn start(self: &Arc<Self>, run_id: RunId) {
        let previous = self.session.lock().await.retire();
        await_retired(previous).await;

        let mut store = self.store.write().await;
        let mut session = self.session.lock().await;
        if let Some(raced) = session.retire() {
            raced.abort();
        }
        let generation = session.generation;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        session.run_id = Some(run_id.clone());
        session.phase = SessionPhase::Connecting;
        session.reconnect_attempt = 0;
        session.shutdown = Some(shutdown_tx);
        store.start_execution(run_id.clone());
        drop(store);

        info!(run_id = %run_id, generation, "tracker: tracking execution");
        self.emit(TrackerEvent::PhaseChanged {
            run_id: run_id.clone(),
            phase: SessionPhase::Connecting,
        });

        let tracker = Arc::clone(self);
        session.task = Some(tokio::spawn(async move {
            tracker.run_session(run_id, generation, shutdown_rx).await;
        }));
    }

    /// Stops tracking. Safe to call repeatedly or before any `start`.
    pub async fn stop(&self) {
        let retired = {
            let mut store = self.store.write().await;
            let mut session = self.session.lock().await;
            let handle = session.retire();
            if let Some(run_id) = session.run_id.clone() {
                if !session.phase.is_terminal() {
                    session.phase = SessionPhase::Stopped;
                    store.finish_execution();
                    info!(run_id = %run_id, "tracker: tracking stopped");
                    self.emit(TrackerEvent::PhaseChanged {
                        run_id,
                        phase: SessionPhase::Stopped,
                    });
                }
            }
            handle
        };
        await_retired(retired).await;
    }

    fn emit(&self, event: TrackerEvent) {
        let _ = self.events.send(event);
    }

    async fn run_session(
        self: Arc<Self>,
        run_id: RunId,
        generation: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = self.options.reconnect.backoff();
        loop {
            if !self
                .update_phase(&run_id, generation, SessionPhase::Connecting)
                .await
            {
                return;
            }

            let connected = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                result = self.transport.connect(&run_id) => result,
            };

            match connected {
                Ok(mut connection) => {
                    if !self
                        .update_phase(&run_id, generation, SessionPhase::Connected)
                        .await
                    {
                        connection.close().await;
                        return;
                    }
                    backoff.reset();
                    info!(run_id = %run_id, "tracker: execution channel open");

                    let end = self
                        .drive_connection(&mut *connection, &run_id, generation, &mut shutdown)
                        .await;
                    if let ConnectionEnd::Finished = end {
                        connection.close().await;
                        return;
                    }
                }
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "tracker: connection attempt failed");
                }
            }

            let Some(delay) = backoff.next_delay() else {
                self.give_up(&run_id, generation, backoff.attempt()).await;
                return;
            };
            if !self
                .schedule_reconnect(&run_id, generation, backoff.attempt(), delay)
                .await
            {
                return;
            }

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                _ = time::sleep(delay) => {}
            }
        }
    }

    async fn drive_connection(
        &self,
        connection: &mut dyn FrameConnection,
        run_id: &RunId,
        generation: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let period = self.options.keepalive_interval.max(Duration::from_millis(1));
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => return ConnectionEnd::Finished,
                _ = keepalive.tick() => {
                    if let Err(err) = send_keepalive(connection).await {
                        warn!(run_id = %run_id, error = %err, "tracker: keepalive failed; treating as close");
                        return ConnectionEnd::Dropped;
                    }
                }
                frame = connection.next_frame() => match frame {
                    Some(Ok(raw)) => {
                        if let FrameOutcome::Finished = self.apply_frame(run_id, generation, &raw).await {
                            return ConnectionEnd::Finished;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(run_id = %run_id, error = %err, "tracker: transport error; treating as close");
                        return ConnectionEnd::Dropped;
                    }
                    None => {
                        info!(run_id = %run_id, "tracker: execution channel closed");
                        return ConnectionEnd::Dropped;
                    }
                },
            }
        }
    }

    async fn apply_frame(&self, run_id: &RunId, generation: u64, raw: &str) -> FrameOutcome {
        let event = match decode_frame(raw) {
            DecodedFrame::Event(event) => event,
            DecodedFrame::Ignored(reason) => {
                debug!(run_id = %run_id, %reason, "tracker: dropping frame");
                return FrameOutcome::Continue;
            }
        };

        let mut store = self.store.write().await;
        let mut session = self.session.lock().await;
        if !session.accepts(generation) {
            return FrameOutcome::Finished;
        }

        if let ExecutionEvent::ExecutionComplete {} = event {
            store.finish_execution();
            session.phase = SessionPhase::Completed;
            info!(run_id = %run_id, nodes = store.node_statuses().len(), "tracker: execution complete");
            self.emit(TrackerEvent::PhaseChanged {
                run_id: run_id.clone(),
                phase: SessionPhase::Completed,
            });
            return FrameOutcome::Finished;
        }

        let Some(entry) = event.to_log_entry(Utc::now()) else {
            return FrameOutcome::Continue;
        };
        debug!(run_id = %run_id, node_id = %entry.node_id, status = %entry.status, "tracker: node update");
        store.set_node_status(entry.node_id.clone(), entry.status);
        store.add_node_log(entry.clone());
        self.emit(TrackerEvent::NodeUpdated {
            run_id: run_id.clone(),
            entry,
        });
        FrameOutcome::Continue
    }

    async fn update_phase(&self, run_id: &RunId, generation: u64, phase: SessionPhase) -> bool {
        let mut session = self.session.lock().await;
        if !session.accepts(generation) {
            return false;
        }
        if phase == SessionPhase::Connected {
            session.reconnect_attempt = 0;
        }
        if session.phase != phase {
            session.phase = phase;
            self.emit(TrackerEvent::PhaseChanged {
                run_id: run_id.clone(),
                phase,
            });
        }
        true
    }

    async fn schedule_reconnect(
        &self,
        run_id: &RunId,
        generation: u64,
        attempt: u32,
        delay: Duration,
    ) -> bool {
        if !self
            .update_phase(run_id, generation, SessionPhase::Reconnecting)
            .await
        {
            return false;
        }
        let mut session = self.session.lock().await;
        if !session.accepts(generation) {
            return false;
        }
        session.reconnect_attempt = attempt;
        warn!(
            run_id = %run_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "tracker: scheduling reconnect"
        );
        self.emit(TrackerEvent::ReconnectScheduled {
            run_id: run_id.clone(),
            attempt,
            delay,
        });
        true
    }

    async fn give_up(&self, run_id: &RunId, generation: u64, attempts: u32) {
        let mut store = self.store.write().await;
        let mut session = self.session.lock().await;
        if !session.accepts(generation) {
            return;
        }
        session.phase = SessionPhase::Failed;
        store.finish_execution();
        error!(run_id = %run_id, attempts, "tracker: reconnect attempts exhausted");
        self.emit(TrackerEvent::PhaseChanged {
            run_id: run_id.clone(),
            phase: SessionPhase::Failed,
        });
    }
}

async fn send_keepalive(connection: &mut dyn FrameConnection) -> Result<(), TransportError> {
    let ping = ClientFrame::Ping
        .to_text()
        .map_err(|err| TransportError::Send(format!("encode keepalive: {err}")))?;
    connection.send_text(ping).await
}

/// Resolves once the session's shutdown flag is raised or its sender dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();
        if requested {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn await_retired(handle: Option<JoinHandle<()>>) {
    let Some(mut handle) = handle else {
        return;
    };
    if time::timeout(TEARDOWN_GRACE, &mut handle).await.is_err() {
        warn!("tracker: retired session did not wind down in time; aborting it");
        handle.abort();
    }
}

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tests;
