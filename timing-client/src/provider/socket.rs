//! The client side of the wire protocol: applies `info`/`change` frames translated
//! through a [`crate::sync::SyncClock`], queuing future-dated changes until their reference
//! timestamp has passed.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use timing_core::protocol::{ClientMessage, ServerMessage, VectorPayload};
use timing_core::vector::now_seconds;
use timing_core::{EventBus, Interval, ListenerId, ReadyState, StateVector, TimingError};

use crate::channel::{ChannelHandle, ProviderInbox};
use crate::sync::{SyncClock, SyncClockExt};

use super::{TimingFuture, TimingProvider, UpdateRequest};

struct ProviderState {
    ready_state: ReadyState,
    vector: StateVector,
    last_server_ts: f64,
    pending_info: Option<VectorPayload>,
}

struct Inner {
    id: String,
    channel: ChannelHandle,
    clock: Box<dyn SyncClock>,
    owns_channel: bool,
    range: Option<Interval>,
    state: Mutex<ProviderState>,
    pending: Mutex<Vec<(f64, VectorPayload)>>,
    change_bus: EventBus<StateVector>,
    ready_state_bus: EventBus<ReadyState>,
    closing: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// The client-side provider for a server-hosted timing object, reachable over a
/// [`crate::channel::ChannelHandle`] shared with a [`crate::sync::SocketSyncClock`].
#[derive(Clone)]
pub struct SocketTimingProvider(Arc<Inner>);

impl SocketTimingProvider {
    /// Build a provider over an already-open channel and clock. `owns_channel` controls whether
    /// [`TimingProvider::close`] also closes the channel — ownership of the channel belongs
    /// to whichever created it.
    pub fn new(
        id: String,
        channel: ChannelHandle,
        inbox: ProviderInbox,
        clock: Box<dyn SyncClock>,
        owns_channel: bool,
        range: Option<Interval>,
    ) -> Self {
        let inner = Arc::new(Inner {
            id: id.clone(),
            channel: channel.clone(),
            clock,
            owns_channel,
            range,
            state: Mutex::new(ProviderState {
                ready_state: ReadyState::Connecting,
                vector: StateVector::zero(),
                last_server_ts: f64::NEG_INFINITY,
                pending_info: None,
            }),
            pending: Mutex::new(Vec::new()),
            change_bus: EventBus::new(),
            ready_state_bus: EventBus::new(),
            closing: AtomicBool::new(false),
            task: Mutex::new(None),
        });

        let notify = Arc::new(Notify::new());
        let clock_notify = notify.clone();
        inner
            .clock
            .on_change(Box::new(move |_| clock_notify.notify_one()));
        let ready_notify = notify.clone();
        inner
            .clock
            .on_ready_state_change(Box::new(move |_| ready_notify.notify_one()));

        let _ = channel.send(ClientMessage::Info { id });

        let run_inner = inner.clone();
        let handle = tokio::spawn(async move { run(run_inner, inbox, notify).await });
        *inner.task.lock().unwrap() = Some(handle);

        SocketTimingProvider(inner)
    }
}

fn translate(inner: &Inner, server_ts: f64) -> f64 {
    let delta_adjusted = server_ts - (inner.clock.delta() as f64 / 1000.0);
    let local_now = crate::sync::local_now_ms();
    let ref_now = inner.clock.get_time(local_now);
    let drift_seconds = (local_now - ref_now) as f64 / 1000.0;
    delta_adjusted + drift_seconds
}

async fn run(inner: Arc<Inner>, mut inbox: ProviderInbox, notify: Arc<Notify>) {
    loop {
        let wake_ms = {
            let pending = inner.pending.lock().unwrap();
            pending.first().map(|(server_ts, _)| {
                let local_ts = translate(&inner, *server_ts);
                ((local_ts - now_seconds()) * 1000.0).max(0.0) as u64
            })
        };

        tokio::select! {
            _ = sleep_or_pending(wake_ms) => {
                apply_ready_pending(&inner);
            }
            _ = notify.notified() => {
                try_process_pending_info(&inner);
            }
            frame = inbox.recv() => {
                match frame {
                    None => {
                        mark_closed(&inner);
                        return;
                    }
                    Some(msg) => handle_inbound(&inner, msg),
                }
            }
        }
    }
}

async fn sleep_or_pending(wake_ms: Option<u64>) {
    match wake_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => pending::<()>().await,
    }
}

fn mark_closed(inner: &Arc<Inner>) {
    if inner.closing.swap(true, Ordering::AcqRel) {
        return;
    }
    inner.state.lock().unwrap().ready_state = ReadyState::Closed;
    inner.ready_state_bus.emit(&ReadyState::Closed);
}

fn handle_inbound(inner: &Arc<Inner>, msg: ServerMessage) {
    if msg.id() != inner.id {
        return;
    }
    match msg {
        ServerMessage::Info { vector, .. } => {
            let still_connecting = inner.state.lock().unwrap().ready_state == ReadyState::Connecting;
            if !still_connecting {
                // `info` is only accepted while this provider is still connecting; a stray
                // frame after that (the server shouldn't send one, but a misbehaving peer
                // might) must not reopen or re-seed an already-live vector.
                return;
            }
            if inner.clock.ready_state() == ReadyState::Open {
                apply_info(inner, vector);
            } else {
                inner.state.lock().unwrap().pending_info = Some(vector);
            }
        }
        ServerMessage::Change { vector, .. } => handle_change(inner, vector),
        ServerMessage::Sync { .. } => {
            // Routed to the clock's inbox by the channel demultiplexer; never reaches here.
        }
    }
}

fn try_process_pending_info(inner: &Arc<Inner>) {
    if inner.clock.ready_state() != ReadyState::Open {
        return;
    }
    let payload = inner.state.lock().unwrap().pending_info.take();
    if let Some(payload) = payload {
        apply_info(inner, payload);
    }
}

fn apply_info(inner: &Arc<Inner>, payload: VectorPayload) {
    let server_ts = payload.timestamp.unwrap_or_else(now_seconds);
    let local_ts = translate(inner, server_ts);
    let mut vector = payload.into_full_vector();
    vector.timestamp = local_ts;

    {
        let mut state = inner.state.lock().unwrap();
        state.vector = vector;
        state.last_server_ts = server_ts;
        state.ready_state = ReadyState::Open;
    }
    inner.ready_state_bus.emit(&ReadyState::Open);
    inner.change_bus.emit(&vector);
}

fn handle_change(inner: &Arc<Inner>, payload: VectorPayload) {
    if inner.state.lock().unwrap().ready_state != ReadyState::Open {
        return;
    }
    let server_ts = payload.timestamp.unwrap_or_else(now_seconds);
    if server_ts < inner.state.lock().unwrap().last_server_ts {
        return; // stale: a change with an earlier reference timestamp than the last applied one
    }

    let local_ts = translate(inner, server_ts);
    if local_ts <= now_seconds() {
        apply_change_vector(inner, payload, server_ts, local_ts);
        return;
    }

    let mut pending = inner.pending.lock().unwrap();
    pending.push((server_ts, payload));
    pending.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
}

fn apply_ready_pending(inner: &Arc<Inner>) {
    let now = now_seconds();
    let latest = {
        let mut pending = inner.pending.lock().unwrap();
        let mut latest = None;
        while let Some((server_ts, _)) = pending.first() {
            if translate(inner, *server_ts) <= now {
                latest = Some(pending.remove(0));
            } else {
                break;
            }
        }
        latest
    };
    if let Some((server_ts, payload)) = latest {
        let local_ts = translate(inner, server_ts);
        apply_change_vector(inner, payload, server_ts, local_ts);
    }
}

fn apply_change_vector(inner: &Arc<Inner>, payload: VectorPayload, server_ts: f64, local_ts: f64) {
    let mut vector = payload.into_full_vector();
    vector.timestamp = local_ts;

    let changed = {
        let mut state = inner.state.lock().unwrap();
        let changed = !vector.equivalent(&state.vector);
        state.vector = vector;
        state.last_server_ts = server_ts;
        changed
    };
    if changed {
        inner.change_bus.emit(&vector);
    }
}

impl TimingProvider for SocketTimingProvider {
    fn ready_state(&self) -> ReadyState {
        self.0.state.lock().unwrap().ready_state
    }

    fn vector(&self) -> StateVector {
        self.0.state.lock().unwrap().vector
    }

    fn range(&self) -> Option<Interval> {
        self.0.range
    }

    fn query(&self) -> StateVector {
        self.vector().extrapolate(now_seconds())
    }

    fn update(&self, request: UpdateRequest) -> TimingFuture<Result<(), TimingError>> {
        let inner = self.0.clone();
        Box::pin(async move {
            if inner.state.lock().unwrap().ready_state != ReadyState::Open {
                return Err(TimingError::NotOpen);
            }
            let payload = VectorPayload {
                position: request.position,
                velocity: request.velocity,
                acceleration: request.acceleration,
                timestamp: None,
            };
            inner.channel.send(ClientMessage::Update {
                id: inner.id.clone(),
                vector: payload,
            })
        })
    }

    fn close(&self) {
        if self.0.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.0.task.lock().unwrap().take() {
            handle.abort();
        }
        self.0.clock.close();
        if self.0.owns_channel {
            self.0.channel.close();
        }
        self.0.state.lock().unwrap().ready_state = ReadyState::Closed;
        self.0.ready_state_bus.emit(&ReadyState::Closed);
    }

    fn on_change(&self, listener: Box<dyn Fn(StateVector) + Send + Sync>) -> ListenerId {
        self.0.change_bus.subscribe(move |event| listener(*event))
    }

    fn off_change(&self, id: ListenerId) {
        self.0.change_bus.unsubscribe(id);
    }

    fn on_ready_state_change(
        &self,
        listener: Box<dyn Fn(ReadyState) + Send + Sync>,
    ) -> ListenerId {
        self.0
            .ready_state_bus
            .subscribe(move |event| listener(*event))
    }

    fn off_ready_state_change(&self, id: ListenerId) {
        self.0.ready_state_bus.unsubscribe(id);
    }
}
