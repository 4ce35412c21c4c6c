//! Probabilistic skew estimation over a shared [`crate::channel::ChannelHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use timing_core::protocol::{ClientMessage, ServerMessage, SyncClientTiming};
use timing_core::{EventBus, ListenerId, ReadyState};

use crate::channel::{ChannelHandle, ClockInbox};

use super::{local_now_ms, SkewChange, SyncClock};

/// Tuning constants exposed as CLI overrides on the server binary and as constructor
/// parameters on the client, so these defaults are overridable rather than hardcoded.
#[derive(Debug, Clone, Copy)]
pub struct SyncTuning {
    /// Number of sync requests sent during the initialization burst.
    pub n_init: usize,
    /// Spacing between requests during the initialization burst, in ms.
    pub init_spacing_ms: u64,
    /// Per-attempt timeout used only during the initialization burst, before a round-trip
    /// threshold has been established.
    pub init_attempt_timeout_ms: u64,
    /// Floor below which `roundtripThreshold` is never allowed to shrink.
    pub min_roundtrip_threshold_ms: i64,
    /// Steady-state interval between sync batches, in ms.
    pub batch_interval_ms: u64,
    /// Attempts per steady-state batch before giving up and slackening the threshold.
    pub max_attempts: u32,
    /// Delay between retries within one steady-state batch, in ms.
    pub attempt_interval_ms: u64,
    /// Multiplier applied to `roundtripThreshold` when a batch exhausts all attempts.
    pub threshold_growth_factor: f64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        SyncTuning {
            n_init: 10,
            init_spacing_ms: 10,
            init_attempt_timeout_ms: 1_000,
            min_roundtrip_threshold_ms: 5,
            batch_interval_ms: 10_000,
            max_attempts: 10,
            attempt_interval_ms: 500,
            threshold_growth_factor: 1.20,
        }
    }
}

struct ClockState {
    ready_state: ReadyState,
    skew: i64,
    delta: i64,
    roundtrip_min: i64,
    roundtrip_threshold: i64,
}

struct Inner {
    id: String,
    channel: ChannelHandle,
    state: Mutex<ClockState>,
    change_bus: EventBus<SkewChange>,
    ready_state_bus: EventBus<ReadyState>,
    closing: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    tuning: SyncTuning,
}

/// A clock that estimates its skew against the server's reference clock by round-tripping
/// `sync` messages over a shared channel.
#[derive(Clone)]
pub struct SocketSyncClock(Arc<Inner>);

enum Attempt {
    Sample { roundtrip: i64, skew: i64, delta: i64 },
    Timeout,
    ChannelClosed,
}

/// Send one `sync` request tagged with `id` and wait for the matching response. The wire
/// protocol has no separate attempt identifier, so the request's own `client.sent` timestamp
/// doubles as one: the protocol echoes it back verbatim in every `sync` reply, so a response
/// whose `client.sent` doesn't match the one we just sent is necessarily stale or foreign and is
/// skipped rather than treated as a timeout.
async fn attempt(
    channel: &ChannelHandle,
    inbox: &mut ClockInbox,
    id: &str,
    timeout: Duration,
) -> Attempt {
    let sent = local_now_ms();
    if channel
        .send(ClientMessage::Sync {
            id: id.to_string(),
            client: SyncClientTiming { sent },
        })
        .is_err()
    {
        return Attempt::ChannelClosed;
    }

    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Attempt::Timeout,
            frame = inbox.recv() => {
                match frame {
                    None => return Attempt::ChannelClosed,
                    Some(ServerMessage::Sync { id: reply_id, client, server, delta }) => {
                        if reply_id != id || client.sent != sent {
                            continue;
                        }
                        let received = local_now_ms();
                        let roundtrip = received - sent;
                        let skew = ((server.sent + server.received) - (sent + received)) / 2;
                        return Attempt::Sample { roundtrip, skew, delta };
                    }
                    Some(_) => continue,
                }
            }
        }
    }
}

struct Sample {
    roundtrip: i64,
    skew: i64,
    delta: i64,
}

impl SocketSyncClock {
    /// Open a clock on `channel`/`inbox`, tagging its `sync` requests with `id`, and spawn the
    /// background task that runs the initialization burst followed by steady-state batching.
    pub fn spawn(id: String, channel: ChannelHandle, inbox: ClockInbox, tuning: SyncTuning) -> Self {
        let inner = Arc::new(Inner {
            id,
            channel,
            state: Mutex::new(ClockState {
                ready_state: ReadyState::Connecting,
                skew: 0,
                delta: 0,
                roundtrip_min: i64::MAX,
                roundtrip_threshold: 0,
            }),
            change_bus: EventBus::new(),
            ready_state_bus: EventBus::new(),
            closing: AtomicBool::new(false),
            task: Mutex::new(None),
            tuning,
        });

        let run_inner = inner.clone();
        let handle = tokio::spawn(async move { run(run_inner, inbox).await });
        *inner.task.lock().unwrap() = Some(handle);

        SocketSyncClock(inner)
    }
}

async fn run(inner: Arc<Inner>, mut inbox: ClockInbox) {
    let tuning = inner.tuning;

    let samples = loop {
        if inner.closing.load(Ordering::Acquire) {
            return;
        }
        let mut collected = Vec::with_capacity(tuning.n_init);
        for _ in 0..tuning.n_init {
            match attempt(
                &inner.channel,
                &mut inbox,
                &inner.id,
                Duration::from_millis(tuning.init_attempt_timeout_ms),
            )
            .await
            {
                Attempt::Sample { roundtrip, skew, delta } => {
                    collected.push(Sample { roundtrip, skew, delta })
                }
                Attempt::Timeout => {}
                Attempt::ChannelClosed => return mark_closed(&inner),
            }
            tokio::time::sleep(Duration::from_millis(tuning.init_spacing_ms)).await;
        }
        if !collected.is_empty() {
            break collected;
        }
        tracing::warn!(id = %inner.id, "sync initialization burst produced no samples, retrying");
    };

    finish_initialization(&inner, samples, &tuning);

    loop {
        tokio::time::sleep(Duration::from_millis(tuning.batch_interval_ms)).await;
        if inner.closing.load(Ordering::Acquire) {
            return;
        }
        run_batch(&inner, &mut inbox, &tuning).await;
    }
}

fn mark_closed(inner: &Arc<Inner>) {
    if inner.closing.swap(true, Ordering::AcqRel) {
        return;
    }
    inner.state.lock().unwrap().ready_state = ReadyState::Closed;
    inner.ready_state_bus.emit(&ReadyState::Closed);
}

fn finish_initialization(inner: &Arc<Inner>, mut samples: Vec<Sample>, tuning: &SyncTuning) {
    samples.sort_by_key(|s| s.roundtrip);

    let roundtrip_min = samples[0].roundtrip;
    let skew = samples[0].skew;
    let delta = samples[0].delta;

    let ideal_index = (tuning.n_init as f64 / 2.0).ceil() as usize;
    let index = ideal_index.saturating_sub(1).min(samples.len() - 1);
    let floor = (tuning.min_roundtrip_threshold_ms as f64).max(1.30 * roundtrip_min as f64);
    let roundtrip_threshold = (samples[index].roundtrip as f64).max(floor).ceil() as i64;

    {
        let mut state = inner.state.lock().unwrap();
        state.skew = skew;
        state.delta = delta;
        state.roundtrip_min = roundtrip_min;
        state.roundtrip_threshold = roundtrip_threshold;
        state.ready_state = ReadyState::Open;
    }
    inner.ready_state_bus.emit(&ReadyState::Open);
    inner.change_bus.emit(&SkewChange { skew, delta });
}

async fn run_batch(inner: &Arc<Inner>, inbox: &mut ClockInbox, tuning: &SyncTuning) {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let threshold_ms = inner.state.lock().unwrap().roundtrip_threshold;
        match attempt(
            &inner.channel,
            inbox,
            &inner.id,
            Duration::from_millis(threshold_ms.max(1) as u64),
        )
        .await
        {
            Attempt::ChannelClosed => return mark_closed(inner),
            Attempt::Timeout => {
                if attempts < tuning.max_attempts {
                    tokio::time::sleep(Duration::from_millis(tuning.attempt_interval_ms)).await;
                    continue;
                }
                let mut state = inner.state.lock().unwrap();
                state.roundtrip_threshold =
                    (state.roundtrip_threshold as f64 * tuning.threshold_growth_factor).ceil() as i64;
                return;
            }
            Attempt::Sample { roundtrip, skew, delta } => {
                adopt_sample(inner, roundtrip, skew, delta, tuning);
                return;
            }
        }
    }
}

fn adopt_sample(inner: &Arc<Inner>, roundtrip: i64, skew: i64, delta: i64, tuning: &SyncTuning) {
    let mut state = inner.state.lock().unwrap();
    if roundtrip > state.roundtrip_threshold {
        return; // dropped: outside the current threshold
    }

    if roundtrip < state.roundtrip_min {
        let ratio = roundtrip as f64 / state.roundtrip_min as f64;
        state.roundtrip_threshold = (tuning.min_roundtrip_threshold_ms as f64)
            .max((state.roundtrip_threshold as f64 * ratio).ceil())
            as i64;
        state.roundtrip_min = roundtrip;
    }

    let skew_changed = (skew - state.skew).abs() >= 1;
    let delta_changed = delta != state.delta;
    if skew_changed {
        state.skew = skew;
    }
    if delta_changed {
        state.delta = delta;
    }
    let emitted = skew_changed || delta_changed;
    let (skew, delta) = (state.skew, state.delta);
    drop(state);

    if emitted {
        inner.change_bus.emit(&SkewChange { skew, delta });
    }
}

impl SyncClock for SocketSyncClock {
    fn ready_state(&self) -> ReadyState {
        self.0.state.lock().unwrap().ready_state
    }

    fn skew(&self) -> i64 {
        self.0.state.lock().unwrap().skew
    }

    fn delta(&self) -> i64 {
        self.0.state.lock().unwrap().delta
    }

    fn close(&self) {
        if self.0.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.0.task.lock().unwrap().take() {
            handle.abort();
        }
        self.0.state.lock().unwrap().ready_state = ReadyState::Closed;
        self.0.ready_state_bus.emit(&ReadyState::Closed);
    }

    fn on_change(&self, listener: Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncClockExt;
    use crate::channel::tests::test_pair;
    use timing_core::protocol::{ServerMessage, SyncServerTiming};
    use tokio::sync::mpsc;

    fn fast_tuning() -> SyncTuning {
        SyncTuning {
            n_init: 4,
            init_spacing_ms: 1,
            init_attempt_timeout_ms: 200,
            min_roundtrip_threshold_ms: 5,
            batch_interval_ms: 30,
            max_attempts: 3,
            attempt_interval_ms: 5,
            threshold_growth_factor: 1.20,
        }
    }

    /// Drive the init-phase server side: answer every `sync` request it sees with a fixed
    /// server skew, for exactly `count` requests.
    async fn answer_init_burst(
        server_in: &mpsc::UnboundedSender<ServerMessage>,
        sent: &mut mpsc::UnboundedReceiver<ClientMessage>,
        count: usize,
        skew_ms: i64,
    ) {
        for _ in 0..count {
            let ClientMessage::Sync { id, client } = sent.recv().await.unwrap() else {
                panic!("expected sync request");
            };
            let now = client.sent + skew_ms;
            server_in
                .send(ServerMessage::Sync {
                    id,
                    client,
                    server: SyncServerTiming {
                        received: now,
                        sent: now,
                    },
                    delta: 0,
                })
                .unwrap();
        }
    }

    async fn wait_until_open(clock: &SocketSyncClock) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while clock.ready_state() != ReadyState::Open {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("clock should reach open state");
    }

    #[tokio::test]
    async fn converges_to_open_after_initialization_burst() {
        let (handle, _provider_inbox, clock_inbox, server_in, mut sent) = test_pair();

        let responder =
            tokio::spawn(async move { answer_init_burst(&server_in, &mut sent, 4, 250).await });

        let clock = SocketSyncClock::spawn("/clock".into(), handle, clock_inbox, fast_tuning());
        wait_until_open(&clock).await;

        assert!((clock.skew() - 250).abs() <= 1);
        responder.await.unwrap();
        clock.close();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let (handle, _provider_inbox, clock_inbox, server_in, mut sent) = test_pair();
        tokio::spawn(async move { answer_init_burst(&server_in, &mut sent, 4, 0).await });

        let clock = SocketSyncClock::spawn("/clock".into(), handle, clock_inbox, fast_tuning());
        wait_until_open(&clock).await;

        clock.close();
        clock.close();
        assert_eq!(clock.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn get_time_applies_skew_minus_delta() {
        let clock = LocalFixedClock { skew: 500, delta: 100 };
        assert_eq!(clock.get_time(1_000), 1_000 + 500 - 100);
    }

    /// A clock stub with no background task, used only to exercise the default `get_time`
    /// trait method in isolation.
    struct LocalFixedClock {
        skew: i64,
        delta: i64,
    }

    impl SyncClock for LocalFixedClock {
        fn ready_state(&self) -> ReadyState {
            ReadyState::Open
        }
        fn skew(&self) -> i64 {
            self.skew
        }
        fn delta(&self) -> i64 {
            self.delta
        }
        fn close(&self) {}
        fn on_change(&self, _listener: Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId {
            unimplemented!("not exercised by this test")
        }
        fn off_change(&self, _id: ListenerId) {}
        fn on_ready_state_change(
            &self,
            _listener: Box<dyn Fn(ReadyState) + Send + Sync>,
        ) -> ListenerId {
            unimplemented!("not exercised by this test")
        }
        fn off_ready_state_change(&self, _id: ListenerId) {}
    }
}
