//! The message channel shared between a [`crate::provider::SocketTimingProvider`] and its
//! [`crate::sync::SocketSyncClock`].
//!
//! Both halves read from the same WebSocket connection. Rather than chaining message handlers,
//! which leaves each handler guessing whether an earlier one already consumed a frame, a single
//! reader task demultiplexes every inbound frame by `type`: `sync` frames go to the clock's
//! inbox, every other frame goes to the provider's inbox. Writes from both halves are serialized
//! onto one outbound queue, which preserves per-connection send order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use timing_core::protocol::{ClientMessage, ServerMessage};
use timing_core::TimingError;

/// The write half of a [`MessageChannel`], shared by both the provider and the clock. Cheap to
/// clone; all clones serialize onto the same outbound queue.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    closed: Arc<AtomicBool>,
    tasks: Arc<ChannelTasks>,
}

struct ChannelTasks {
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    writer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    /// Enqueue a frame for sending. Fails with [`TimingError::Closed`] once the channel has
    /// been closed or the writer task has died.
    pub fn send(&self, message: ClientMessage) -> Result<(), TimingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TimingError::Closed);
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| TimingError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent. Aborts the reader/writer tasks; further [`ChannelHandle::send`] calls fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.tasks.reader.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.tasks.writer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// The provider's half of the demultiplexed inbound stream: every non-`sync` frame.
pub struct ProviderInbox(mpsc::UnboundedReceiver<ServerMessage>);

impl ProviderInbox {
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.0.recv().await
    }
}

/// The clock's half of the demultiplexed inbound stream: `sync` frames only.
pub struct ClockInbox(mpsc::UnboundedReceiver<ServerMessage>);

impl ClockInbox {
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.0.recv().await
    }
}

/// Open a WebSocket channel to `url` and return the shared write handle plus each side's
/// demultiplexed inbound stream.
pub async fn connect(
    url: &str,
) -> Result<(ChannelHandle, ProviderInbox, ClockInbox), TimingError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TimingError::Malformed(format!("websocket connect failed: {e}")))?;
    let (sink, stream) = ws_stream.split();
    Ok(spawn_channel(sink, stream))
}

/// Build a channel around an already-established transport. Used by the server, which accepts
/// the WebSocket instead of dialing it, and by tests that want a real `tungstenite` framing
/// layer over an in-memory duplex pipe.
pub fn spawn_channel<S, T>(
    mut sink: S,
    mut stream: T,
) -> (ChannelHandle, ProviderInbox, ClockInbox)
where
    S: futures_util::Sink<WsMessage> + Unpin + Send + 'static,
    S::Error: std::fmt::Display + Send,
    T: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (provider_tx, provider_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (clock_tx, clock_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let closed = Arc::new(AtomicBool::new(false));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = message.to_json();
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                tracing::warn!(error = %e, "timing channel write failed, closing");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_closed = closed.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_other) => continue, // binary/ping/pong frames carry no protocol meaning here
                Err(e) => {
                    tracing::warn!(error = %e, "timing channel read failed, closing");
                    break;
                }
            };
            match ServerMessage::from_json(&text) {
                Ok(msg) if msg.is_sync() => {
                    if clock_tx.send(msg).is_err() {
                        break;
                    }
                }
                Ok(msg) => {
                    if provider_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, raw = %text, "dropping malformed server message");
                }
            }
        }
        reader_closed.store(true, Ordering::Release);
    });

    let handle = ChannelHandle {
        outbound_tx,
        closed,
        tasks: Arc::new(ChannelTasks {
            reader: std::sync::Mutex::new(Some(reader)),
            writer: std::sync::Mutex::new(Some(writer)),
        }),
    };

    (handle, ProviderInbox(provider_rx), ClockInbox(clock_rx))
}
