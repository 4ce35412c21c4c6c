//! Per-connection accept loop: one task per client, demultiplexing `info`/`update`/`sync`
//! against a shared [`Registry`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use timing_core::protocol::{ClientMessage, ServerMessage, SyncServerTiming};

use crate::origin::{handshake_callback, OriginPolicy};
use crate::registry::Registry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Accept connections on `listener` until the process is asked to shut down, dispatching each
/// one to its own task against `registry`.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    policy: Arc<dyn OriginPolicy>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, registry, policy).await {
                warn!(%peer, error = %err, "connection ended with an error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    policy: Arc<dyn OriginPolicy>,
) -> anyhow::Result<()> {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &_, resp| {
        handshake_callback(policy.as_ref(), req, resp)
    })
    .await?;
    info!(conn_id, "client connected");

    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(WsMessage::Text(message.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let received_ms = timing_client::sync::local_now_ms();
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(conn_id, error = %err, "transport error, closing connection");
                break;
            }
        };
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let message = match ClientMessage::from_json(&text) {
            Ok(message) => message,
            Err(err) => {
                debug!(conn_id, error = %err, "malformed frame, dropping");
                continue;
            }
        };
        dispatch(message, conn_id, received_ms, &registry, &tx);
    }

    registry.disconnect(conn_id);
    drop(tx);
    let _ = writer.await;
    info!(conn_id, "client disconnected");
    Ok(())
}

fn dispatch(
    message: ClientMessage,
    conn_id: u64,
    received_ms: i64,
    registry: &Registry,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match message {
        ClientMessage::Info { id } => {
            let vector = registry.handle_info(&id, conn_id, tx.clone());
            let _ = tx.send(ServerMessage::Info {
                id,
                vector: vector.into(),
            });
        }
        ClientMessage::Update { id, vector } => {
            registry.handle_update(&id, vector);
        }
        ClientMessage::Sync { id, client } => {
            let server = SyncServerTiming {
                received: received_ms,
                sent: timing_client::sync::local_now_ms(),
            };
            let _ = tx.send(ServerMessage::Sync {
                id,
                client,
                server,
                delta: registry.delta_ms(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timing_core::protocol::{SyncClientTiming, VectorPayload};

    #[test]
    fn info_reply_targets_only_the_requesting_connection() {
        let registry = Registry::new(0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(
            ClientMessage::Info { id: "/clock".into() },
            1,
            0,
            &registry,
            &tx,
        );
        match rx.try_recv().unwrap() {
            ServerMessage::Info { id, .. } => assert_eq!(id, "/clock"),
            other => panic!("expected Info, got {other:?}"),
        }
    }

    #[test]
    fn sync_reply_echoes_client_timing_and_carries_delta() {
        let registry = Registry::new(7);
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(
            ClientMessage::Sync {
                id: "/clock".into(),
                client: SyncClientTiming { sent: 1_000 },
            },
            1,
            1_234,
            &registry,
            &tx,
        );
        match rx.try_recv().unwrap() {
            ServerMessage::Sync {
                client,
                server,
                delta,
                ..
            } => {
                assert_eq!(client.sent, 1_000);
                assert_eq!(server.received, 1_234);
                assert_eq!(delta, 7);
            }
            other => panic!("expected Sync, got {other:?}"),
        }
    }

    #[test]
    fn update_does_not_reply_directly_to_the_sender() {
        let registry = Registry::new(0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.handle_info("/clock", 1, tx.clone());
        let _ = rx.try_recv();
        dispatch(
            ClientMessage::Update {
                id: "/clock".into(),
                vector: VectorPayload {
                    position: Some(1.0),
                    velocity: None,
                    acceleration: None,
                    timestamp: None,
                },
            },
            1,
            0,
            &registry,
            &tx,
        );
        match rx.try_recv().unwrap() {
            ServerMessage::Change { .. } => {}
            other => panic!("expected Change fanned back to the originator, got {other:?}"),
        }
    }
}
