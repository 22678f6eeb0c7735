use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::registry::Subscriber;
use crate::shutdown::StopSignal;
use fanout_common::SystemEvent;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Why a subscriber's message loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Client sent a close frame or hung up.
    ClientClosed,
    /// The registry dropped this subscriber after a failed delivery.
    Evicted,
    /// The relay is shutting down.
    Shutdown,
}

/// Serve one WebSocket subscriber: handshake, register, confirm, then relay
/// broadcasts out and log anything the client sends in.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    queue: usize,
    stop: StopSignal,
) -> Result<(), RelayError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let registry = dispatcher.registry();
    let (subscriber, mut outbound) = Subscriber::new(peer, queue);
    let id = subscriber.id();
    registry.add(subscriber);
    info!("WS: new client connected: {peer} ({id})");
    info!("WS: total connected clients: {}", registry.len());

    match SystemEvent::connected(peer).to_json() {
        Ok(event) => {
            if let Err(e) = ws_tx.send(Message::Text(event)).await {
                warn!("WS: error sending connection confirmation to {peer}: {e}");
            }
        }
        Err(e) => warn!("WS: failed to encode connection confirmation: {e}"),
    }

    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut outbound, peer, &stop).await;

    registry.remove(id);
    info!("WS: client disconnected: {peer} ({id})");
    info!("WS: total connected clients: {}", registry.len());

    match result? {
        Exit::ClientClosed => {}
        Exit::Evicted | Exit::Shutdown => {
            let _ = ws_tx.send(Message::Close(None)).await;
        }
    }
    Ok(())
}

async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    outbound: &mut mpsc::Receiver<Arc<str>>,
    peer: SocketAddr,
    stop: &StopSignal,
) -> Result<Exit, RelayError> {
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        info!("WS: message from client {peer}: {text:?}");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("WS: ignoring {} byte binary frame from {peer}", data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::ClientClosed),
                    Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                    _ => {}
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => ws_tx.send(Message::Text(frame.to_string())).await?,
                    None => {
                        debug!("WS: {peer} was dropped from the registry");
                        return Ok(Exit::Evicted);
                    }
                }
            }
            () = stop.stopped() => return Ok(Exit::Shutdown),
        }
    }
}
