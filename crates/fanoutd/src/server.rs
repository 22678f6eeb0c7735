use crate::connection::handle_connection;
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::shutdown::StopSignal;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// WebSocket subscriber endpoint.
pub struct WsServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    subscriber_queue: usize,
    drain_timeout: Duration,
}

impl WsServer {
    /// Bind the WebSocket listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        subscriber_queue: usize,
        drain_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind {
                listener: "websocket",
                addr,
                source,
            })?;
        Ok(Self {
            listener,
            dispatcher,
            subscriber_queue,
            drain_timeout,
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `stop` is raised.
    ///
    /// Unlike the TCP and UDP listeners this loop does not poll: the stop
    /// signal wakes it directly. Open connections see the same signal, send a
    /// close frame and are given `drain_timeout` to finish.
    pub async fn run(self, stop: StopSignal) {
        match self.listener.local_addr() {
            Ok(addr) => info!("WS: server listening on ws://{addr}"),
            Err(e) => warn!("WS: server listening on unknown address: {e}"),
        }
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let dispatcher = self.dispatcher.clone();
                            let stop = stop.clone();
                            let queue = self.subscriber_queue;
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, dispatcher, queue, stop).await {
                                    debug!("WS: connection from {peer} closed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("WS: failed to accept connection: {e}");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                () = stop.stopped() => {
                    info!("WS: closing server, draining {} connection(s)", connections.len());
                    break;
                }
            }
        }
        drop(self.listener);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "WS: drain timeout reached with {} connection(s) still open, aborting them",
                connections.len()
            );
            connections.shutdown().await;
        }
        info!("WS: server closed");
    }
}
