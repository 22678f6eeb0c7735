use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::metrics::counters;
use crate::shutdown::StopSignal;
use fanout_common::envelope::{decode_text, is_exit_command, tcp_ack};
use fanout_common::types::{MAX_LINE_LENGTH, READ_BUFFER_SIZE};
use fanout_common::{Envelope, Transport};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Line-oriented TCP ingress.
pub struct TcpIngress {
    listener: TcpListener,
    dispatcher: Dispatcher,
    poll_interval: Duration,
}

impl TcpIngress {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        poll_interval: Duration,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind {
                listener: "tcp",
                addr,
                source,
            })?;
        Ok(Self {
            listener,
            dispatcher,
            poll_interval,
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

    /// Accept connections until `stop` is raised, then wait for the
    /// per-connection handlers (each notices the flag within one poll interval)
    /// and close the socket.
    pub async fn run(self, stop: StopSignal) {
        match self.listener.local_addr() {
            Ok(addr) => info!("TCP: listener starting on {addr}"),
            Err(e) => warn!("TCP: listener starting on unknown address: {e}"),
        }
        let mut handlers = JoinSet::new();

        while !stop.is_stopped() {
            // Reap finished handlers so the set does not grow without bound.
            while handlers.try_join_next().is_some() {}

            let accepted = match timeout(self.poll_interval, self.listener.accept()).await {
                Err(_) => continue,
                Ok(accepted) => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if stop.is_stopped() {
                        drop(stream);
                        break;
                    }
                    info!("TCP: accepted connection from {peer}");
                    handlers.spawn(handle_client(
                        stream,
                        peer,
                        self.dispatcher.clone(),
                        stop.clone(),
                        self.poll_interval,
                    ));
                }
                Err(e) => {
                    error!("TCP: accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        info!("TCP: listener loop finished, waiting for {} handler(s)", handlers.len());
        while handlers.join_next().await.is_some() {}
        drop(self.listener);
        info!("TCP: listener socket closed");
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    stop: StopSignal,
    poll_interval: Duration,
) {
    info!("TCP: handling connection from {peer}");
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, read_half);
    // Bytes of the line in progress; survives poll timeouts.
    let mut pending = Vec::new();

    while !stop.is_stopped() {
        let room = MAX_LINE_LENGTH.saturating_sub(pending.len()) as u64;
        let mut limited = (&mut reader).take(room);
        let read = timeout(poll_interval, limited.read_until(b'\n', &mut pending)).await;
        match read {
            Err(_) => continue,
            Ok(Ok(0)) => {
                if !pending.is_empty() {
                    let line = take_line(&mut pending);
                    handle_line(&line, peer, &dispatcher, &mut writer).await;
                }
                info!("TCP: connection closed by {peer}");
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                info!("TCP: connection reset by {peer}");
                break;
            }
            Ok(Err(e)) => {
                warn!("TCP: socket error with client {peer}: {e}");
                break;
            }
        }
        if stop.is_stopped() {
            break;
        }

        let complete = pending.last() == Some(&b'\n') || pending.len() >= MAX_LINE_LENGTH;
        if !complete {
            continue;
        }
        let line = take_line(&mut pending);
        if !handle_line(&line, peer, &dispatcher, &mut writer).await {
            break;
        }
    }

    let _ = writer.shutdown().await;
    info!("TCP: handler for {peer} finished");
}

/// Remove the next message from `pending`. A line cut at the length limit
/// stops before a trailing partial UTF-8 sequence, which stays for the next
/// message.
fn take_line(pending: &mut Vec<u8>) -> Vec<u8> {
    let mut cut = pending.len();
    if pending.last() != Some(&b'\n') {
        if let Err(e) = std::str::from_utf8(pending) {
            if e.error_len().is_none() && e.valid_up_to() > 0 {
                cut = e.valid_up_to();
            }
        }
    }
    pending.drain(..cut).collect()
}

/// Broadcast and ACK one line. Returns `false` once the session is over.
async fn handle_line(
    raw: &[u8],
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    writer: &mut OwnedWriteHalf,
) -> bool {
    let decoded = decode_text(raw);
    let line = decoded.trim();
    if line.is_empty() {
        return true;
    }
    info!("TCP: received from {peer} - {line:?}");
    dispatcher.broadcast(&Envelope::new(Transport::Tcp, peer, line));

    let ack = tcp_ack(line) + "\n";
    if let Err(e) = writer.write_all(ack.as_bytes()).await {
        warn!("TCP: failed to ACK {peer}: {e}");
        return false;
    }
    counters::acks_total(Transport::Tcp.as_str());

    if is_exit_command(line) {
        debug!("TCP: {peer} ended the session with {line:?}");
        return false;
    }
    true
}
