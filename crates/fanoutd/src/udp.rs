use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::metrics::counters;
use crate::shutdown::StopSignal;
use fanout_common::envelope::{decode_text, udp_ack};
use fanout_common::types::MAX_DATAGRAM_SIZE;
use fanout_common::{Envelope, Transport};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Datagram ingress. Every datagram is independent.
pub struct UdpIngress {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    poll_interval: Duration,
}

impl UdpIngress {
    /// Bind the datagram socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        poll_interval: Duration,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| RelayError::Bind {
                listener: "udp",
                addr,
                source,
            })?;
        Ok(Self {
            socket,
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
        self.socket.local_addr()
    }

    /// Receive, broadcast and acknowledge datagrams until `stop` is raised.
    pub async fn run(self, stop: StopSignal) {
        match self.socket.local_addr() {
            Ok(addr) => info!("UDP: listener starting on {addr}"),
            Err(e) => warn!("UDP: listener starting on unknown address: {e}"),
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !stop.is_stopped() {
            let (n, peer) = match timeout(self.poll_interval, self.socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    // e.g. an ICMP error from an earlier ACK surfacing on some platforms
                    warn!("UDP: socket error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let text = decode_text(&buf[..n]);
            info!("UDP: received from {peer} - {text:?}");
            if text.is_empty() {
                debug!("UDP: empty datagram from {peer}, not broadcast");
            } else {
                self.dispatcher
                    .broadcast(&Envelope::new(Transport::Udp, peer, &text));
            }

            match self.socket.send_to(udp_ack(&text).as_bytes(), peer).await {
                Ok(_) => counters::acks_total(Transport::Udp.as_str()),
                Err(e) => warn!("UDP: failed to ACK {peer}: {e}"),
            }
        }

        info!("UDP: listener loop finished");
        drop(self.socket);
        info!("UDP: listener socket closed");
    }
}
