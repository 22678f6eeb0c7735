use crate::metrics::{counters, histograms};
use crate::registry::{Registry, Subscriber};
use fanout_common::Envelope;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the frame was queued for.
    pub delivered: usize,
    /// Subscribers that failed and were removed.
    pub failed: usize,
}

/// Fans envelopes out to every registered subscriber.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Dispatch through `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher reads.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serialize `envelope` once and queue it for every subscriber in a
    /// registry snapshot. A subscriber whose queue is closed or full is
    /// removed; the others still receive the frame.
    pub fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        counters::envelopes_total(envelope.transport().as_str());

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("WS_Broadcast: failed to encode envelope: {e}");
                return BroadcastReport::default();
            }
        };

        let subscribers = self.registry.snapshot();
        if subscribers.is_empty() {
            debug!("WS_Broadcast: no WebSocket clients to send to. Message: {}", preview(&json));
            return BroadcastReport::default();
        }

        info!(
            "WS_Broadcast: broadcasting to {} client(s): {}",
            subscribers.len(),
            preview(&json)
        );

        let started = Instant::now();
        let frame: Arc<str> = Arc::from(json);
        let mut report = BroadcastReport::default();
        for subscriber in &subscribers {
            if self.deliver(subscriber, Arc::clone(&frame)) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        counters::broadcast_deliveries_total(report.delivered as u64);
        counters::broadcast_failures_total(report.failed as u64);
        histograms::broadcast_seconds(started.elapsed().as_secs_f64());
        report
    }

    fn deliver(&self, subscriber: &Subscriber, frame: Arc<str>) -> bool {
        let reason = match subscriber.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => "queue full",
            Err(TrySendError::Closed(_)) => "connection closed",
        };
        warn!(
            "WS_Broadcast: error sending to WS client {} ({}): {reason}; dropping subscriber",
            subscriber.addr(),
            subscriber.id()
        );
        self.registry.remove(subscriber.id());
        false
    }
}

const PREVIEW_CHARS: usize = 100;

fn preview(json: &str) -> &str {
    match json.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &json[..idx],
        None => json,
    }
}
