//! Probe lifecycle events
//!
//! The engine publishes events to an injected [`EventSink`] and never subscribes
//! to anything itself. Sinks must be cheap and non-blocking: `publish` is called
//! from inside running probes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ProfileResult;

/// Per-batch outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Platforms selected for the batch
    pub selected: usize,
    /// Probes that actually ran a checker
    pub checked: usize,
    /// Probes served from the cache
    pub cached: usize,
    /// Results with `exists == true`
    pub found: usize,
    /// Indeterminate results caused by errors
    pub errored: usize,
    /// Probes cut off by the batch deadline
    pub timed_out: usize,
}

/// Batch-level summary returned alongside results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub identifier: String,
    pub counts: BatchCounts,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Whether the batch deadline expired
    pub deadline_hit: bool,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Lifecycle events published by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProbeEvent {
    /// A checker began running for one platform
    ProbeStarted {
        batch_id: Uuid,
        platform: String,
        identifier: String,
    },

    /// A profile was found (fetched or served from the cache)
    ProbeFound {
        batch_id: Uuid,
        profile: ProfileResult,
    },

    /// The whole batch finished
    ProbeComplete { batch_id: Uuid, counts: BatchCounts },
}

impl ProbeEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            ProbeEvent::ProbeStarted { batch_id, .. }
            | ProbeEvent::ProbeFound { batch_id, .. }
            | ProbeEvent::ProbeComplete { batch_id, .. } => *batch_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProbeEvent::ProbeStarted { .. } => "probe_started",
            ProbeEvent::ProbeFound { .. } => "probe_found",
            ProbeEvent::ProbeComplete { .. } => "probe_complete",
        }
    }
}

/// External pub/sub boundary
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ProbeEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ProbeEvent) {}
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: ProbeEvent) {
        match &event {
            ProbeEvent::ProbeStarted {
                platform,
                identifier,
                ..
            } => debug!("Probing {} for {}", platform, identifier),
            ProbeEvent::ProbeFound { profile, .. } => {
                info!("Found {} on {}: {}", profile.identifier, profile.platform, profile.url)
            }
            ProbeEvent::ProbeComplete { batch_id, counts } => info!(
                "Batch {} complete: {} checked, {} cached, {} found, {} errored",
                batch_id, counts.checked, counts.cached, counts.found, counts.errored
            ),
        }
    }
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProbeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProbeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: ProbeEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        let batch_id = Uuid::new_v4();

        sink.publish(ProbeEvent::ProbeStarted {
            batch_id,
            platform: "GitHub".to_string(),
            identifier: "alice123".to_string(),
        });
        sink.publish(ProbeEvent::ProbeComplete {
            batch_id,
            counts: BatchCounts::default(),
        });

        let first = rx.try_recv().unwrap();
        assert_eq!(first.name(), "probe_started");
        assert_eq!(first.batch_id(), batch_id);
        assert_eq!(rx.try_recv().unwrap().name(), "probe_complete");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.publish(ProbeEvent::ProbeComplete {
            batch_id: Uuid::new_v4(),
            counts: BatchCounts::default(),
        });
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ProbeEvent::ProbeComplete {
            batch_id: Uuid::nil(),
            counts: BatchCounts {
                found: 2,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "probe_complete");
        assert_eq!(json["counts"]["found"], 2);
    }
}
