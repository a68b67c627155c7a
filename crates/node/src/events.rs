//! Node events pushed to an external signalling layer.
//!
//! Events are fire-and-forget: a sink that cannot deliver drops the event.
//! Envelopes serialise as:
//!
//! ```json
//! {"type": "node.crashed", "event": {"error": "node start failure: ..."}}
//! ```

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Lifecycle events emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "event")]
pub enum NodeEvent {
    #[serde(rename = "node.started")]
    Started,

    #[serde(rename = "node.stopped")]
    Stopped,

    /// Start or RPC client initialisation failed.
    #[serde(rename = "node.crashed")]
    Crashed { error: String },

    /// Bootstrap peering finished (best effort).
    #[serde(rename = "node.bootstrap.completed")]
    BootstrapCompleted { added: usize, skipped: usize },
}

impl NodeEvent {
    /// JSON envelope.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => format!("{{\"type\":\"encode.error\",\"event\":\"{e}\"}}"),
        }
    }
}

/// Destination for node events.
pub trait EventSink: Send + Sync {
    fn send(&self, event: NodeEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: NodeEvent) {}
}

/// Writes events to the log as JSON envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: NodeEvent) {
        info!(envelope = %event.to_json(), "Node event");
    }
}

/// Forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: NodeEvent) {
        if self.tx.send(event).is_err() {
            warn!("Event receiver dropped, discarding node event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let crashed = NodeEvent::Crashed {
            error: "boom".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&crashed.to_json()).unwrap();
        assert_eq!(json["type"], "node.crashed");
        assert_eq!(json["event"]["error"], "boom");

        let json: serde_json::Value =
            serde_json::from_str(&NodeEvent::Started.to_json()).unwrap();
        assert_eq!(json["type"], "node.started");

        let done = NodeEvent::BootstrapCompleted {
            added: 1,
            skipped: 2,
        };
        let json: serde_json::Value = serde_json::from_str(&done.to_json()).unwrap();
        assert_eq!(json["event"]["skipped"], 2);
    }

    #[test]
    fn test_channel_sink() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.send(NodeEvent::Stopped);
        assert_eq!(rx.try_recv().unwrap(), NodeEvent::Stopped);

        drop(rx);
        // Dropped receiver must not panic the sender.
        sink.send(NodeEvent::Started);
    }
}
