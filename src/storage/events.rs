//! Event system for the storage layer.
//!
//! The orchestrator reports its lifecycle (configuration, rehydration, saves) as
//! [`StorageEvent`]s, and every chain store it creates gets a [`ChainEventSink`] that wraps
//! store-level [`ChainEvent`]s with the originating network before publishing them on the same
//! channel. Consumers subscribe through the [`EventDispatcher`]; there is no global listener
//! state, and publishing never blocks or fails when nobody is listening.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notifications raised by a single chain store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainEvent {
    /// A transaction concerning a watched address was seen for the first time.
    RelevantTransaction { txid: String, confirmed: bool },
    /// A relevant transaction is known to be included in a block.
    ConfirmedTransaction { txid: String, height: u64 },
}

/// Events emitted by the storage orchestrator.
///
/// Serializes as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageEvent {
    Configured,
    RehydrateStateSuccess,
    RehydrateStateFailed { error: String },
    SaveStateSuccess,
    SaveStateFailed { error: String },
    /// A chain store notification, tagged with the store's network.
    Chain { network: String, event: ChainEvent },
}

impl StorageEvent {
    /// Stable event name, as used in the serialized `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            StorageEvent::Configured => "CONFIGURED",
            StorageEvent::RehydrateStateSuccess => "REHYDRATE_STATE_SUCCESS",
            StorageEvent::RehydrateStateFailed { .. } => "REHYDRATE_STATE_FAILED",
            StorageEvent::SaveStateSuccess => "SAVE_STATE_SUCCESS",
            StorageEvent::SaveStateFailed { .. } => "SAVE_STATE_FAILED",
            StorageEvent::Chain { .. } => "CHAIN",
        }
    }
}

/// Callback a chain store uses to report its events.
pub type ChainEventSink = Arc<dyn Fn(ChainEvent) + Send + Sync>;

/// Broadcast dispatcher for storage events.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<StorageEvent>,
}

impl EventDispatcher {
    /// Create a new dispatcher with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every event dispatched from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it.
    pub fn dispatch(&self, event: StorageEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for {}", name);
                0
            }
        }
    }

    /// Build the sink handed to the chain store of `network`.
    pub fn chain_sink(&self, network: &str) -> ChainEventSink {
        let dispatcher = self.clone();
        let network = network.to_string();
        Arc::new(move |event| {
            dispatcher.dispatch(StorageEvent::Chain {
                network: network.clone(),
                event,
            });
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chain_sink_attaches_network() {
        let dispatcher = EventDispatcher::new();
        let mut receiver = dispatcher.subscribe();

        let sink = dispatcher.chain_sink("testnet");
        sink(ChainEvent::RelevantTransaction {
            txid: "ab".to_string(),
            confirmed: false,
        });

        let event = receiver.try_recv().expect("event dispatched");
        assert_eq!(
            event,
            StorageEvent::Chain {
                network: "testnet".to_string(),
                event: ChainEvent::RelevantTransaction {
                    txid: "ab".to_string(),
                    confirmed: false,
                },
            }
        );
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.dispatch(StorageEvent::Configured), 0);
    }

    #[test]
    fn test_event_payload_shape() {
        let event = StorageEvent::SaveStateFailed {
            error: "disk full".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serializes"),
            json!({ "type": "SAVE_STATE_FAILED", "payload": { "error": "disk full" } })
        );
        assert_eq!(
            serde_json::to_value(StorageEvent::Configured).expect("serializes"),
            json!({ "type": "CONFIGURED" })
        );
    }
}
