//! Per-bot progress channels consumed by the event stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

type Channels = HashMap<String, broadcast::Sender<String>>;

#[derive(Debug, Clone, Default)]
pub struct UpdateHub {
    channels: Arc<Mutex<Channels>>,
}

impl UpdateHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_channels<R>(&self, f: impl FnOnce(&mut Channels) -> R) -> R {
        let mut guard = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Join the bot's channel, creating it for the first subscriber.
    pub fn subscribe(&self, bot_id: &str) -> broadcast::Receiver<String> {
        self.with_channels(|channels| {
            channels
                .entry(bot_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        })
    }

    /// Deliver `message` to current subscribers. Never blocks; dropped when
    /// nobody listens.
    pub fn publish(&self, bot_id: &str, message: impl Into<String>) {
        let sender = self.with_channels(|channels| channels.get(bot_id).cloned());
        match sender {
            Some(tx) => {
                if tx.send(message.into()).is_err() {
                    debug!(%bot_id, "no listener for update");
                }
            }
            None => debug!(%bot_id, "no channel for update"),
        }
    }

    /// Remove the bot's channel once nobody is subscribed to it.
    pub fn release(&self, bot_id: &str) {
        self.with_channels(|channels| {
            if channels
                .get(bot_id)
                .is_some_and(|tx| tx.receiver_count() == 0)
            {
                channels.remove(bot_id);
                debug!(%bot_id, "released update channel");
            }
        });
    }

    pub fn is_open(&self, bot_id: &str) -> bool {
        self.with_channels(|channels| channels.contains_key(bot_id))
    }

    pub fn len(&self) -> usize {
        self.with_channels(|channels| channels.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let hub = UpdateHub::new();
        let mut rx = hub.subscribe("bot");
        hub.publish("bot", "Imported 1 of 2 campaign records");
        assert_eq!(rx.recv().await.unwrap(), "Imported 1 of 2 campaign records");
    }

    #[test]
    fn publish_without_listener_does_not_block() {
        let hub = UpdateHub::new();
        hub.publish("nobody", "dropped");
        let rx = hub.subscribe("bot");
        drop(rx);
        for i in 0..(CHANNEL_CAPACITY * 4) {
            hub.publish("bot", format!("message {i}"));
        }
        hub.release("bot");
        assert!(hub.is_empty());
    }

    #[test]
    fn release_waits_for_last_subscriber() {
        let hub = UpdateHub::new();
        let rx = hub.subscribe("bot");
        hub.release("bot");
        assert!(hub.is_open("bot"));
        drop(rx);
        hub.release("bot");
        assert!(!hub.is_open("bot"));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag_not_a_stall() {
        let hub = UpdateHub::new();
        let mut rx = hub.subscribe("bot");
        for i in 0..(CHANNEL_CAPACITY + 5) {
            hub.publish("bot", i.to_string());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(5))
        ));
    }
}
