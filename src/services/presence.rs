//! Presence broadcaster
//!
//! Topic-based publish/subscribe for presence and sound-sync events. Each
//! topic gets its own `tokio::sync::broadcast` channel on first use; the
//! transport that forwards events to browsers subscribes here.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::models::{ForceAction, Identity};

pub const TOPIC_PRESENCE: &str = "presence:update";
pub const TOPIC_SOUND_TOGGLE: &str = "session:sound-toggle";
pub const TOPIC_FORCE: &str = "session:force";

const CHANNEL_CAPACITY: usize = 256;

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEvent {
    pub topic: String,
    pub payload: Value,
}

/// Publish/subscribe hub for session events
#[derive(Debug, Default)]
pub struct PresenceBroadcaster {
    topics: RwLock<HashMap<String, broadcast::Sender<PresenceEvent>>>,
}

impl PresenceBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<PresenceEvent> {
        if let Ok(topics) = self.topics.read() {
            if let Some(sender) = topics.get(topic) {
                return sender.clone();
            }
        }
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<PresenceEvent> {
        self.sender_for(topic).subscribe()
    }

    /// Publish `payload` on `topic`; returns how many subscribers got it.
    ///
    /// Nobody listening is not an error.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let event = PresenceEvent {
            topic: topic.to_string(),
            payload,
        };
        self.sender_for(topic).send(event).unwrap_or(0)
    }

    /// `presence:update` with `online: true`
    pub fn online(&self, identity: &Identity, extra: Option<Value>) -> usize {
        self.presence(identity, true, extra)
    }

    /// `presence:update` with `online: false`
    pub fn offline(&self, identity: &Identity) -> usize {
        self.presence(identity, false, None)
    }

    fn presence(&self, identity: &Identity, online: bool, extra: Option<Value>) -> usize {
        let mut payload = json!({
            "identity_id": identity.id,
            "user_type": identity.user_type,
            "display_name": identity.display_name,
            "online": online,
        });
        if let Some(extra) = extra {
            payload["extra"] = extra;
        }
        self.publish(TOPIC_PRESENCE, payload)
    }

    pub fn sound_toggle(&self, identity_id: &str, session_id: &str, muted: bool) -> usize {
        self.publish(
            TOPIC_SOUND_TOGGLE,
            json!({ "identity_id": identity_id, "session_id": session_id, "muted": muted }),
        )
    }

    /// Fast path for a queued force action; the heartbeat stays authoritative
    pub fn force(&self, session_id: &str, action: &ForceAction) -> usize {
        self.publish(
            TOPIC_FORCE,
            json!({
                "session_id": session_id,
                "action": action.action,
                "redirect_to": action.redirect_to,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, UserType};

    fn store() -> Identity {
        Identity::new(
            "store-101".to_string(),
            "acme".to_string(),
            UserType::Location,
            Role::Member,
            "Store 101".to_string(),
            "hash".to_string(),
        )
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broadcaster = PresenceBroadcaster::new();
        assert_eq!(broadcaster.publish("nobody:listens", json!({})), 0);
    }

    #[tokio::test]
    async fn test_online_event_shape() {
        let broadcaster = PresenceBroadcaster::new();
        let mut rx = broadcaster.subscribe(TOPIC_PRESENCE);

        let delivered = broadcaster.online(&store(), Some(json!({ "session_code": "123456" })));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.expect("event");
        assert_eq!(event.topic, TOPIC_PRESENCE);
        assert_eq!(event.payload["identity_id"], "store-101");
        assert_eq!(event.payload["user_type"], "location");
        assert_eq!(event.payload["display_name"], "Store 101");
        assert_eq!(event.payload["online"], true);
        assert_eq!(event.payload["extra"]["session_code"], "123456");
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broadcaster = PresenceBroadcaster::new();
        let mut presence = broadcaster.subscribe(TOPIC_PRESENCE);
        let mut sound = broadcaster.subscribe(TOPIC_SOUND_TOGGLE);

        broadcaster.sound_toggle("store-101", "s-1", true);

        let event = sound.recv().await.expect("sound event");
        assert_eq!(event.payload["muted"], true);
        assert!(presence.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broadcaster = PresenceBroadcaster::new();
        let mut receivers: Vec<_> = (0..3).map(|_| broadcaster.subscribe(TOPIC_FORCE)).collect();

        let delivered = broadcaster.force("s-1", &ForceAction::logout());
        assert_eq!(delivered, 3);

        for rx in receivers.iter_mut() {
            let event = rx.recv().await.expect("force event");
            assert_eq!(event.payload["action"], "logout");
            assert_eq!(event.payload["session_id"], "s-1");
        }
    }

    #[tokio::test]
    async fn test_offline_event() {
        let broadcaster = PresenceBroadcaster::new();
        let mut rx = broadcaster.subscribe(TOPIC_PRESENCE);

        broadcaster.offline(&store());
        let event = rx.recv().await.expect("event");
        assert_eq!(event.payload["online"], false);
        assert!(event.payload.get("extra").is_none());
    }
}
