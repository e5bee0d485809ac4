use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single record appended to a topic's capped collection.
///
/// Notes:
/// - **Immutable**: once appended, a message is a fact.
/// - **Ordering** is the collection's append order; `id` is time-ordered
///   (UUIDv7) but is not the ordering authority across processes.
/// - `data` is an arbitrary JSON payload; no schema is enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    event: String,
    data: JsonValue,
    published_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message stamped with a fresh id and the current time.
    pub fn new(event: impl Into<String>, data: JsonValue) -> Self {
        Self {
            id: Uuid::now_v7(),
            event: event.into(),
            data,
            published_at: Utc::now(),
        }
    }

    /// Rebuild a message from stored parts (used by storage adapters).
    pub fn from_parts(
        id: Uuid,
        event: impl Into<String>,
        data: JsonValue,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event: event.into(),
            data,
            published_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn into_parts(self) -> (String, JsonValue) {
        (self.event, self.data)
    }
}

/// Acknowledgement that a message was durably appended.
///
/// It says nothing about delivery: subscribers read the shared log on their own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub message_id: Uuid,
    pub published_at: DateTime<Utc>,
}

impl From<&Message> for PublishAck {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            published_at: message.published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_event_and_data() {
        let msg = Message::new("order.created", serde_json::json!({ "id": 7 }));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["event"], "order.created");
        assert_eq!(value["data"]["id"], 7);
        assert!(value.get("published_at").is_some());
    }

    #[test]
    fn ack_carries_message_identity() {
        let msg = Message::new("EOT", serde_json::json!({}));
        let ack = PublishAck::from(&msg);

        assert_eq!(ack.message_id, msg.id());
        assert_eq!(ack.published_at, msg.published_at());
    }
}
