//! Inbound updates and bot identity.
//!
//! An [`Update`] is one event from the remote platform. Every update carries
//! a numeric `update_id` and exactly one payload field whose key names the
//! update kind (`message`, `callback_query`, ...). The payload shape differs
//! per kind, so it is kept as raw JSON and read through small accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Update kinds that carry a message-like payload.
pub const MESSAGE_KINDS: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
    "business_message",
    "edited_business_message",
];

/// One event emitted by the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing identifier, unique per source.
    pub update_id: i64,

    /// The payload, keyed by update kind.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Update {
    /// Creates an update with a single payload of the given kind.
    pub fn new(update_id: i64, kind: impl Into<String>, payload: Value) -> Self {
        let mut map = Map::new();
        map.insert(kind.into(), payload);
        Self {
            update_id,
            payload: map,
        }
    }

    /// Returns the update kind, i.e. the key of the payload field.
    pub fn kind(&self) -> Option<&str> {
        self.payload.keys().next().map(String::as_str)
    }

    /// Returns the payload of the given kind, if this update is of that kind.
    pub fn get(&self, kind: &str) -> Option<&Value> {
        self.payload.get(kind)
    }

    /// Returns the message-like payload (message, channel post, edits).
    pub fn message(&self) -> Option<&Value> {
        MESSAGE_KINDS.iter().find_map(|k| self.payload.get(*k))
    }

    /// Returns the message text, falling back to its caption.
    pub fn text(&self) -> Option<&str> {
        let msg = self.message()?;
        msg.get("text")
            .or_else(|| msg.get("caption"))
            .and_then(Value::as_str)
    }

    /// Returns the chat the update belongs to, wherever the kind keeps it.
    pub fn chat(&self) -> Option<&Value> {
        if let Some(msg) = self.message() {
            return msg.get("chat");
        }
        for kind in [
            "my_chat_member",
            "chat_member",
            "chat_join_request",
            "message_reaction",
            "message_reaction_count",
            "chat_boost",
            "removed_chat_boost",
        ] {
            if let Some(chat) = self.payload.get(kind).and_then(|p| p.get("chat")) {
                return Some(chat);
            }
        }
        self.payload
            .get("callback_query")
            .and_then(|q| q.get("message"))
            .and_then(|m| m.get("chat"))
    }

    /// Returns the chat type (`private`, `group`, `supergroup`, `channel`).
    pub fn chat_type(&self) -> Option<&str> {
        self.chat()
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
    }

    /// Returns the user who caused the update, if any.
    pub fn from(&self) -> Option<&Value> {
        if let Some(msg) = self.message() {
            return msg.get("from");
        }
        self.payload
            .values()
            .next()
            .and_then(|p| p.get("from").or_else(|| p.get("user")))
    }
}

/// Identity of the bot account, as returned by the initialization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInfo {
    /// Numeric account identifier.
    pub id: i64,
    /// Always `true` for bot accounts.
    #[serde(default)]
    pub is_bot: bool,
    /// Display name.
    pub first_name: String,
    /// Username without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_update() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 42,
            "message": {
                "message_id": 1,
                "chat": { "id": 7, "type": "private" },
                "from": { "id": 9, "first_name": "Ada" },
                "text": "hello"
            }
        }))
        .unwrap();

        assert_eq!(update.update_id, 42);
        assert_eq!(update.kind(), Some("message"));
        assert_eq!(update.text(), Some("hello"));
        assert_eq!(update.chat_type(), Some("private"));
        assert_eq!(update.from().and_then(|u| u.get("id")), Some(&json!(9)));
    }

    #[test]
    fn test_caption_used_as_text() {
        let update = Update::new(
            1,
            "channel_post",
            json!({ "chat": { "id": 1, "type": "channel" }, "caption": "photo!" }),
        );
        assert_eq!(update.text(), Some("photo!"));
    }

    #[test]
    fn test_callback_query_chat() {
        let update = Update::new(
            2,
            "callback_query",
            json!({
                "id": "q",
                "from": { "id": 3 },
                "data": "yes",
                "message": { "chat": { "id": 5, "type": "group" } }
            }),
        );
        assert!(update.message().is_none());
        assert_eq!(update.chat_type(), Some("group"));
        assert_eq!(update.from().and_then(|u| u.get("id")), Some(&json!(3)));
    }
}
