//! Relay envelope

use courier_common::{EventType, InstanceId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event on its way to a user connected to another instance
///
/// Serialized as JSON text on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub target_user_id: UserId,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
    pub origin_instance: InstanceId,
    /// Monotonic per origin; for diagnostics, not ordering
    pub seq: u64,
}

impl RelayMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let message = RelayMessage {
            target_user_id: UserId::new("u2"),
            event_type: EventType::MessageSend,
            payload: serde_json::json!({"text": "hi"}),
            origin_instance: InstanceId::new("gw-a"),
            seq: 7,
        };

        let json: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["targetUserId"], "u2");
        assert_eq!(json["eventType"], "message-send");
        assert_eq!(json["originInstance"], "gw-a");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["payload"]["text"], "hi");
    }

    #[test]
    fn test_decode_from_other_instance() {
        let raw = r#"{"targetUserId":"u9","eventType":"read-receipt","originInstance":"gw-b","seq":1}"#;
        let message = RelayMessage::from_json(raw).unwrap();
        assert_eq!(message.event_type, EventType::ReadReceipt);
        assert_eq!(message.payload, Value::Null);

        // A peer speaking an unknown event type is treated as malformed
        let raw = r#"{"targetUserId":"u9","eventType":"poke","originInstance":"gw-b","seq":1}"#;
        assert!(RelayMessage::from_json(raw).is_err());

        assert!(RelayMessage::from_json(r#"{"targetUserId":"u9"}"#).is_err());
    }
}
