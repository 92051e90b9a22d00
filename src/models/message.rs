//! Inbound frame classification and hub notices

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::ConnectionId;
use crate::error::FanoutError;

/// A client frame, classified once at the socket boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// JSON object addressed to a single connection
    Structured { target: ConnectionId, body: String },
    /// Anything else, relayed verbatim
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "target")]
    user_id: String,
}

impl Payload {
    /// Classify a text frame. Never fails: unrecognised frames become `Plain`.
    pub fn from_frame(text: &str) -> Self {
        match Self::classify(text) {
            Ok(payload) => payload,
            Err(reason) => {
                debug!("Relaying frame verbatim: {}", reason);
                Payload::Plain(text.to_string())
            }
        }
    }

    /// Try to read `text` as a structured message, explaining why when it is not one
    pub fn classify(text: &str) -> Result<Self, FanoutError> {
        let object: Map<String, Value> = serde_json::from_str(text)
            .map_err(|e| FanoutError::MalformedMessage(format!("not a JSON object: {}", e)))?;

        let envelope: Envelope = serde_json::from_value(Value::Object(object.clone()))
            .map_err(|e| FanoutError::MalformedMessage(format!("no recipient: {}", e)))?;

        if envelope.user_id.trim().is_empty() {
            return Err(FanoutError::MalformedMessage("empty recipient".into()));
        }

        Ok(Payload::Structured {
            target: ConnectionId::from(envelope.user_id),
            body: Value::Object(object).to_string(),
        })
    }
}

/// Text notices the hub sends on its own behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Joined(ConnectionId),
    Left(ConnectionId),
    RecipientNotFound(ConnectionId),
}

impl Notice {
    pub fn render(&self) -> String {
        match self {
            Notice::Joined(id) => format!("User {} connected", id),
            Notice::Left(id) => format!("User {} disconnected", id),
            Notice::RecipientNotFound(id) => format!("Recipient {} not found", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_structured(frame: &str) -> bool {
        matches!(Payload::from_frame(frame), Payload::Structured { .. })
    }

    #[test]
    fn test_plain_text_is_plain() {
        assert_eq!(
            Payload::from_frame("hello everyone"),
            Payload::Plain("hello everyone".to_string())
        );
    }

    #[test]
    fn test_object_with_user_id_is_structured() {
        let payload = Payload::from_frame(r#"{"user_id": "abc", "text": "hi"}"#);
        match payload {
            Payload::Structured { target, body } => {
                assert_eq!(target.as_str(), "abc");
                let value: Value = serde_json::from_str(&body).unwrap();
                assert_eq!(value["text"], "hi");
                assert_eq!(value["user_id"], "abc");
            }
            other => panic!("expected structured payload, got {:?}", other),
        }
    }

    #[test]
    fn test_target_alias_is_accepted() {
        assert!(is_structured(r#"{"target": "abc"}"#));
    }

    #[test]
    fn test_brace_shaped_garbage_falls_back_to_plain() {
        let frame = "{not json}";
        assert_eq!(Payload::from_frame(frame), Payload::Plain(frame.to_string()));
        assert!(matches!(
            Payload::classify(frame),
            Err(FanoutError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_object_without_recipient_falls_back_to_plain() {
        let frame = r#"{"text": "hi"}"#;
        assert_eq!(Payload::from_frame(frame), Payload::Plain(frame.to_string()));
        assert!(!is_structured(r#"{"user_id": 7}"#));
        assert!(!is_structured(r#"{"user_id": "  "}"#));
    }

    #[test]
    fn test_json_array_is_plain() {
        assert!(!is_structured(r#"[{"user_id": "abc"}]"#));
    }

    #[test]
    fn test_notice_text() {
        let id = ConnectionId::from("a1");
        assert_eq!(Notice::Joined(id.clone()).render(), "User a1 connected");
        assert_eq!(Notice::Left(id.clone()).render(), "User a1 disconnected");
        assert_eq!(
            Notice::RecipientNotFound(id).render(),
            "Recipient a1 not found"
        );
    }
}
