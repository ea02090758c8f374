use serde_json::{Value, json};

/// A JSON document delivered by the terminal, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `{"Received": true}`: the bytes arrived, the result is still pending.
    Acknowledgement,
    /// The command-specific response, already unwrapped from `JsonSerialized`.
    FinalPayload(Value),
    /// `JsonSerialized` was present but did not contain valid JSON.
    Malformed { embedded: String, reason: String },
    /// Anything that is not a JSON object.
    Unrecognized(Value),
}

impl InboundMessage {
    pub fn classify(message: Value) -> Self {
        let Value::Object(mut fields) = message else {
            return InboundMessage::Unrecognized(message);
        };

        if fields.get("Received").and_then(Value::as_bool) == Some(true) {
            return InboundMessage::Acknowledgement;
        }

        match fields.remove("JsonSerialized") {
            Some(Value::String(embedded)) => match serde_json::from_str(&embedded) {
                Ok(payload) => InboundMessage::FinalPayload(payload),
                Err(err) => InboundMessage::Malformed {
                    embedded,
                    reason: err.to_string(),
                },
            },
            Some(payload @ Value::Object(_)) => InboundMessage::FinalPayload(payload),
            Some(other) => {
                fields.insert("JsonSerialized".to_string(), other);
                InboundMessage::FinalPayload(Value::Object(fields))
            }
            // Some firmwares answer with the bare response object.
            None => InboundMessage::FinalPayload(Value::Object(fields)),
        }
    }

    pub fn is_acknowledgement(message: &Value) -> bool {
        message.get("Received").and_then(Value::as_bool) == Some(true)
    }
}

/// The liveness acknowledgement written back to the terminal.
pub fn acknowledgement() -> Value {
    json!({ "Received": true })
}
