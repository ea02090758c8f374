use super::command::Command;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Signed transport envelope: the serialized command plus the uppercase hex
/// SHA-256 of exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedEnvelope {
    json_serialized: String,
    sign: String,
}

impl SignedEnvelope {
    pub fn json_serialized(&self) -> &str {
        &self.json_serialized
    }

    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// Whether `sign` matches the serialized command.
    pub fn verify(&self) -> bool {
        digest(&self.json_serialized) == self.sign
    }

    /// Wire form, written verbatim to the transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Serializes `command` and signs the resulting bytes.
pub fn sign(command: &Command) -> Result<SignedEnvelope> {
    let json_serialized = serde_json::to_string(command)?;
    let sign = digest(&json_serialized);
    Ok(SignedEnvelope {
        json_serialized,
        sign,
    })
}

pub fn digest(payload: &str) -> String {
    hex::encode_upper(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::{Amount, CommandRequest, SaleRequest, Ticket};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_digest_known_vector() {
        assert_eq!(
            digest("abc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_sign_covers_serialized_command() {
        let command = Command::at(
            CommandRequest::Sale(SaleRequest::new(
                Amount::new(15000).unwrap(),
                Ticket::from(1),
            )),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );

        let envelope = sign(&command).unwrap();
        assert_eq!(
            envelope.json_serialized(),
            serde_json::to_string(&command).unwrap()
        );
        assert_eq!(envelope.sign(), digest(envelope.json_serialized()));
        assert_eq!(envelope.sign().len(), 64);
        assert!(
            envelope
                .sign()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn test_envelope_wire_shape() {
        let command = Command::at(
            CommandRequest::Poll,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        let envelope = sign(&command).unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(
            wire["JsonSerialized"],
            r#"{"Command":106,"DateTime":"2025-01-01T00:00:00.000Z"}"#
        );
        assert_eq!(wire["Sign"], envelope.sign());
        assert_eq!(wire.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let command = Command::at(
            CommandRequest::Close { print_on_pos: true },
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        );
        assert_eq!(sign(&command).unwrap(), sign(&command).unwrap());
    }

    #[test]
    fn test_tampered_envelope_fails_verification() {
        let envelope = sign(&Command::poll()).unwrap();
        assert!(envelope.verify());

        let tampered: SignedEnvelope = serde_json::from_value(serde_json::json!({
            "JsonSerialized": envelope.json_serialized().replace("106", "100"),
            "Sign": envelope.sign(),
        }))
        .unwrap();
        assert!(!tampered.verify());
    }
}
