use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Sentinel for failures that never reached a terminal verdict (timeouts,
/// transport faults, unreadable payloads).
pub const ERROR_SDK: &str = "ERROR_SDK";
pub const INVALID_AMOUNT: &str = "INVALID_AMOUNT";
/// More than one pending call could own a response that carries no ticket.
pub const ERROR_AMBIGUOUS: &str = "ERROR_AMBIGUOUS";
pub const ERROR_DUPLICATE_TICKET: &str = "ERROR_DUPLICATE_TICKET";

/// Normalized success/failure structure handed to every caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    pub ok: bool,
    pub response_code: String,
    pub response_message: String,
    pub authorization_code: Option<String>,
    pub ticket_number: Option<String>,
    pub amount: Option<i64>,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub last4_digits: Option<String>,
    pub terminal_id: Option<String>,
    pub commerce_code: Option<String>,
    pub raw: Value,
}

impl CanonicalResult {
    pub fn failure(code: &str, message: impl Into<String>, raw: Value) -> Self {
        Self {
            ok: false,
            response_code: code.to_string(),
            response_message: message.into(),
            authorization_code: None,
            ticket_number: None,
            amount: None,
            card_brand: None,
            card_type: None,
            last4_digits: None,
            terminal_id: None,
            commerce_code: None,
            raw,
        }
    }

    /// Failure for a call that did not complete, keeping the reason in `raw`.
    pub fn sdk_error(message: impl Into<String>) -> Self {
        let message = message.into();
        let raw = json!({ "error": message });
        Self::failure(
            ERROR_SDK,
            format!("Error communicating with the terminal: {message}"),
            raw,
        )
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::failure(
            INVALID_AMOUNT,
            "Invalid amount. It must be a number greater than 0.",
            json!({ "error": reason }),
        )
    }
}

/// Maps a terminal response payload onto a [`CanonicalResult`].
///
/// `ResponseCode` (any casing) is the only success discriminant: numeric `0` or the
/// string `"0"`. Never fails; unusable payloads become an [`ERROR_SDK`] failure.
pub fn normalize(payload: &Value) -> CanonicalResult {
    let Some(fields) = payload.as_object() else {
        return CanonicalResult::failure(
            ERROR_SDK,
            "Unexpected response payload from the terminal",
            payload.clone(),
        );
    };

    let Some((response_code, ok)) = field(fields, "ResponseCode").and_then(response_code)
    else {
        return CanonicalResult::failure(
            ERROR_SDK,
            "Terminal response carried no usable ResponseCode",
            payload.clone(),
        );
    };

    CanonicalResult {
        ok,
        response_code,
        response_message: text(fields, "ResponseMessage")
            .unwrap_or_else(|| "No message".to_string()),
        authorization_code: text(fields, "AuthorizationCode"),
        ticket_number: text(fields, "Ticket").or_else(|| text(fields, "TicketNumber")),
        amount: field(fields, "Amount").and_then(integer),
        card_brand: text(fields, "CardBrand"),
        card_type: text(fields, "CardType"),
        last4_digits: text(fields, "Last4Digits"),
        terminal_id: text(fields, "TerminalId"),
        commerce_code: text(fields, "CommerceCode"),
        raw: payload.clone(),
    }
}

/// Looks a field up as `PascalCase`, then `camelCase`, then ignoring case.
pub fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(value) = fields.get(name) {
        return Some(value);
    }

    let mut chars = name.chars();
    let camel: String = chars
        .next()
        .map(|first| first.to_lowercase().chain(chars).collect())
        .unwrap_or_default();
    if let Some(value) = fields.get(&camel) {
        return Some(value);
    }

    fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Renders scalars as text, `null` and containers count as absent.
pub fn text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match field(fields, name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn response_code(value: &Value) -> Option<(String, bool)> {
    match value {
        Value::Number(n) => {
            let zero = match n.as_i64() {
                Some(v) => v == 0,
                None => n.as_f64() == Some(0.0),
            };
            Some((n.to_string(), zero))
        }
        Value::String(s) => {
            let code = s.trim();
            if code.is_empty() {
                None
            } else {
                Some((code.to_string(), code == "0"))
            }
        }
        _ => None,
    }
}
