#![allow(dead_code)]

use getnet_pos::application::correlator::{CorrelatorOptions, RequestCorrelator};
use getnet_pos::config::TimeoutPolicy;
use getnet_pos::infrastructure::in_memory::{InMemoryConnector, InMemoryTerminal};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub fn correlator(options: CorrelatorOptions) -> (Arc<RequestCorrelator>, InMemoryTerminal) {
    let (connector, terminal) = InMemoryConnector::new();
    let correlator = RequestCorrelator::connect(Arc::new(connector), TimeoutPolicy::default(), options);
    (Arc::new(correlator), terminal)
}

pub fn concurrent_options() -> CorrelatorOptions {
    CorrelatorOptions {
        serialize_calls: false,
        ..CorrelatorOptions::default()
    }
}

pub fn ack() -> Value {
    json!({"Received": true})
}

/// Wraps `payload` the way the terminal delivers a final response.
pub fn final_response(payload: Value) -> Value {
    json!({"JsonSerialized": payload.to_string()})
}

pub fn approved(ticket: &Value) -> Value {
    let label = match ticket {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    final_response(json!({
        "FunctionCode": 100,
        "ResponseCode": 0,
        "ResponseMessage": "Aprobado",
        "AuthorizationCode": format!("AUTH-{label}"),
        "Ticket": ticket,
    }))
}

pub fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );
}
