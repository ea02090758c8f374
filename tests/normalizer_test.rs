use getnet_pos::domain::result::{ERROR_SDK, normalize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};

const FIELDS: [&str; 8] = [
    "ResponseMessage",
    "AuthorizationCode",
    "Amount",
    "CardBrand",
    "CardType",
    "Last4Digits",
    "TerminalId",
    "CommerceCode",
];

fn camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn random_code(rng: &mut StdRng) -> (Value, bool) {
    match rng.gen_range(0..5) {
        0 => (json!(0), true),
        1 => (json!("0"), true),
        2 => {
            let code = rng.gen_range(1..100);
            (json!(code), false)
        }
        3 => (json!(format!("{:02}", rng.gen_range(1..100))), false),
        _ => (json!("TO"), false),
    }
}

#[test]
fn test_success_depends_only_on_response_code() {
    let mut rng = StdRng::seed_from_u64(0x6e7e);

    for _ in 0..500 {
        let (code, expected_ok) = random_code(&mut rng);
        let mut payload = Map::new();
        let code_key = if rng.gen_bool(0.5) {
            "ResponseCode".to_string()
        } else {
            camel("ResponseCode")
        };
        payload.insert(code_key, code.clone());

        for field in FIELDS {
            if rng.gen_bool(0.5) {
                let key = if rng.gen_bool(0.5) {
                    field.to_string()
                } else {
                    camel(field)
                };
                let value = if field == "Amount" {
                    json!(rng.gen_range(1..1_000_000))
                } else {
                    json!(format!("v{}", rng.gen_range(0..1000)))
                };
                payload.insert(key, value);
            }
        }

        let payload = Value::Object(payload);
        let result = normalize(&payload);

        assert_eq!(result.ok, expected_ok, "{payload}");
        assert_eq!(result.raw, payload);
        match &code {
            Value::String(s) => assert_eq!(&result.response_code, s),
            other => assert_eq!(result.response_code, other.to_string()),
        }
        if payload.get("ResponseMessage").is_none() && payload.get("responseMessage").is_none() {
            assert_eq!(result.response_message, "No message");
        }
        let amount = payload
            .get("Amount")
            .or_else(|| payload.get("amount"))
            .and_then(Value::as_i64);
        assert_eq!(result.amount, amount);
    }
}

#[test]
fn test_unusable_payloads_become_sdk_errors() {
    for payload in [json!(null), json!([1, 2]), json!("0"), json!({}), json!({"ResponseCode": null})] {
        let result = normalize(&payload);
        assert!(!result.ok, "{payload}");
        assert_eq!(result.response_code, ERROR_SDK);
        assert_eq!(result.raw, payload);
    }
}
