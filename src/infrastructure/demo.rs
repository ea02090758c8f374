use crate::config::DemoSettings;
use crate::domain::command::FunctionCode;
use crate::domain::message::acknowledgement;
use crate::domain::ports::{MessageSink, Transport, TransportBox, TransportConnector};
use crate::domain::signer::SignedEnvelope;
use crate::error::{Result, TerminalError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A simulated terminal for running without hardware.
///
/// It acknowledges every command straight away and answers after a random delay.
/// Sales are approved with the configured probability; every other command succeeds.
pub struct DemoConnector {
    settings: DemoSettings,
    rng: Arc<Mutex<StdRng>>,
}

impl DemoConnector {
    pub fn new(settings: DemoSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            rng: Arc::new(Mutex::new(rng)),
        }
    }
}

#[async_trait]
impl TransportConnector for DemoConnector {
    async fn connect(&self, sink: MessageSink) -> Result<TransportBox> {
        info!(
            approval_rate = self.settings.approval_rate,
            "Using the simulated terminal"
        );
        Ok(Arc::new(DemoTransport {
            settings: self.settings.clone(),
            rng: Arc::clone(&self.rng),
            sink,
        }))
    }

    fn describe(&self) -> String {
        "simulated terminal".to_string()
    }
}

struct DemoTransport {
    settings: DemoSettings,
    rng: Arc<Mutex<StdRng>>,
    sink: MessageSink,
}

impl DemoTransport {
    fn reply_for(&self, command: &Value, rng: &mut StdRng) -> Value {
        let code = command["Command"].as_u64().unwrap_or_default();

        if FunctionCode::from_code(code) != Some(FunctionCode::Sale) {
            return json!({
                "FunctionCode": code,
                "ResponseCode": 0,
                "ResponseMessage": "OK (SIMULADO)",
            });
        }

        let rate = if (0.0..=1.0).contains(&self.settings.approval_rate) {
            self.settings.approval_rate
        } else {
            0.0
        };

        if rng.gen_bool(rate) {
            json!({
                "FunctionCode": code,
                "ResponseCode": 0,
                "ResponseMessage": "Aprobado (SIMULADO)",
                "AuthorizationCode": format!("SIM-{:06}", rng.gen_range(0..1_000_000)),
                "Amount": command["Amount"],
                "Ticket": command["TicketNumber"],
                "CardBrand": "VI",
                "CardType": "CR",
                "Last4Digits": format!("{:04}", rng.gen_range(0..10_000)),
                "TerminalId": "SIM00001",
                "CommerceCode": "597000000000",
            })
        } else {
            json!({
                "FunctionCode": code,
                "ResponseCode": "05",
                "ResponseMessage": "No autorizado (SIMULADO)",
                "Amount": command["Amount"],
                "Ticket": command["TicketNumber"],
            })
        }
    }

    fn delay(&self, rng: &mut StdRng) -> Duration {
        let jitter = self.settings.jitter.as_millis() as u64;
        let extra = if jitter == 0 {
            0
        } else {
            rng.gen_range(0..=jitter)
        };
        self.settings.latency + Duration::from_millis(extra)
    }
}

#[async_trait]
impl Transport for DemoTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let envelope: SignedEnvelope = serde_json::from_slice(bytes)?;
        if !envelope.verify() {
            warn!("Simulated terminal received a command with a bad signature");
        }
        let command: Value = serde_json::from_str(envelope.json_serialized())?;

        self.sink
            .send(acknowledgement())
            .map_err(|_| TerminalError::Transport("simulated terminal is detached".to_string()))?;

        let (delay, reply) = {
            let mut rng = self.rng.lock();
            (self.delay(&mut rng), self.reply_for(&command, &mut rng))
        };
        debug!(delay_ms = delay.as_millis() as u64, %reply, "Simulated terminal answering");

        let sink = self.sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sink.send(json!({ "JsonSerialized": reply.to_string() }));
        });
        Ok(())
    }
}
