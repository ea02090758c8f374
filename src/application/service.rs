use super::correlator::{CorrelatorOptions, RequestCorrelator};
use crate::config::{TerminalConfig, TransportKind};
use crate::domain::command::{Amount, Command, Ticket};
use crate::domain::result::CanonicalResult;
use crate::error::{Result, TerminalError};
use crate::infrastructure::connector_from_config;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

static DEFAULT_SERVICE: OnceLock<Arc<PaymentService>> = OnceLock::new();

/// A payment order as received from a point-of-sale front end.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentRequest {
    /// Kept as raw JSON so strings, fractions and negatives can be rejected with
    /// `INVALID_AMOUNT` instead of a parse error.
    pub amount: Value,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub caja_codigo: Option<String>,
    pub cajero: Option<String>,
}

/// Summary of the most recent payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPayment {
    pub ok: bool,
    pub response_code: String,
    pub response_message: String,
    pub ticket_number: Option<String>,
    pub amount: u64,
    pub metadata: PaymentMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: &'static str,
    pub pos_ready: bool,
    pub demo: bool,
    pub last_payment: Option<LastPayment>,
}

/// Payment front door over a [`RequestCorrelator`].
///
/// Every method answers with a [`CanonicalResult`] whatever happens on the wire, so
/// callers only ever branch on `ok`.
pub struct PaymentService {
    correlator: RequestCorrelator,
    next_ticket: AtomicU64,
    sale_timeout: Duration,
    demo: bool,
    ready: AtomicBool,
    init_attempted: AtomicBool,
    last_payment: RwLock<Option<LastPayment>>,
}

impl PaymentService {
    pub fn new(correlator: RequestCorrelator, config: &TerminalConfig) -> Self {
        Self {
            correlator,
            next_ticket: AtomicU64::new(config.starting_ticket),
            sale_timeout: config.sale_timeout,
            demo: config.transport == TransportKind::Demo,
            ready: AtomicBool::new(false),
            init_attempted: AtomicBool::new(false),
            last_payment: RwLock::new(None),
        }
    }

    /// Builds the transport named by `config` and a correlator on top of it.
    ///
    /// Must be called inside a tokio runtime. No connection is opened until the first
    /// command.
    pub fn from_config(config: &TerminalConfig) -> Result<Self> {
        let connector = connector_from_config(config)?;
        let correlator = RequestCorrelator::connect(
            connector,
            config.timeouts,
            CorrelatorOptions::from(config),
        );
        Ok(Self::new(correlator, config))
    }

    /// Makes `service` the process-wide instance returned by [`Self::default_instance`].
    pub fn install_default(service: PaymentService) -> Result<Arc<PaymentService>> {
        let service = Arc::new(service);
        DEFAULT_SERVICE.set(Arc::clone(&service)).map_err(|_| {
            TerminalError::ConfigError("a default payment service is already installed".to_string())
        })?;
        Ok(service)
    }

    pub fn default_instance() -> Option<Arc<PaymentService>> {
        DEFAULT_SERVICE.get().cloned()
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// Polls the terminal and records whether it answered.
    pub async fn init(&self) -> CanonicalResult {
        self.init_attempted.store(true, Ordering::SeqCst);
        info!("Checking terminal connection (Poll)");
        let result = self.correlator.execute(Command::poll(), None).await;
        self.ready.store(result.ok, Ordering::SeqCst);
        if result.ok {
            info!("Terminal is ready");
        } else {
            warn!(code = %result.response_code, "Terminal did not answer the poll: {}", result.response_message);
        }
        result
    }

    /// Validates and charges one payment.
    pub async fn pay(&self, request: PaymentRequest) -> CanonicalResult {
        let amount = match Amount::try_from(&request.amount) {
            Ok(amount) => amount,
            Err(err) => {
                warn!(amount = %request.amount, "Rejecting payment: {err}");
                return CanonicalResult::invalid_amount(err.to_string());
            }
        };

        if let Some(currency) = request.currency.as_deref()
            && currency != "CLP"
        {
            warn!(currency, "Unsupported currency, charging in CLP");
        }

        if !self.init_attempted.load(Ordering::SeqCst) {
            self.init().await;
        }

        let ticket = Ticket::from(self.next_ticket.fetch_add(1, Ordering::SeqCst));
        info!(
            %ticket,
            %amount,
            caja_codigo = request.metadata.caja_codigo.as_deref().unwrap_or("-"),
            "Processing payment"
        );

        let result = self
            .correlator
            .submit_sale(amount, ticket.clone(), Some(self.sale_timeout))
            .await;

        if result.ok {
            info!(%ticket, authorization = ?result.authorization_code, "Payment approved");
            self.ready.store(true, Ordering::SeqCst);
        } else {
            warn!(%ticket, code = %result.response_code, "Payment not approved: {}", result.response_message);
        }

        *self.last_payment.write() = Some(LastPayment {
            ok: result.ok,
            response_code: result.response_code.clone(),
            response_message: result.response_message.clone(),
            ticket_number: Some(ticket.to_string()),
            amount: amount.value(),
            metadata: request.metadata,
            timestamp: Utc::now(),
        });

        result
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "ok",
            pos_ready: self.ready.load(Ordering::SeqCst),
            demo: self.demo,
            last_payment: self.last_payment.read().clone(),
        }
    }
}
