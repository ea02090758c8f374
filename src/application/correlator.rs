use super::session::{EventSink, SessionEvent, TerminalSession};
use crate::config::{TerminalConfig, TimeoutPolicy};
use crate::domain::command::{Amount, Command, FunctionCode, SaleRequest, SaleType, Ticket};
use crate::domain::ports::ConnectorBox;
use crate::domain::result::{
    CanonicalResult, ERROR_AMBIGUOUS, ERROR_DUPLICATE_TICKET, field, normalize, text,
};
use crate::error::{Result, TerminalError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do with a response that carries no ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Hand it to the most recently registered candidate. Only sound while a single
    /// command is in flight.
    #[default]
    Lenient,
    /// Hand it over only when exactly one candidate is pending; otherwise fail every
    /// candidate with [`ERROR_AMBIGUOUS`].
    Strict,
}

/// Fixed fields sent with every sale issued through [`RequestCorrelator::sale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleDefaults {
    pub print_on_pos: bool,
    pub sale_type: SaleType,
    pub send_message: bool,
    pub employee_id: u32,
}

impl Default for SaleDefaults {
    fn default() -> Self {
        Self {
            print_on_pos: false,
            sale_type: SaleType::Sale,
            send_message: false,
            employee_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatorOptions {
    pub match_policy: MatchPolicy,
    /// Admit one call at a time, which keeps the engine's single-in-flight rule.
    pub serialize_calls: bool,
    /// Added to the engine's response window to get the correlator's own deadline.
    pub backstop_margin: Duration,
    pub sale_defaults: SaleDefaults,
}

impl Default for CorrelatorOptions {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::Lenient,
            serialize_calls: true,
            backstop_margin: Duration::from_secs(5),
            sale_defaults: SaleDefaults::default(),
        }
    }
}

impl From<&TerminalConfig> for CorrelatorOptions {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            match_policy: if config.strict_match {
                MatchPolicy::Strict
            } else {
                MatchPolicy::Lenient
            },
            serialize_calls: true,
            backstop_margin: config.backstop_margin,
            sale_defaults: SaleDefaults {
                employee_id: config.employee_id,
                ..SaleDefaults::default()
            },
        }
    }
}

struct PendingRequest {
    ticket: Ticket,
    function: FunctionCode,
    /// The command carried this ticket to the terminal, so replies echo it back.
    on_wire: bool,
    created_at: Instant,
    reply: oneshot::Sender<CanonicalResult>,
}

/// Outcome of offering a response payload to the pending table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Ticket),
    /// Several candidates and a strict policy: all of them were failed.
    Ambiguous(Vec<Ticket>),
    Unmatched,
}

/// Pending calls in registration order. Every entry leaves the table exactly once,
/// taking its reply channel with it.
#[derive(Default)]
pub struct PendingTable {
    entries: Vec<PendingRequest>,
}

impl PendingTable {
    /// Registers a call whose command sends `ticket` to the terminal.
    pub fn register(
        &mut self,
        ticket: Ticket,
        function: FunctionCode,
    ) -> Result<oneshot::Receiver<CanonicalResult>> {
        self.insert(ticket, function, true)
    }

    /// Registers a call tracked under a ticket the terminal never sees. Its reply is
    /// matched by fallback even when it carries some other ticket.
    pub fn register_local(
        &mut self,
        ticket: Ticket,
        function: FunctionCode,
    ) -> Result<oneshot::Receiver<CanonicalResult>> {
        self.insert(ticket, function, false)
    }

    fn insert(
        &mut self,
        ticket: Ticket,
        function: FunctionCode,
        on_wire: bool,
    ) -> Result<oneshot::Receiver<CanonicalResult>> {
        if self.contains(&ticket) {
            return Err(TerminalError::DuplicateTicket(ticket.to_string()));
        }
        let (reply, completion) = oneshot::channel();
        self.entries.push(PendingRequest {
            ticket,
            function,
            on_wire,
            created_at: Instant::now(),
            reply,
        });
        Ok(completion)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, ticket: &Ticket) -> bool {
        self.entries.iter().any(|p| &p.ticket == ticket)
    }

    /// Finds the owner of `payload`, normalizes it and completes that call.
    ///
    /// A payload ticket is compared only with tickets that went out on the wire. When
    /// none of them matches, those calls are ruled out and the locally tracked ones
    /// remain as fallback candidates, since reports such as DuplicateOthers echo the
    /// ticket of an earlier sale.
    pub fn resolve(&mut self, payload: &Value, policy: MatchPolicy) -> Resolution {
        let ticket = payload_ticket(payload);
        if let Some(ticket) = &ticket {
            if let Some(index) = self
                .entries
                .iter()
                .position(|p| p.on_wire && &p.ticket == ticket)
            {
                self.complete(index, normalize(payload));
                return Resolution::Resolved(ticket.clone());
            }
        }

        let function = payload_function(payload);
        let candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, p)| ticket.is_none() || !p.on_wire)
            .filter(|(_, p)| function.is_none_or(|f| p.function == f))
            .map(|(index, _)| index)
            .collect();

        match (candidates.as_slice(), policy) {
            ([], _) => Resolution::Unmatched,
            ([index], _) => {
                let ticket = self.entries[*index].ticket.clone();
                self.complete(*index, normalize(payload));
                Resolution::Resolved(ticket)
            }
            ([.., last], MatchPolicy::Lenient) => {
                let ticket = self.entries[*last].ticket.clone();
                self.complete(*last, normalize(payload));
                Resolution::Resolved(ticket)
            }
            (many, MatchPolicy::Strict) => {
                let tickets: Vec<Ticket> = many
                    .iter()
                    .map(|&index| self.entries[index].ticket.clone())
                    .collect();
                for ticket in &tickets {
                    if let Some(index) = self.position(ticket) {
                        self.complete(
                            index,
                            CanonicalResult::failure(
                                ERROR_AMBIGUOUS,
                                "Terminal response could not be matched to a single request",
                                payload.clone(),
                            ),
                        );
                    }
                }
                Resolution::Ambiguous(tickets)
            }
        }
    }

    /// Fails every pending call with `result`, returning how many were failed.
    pub fn fail_all(&mut self, result: CanonicalResult) -> usize {
        let drained: Vec<PendingRequest> = self.entries.drain(..).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.reply.send(result.clone());
        }
        count
    }

    /// Drops the entry for `ticket` without answering it. Returns whether it was
    /// still pending.
    pub fn expire(&mut self, ticket: &Ticket) -> bool {
        match self.position(ticket) {
            Some(index) => {
                let pending = self.entries.remove(index);
                debug!(
                    ticket = %pending.ticket,
                    waited_ms = pending.created_at.elapsed().as_millis() as u64,
                    "Pending request expired"
                );
                true
            }
            None => false,
        }
    }

    fn position(&self, ticket: &Ticket) -> Option<usize> {
        self.entries.iter().position(|p| &p.ticket == ticket)
    }

    fn complete(&mut self, index: usize, result: CanonicalResult) {
        let pending = self.entries.remove(index);
        debug!(
            ticket = %pending.ticket,
            ok = result.ok,
            waited_ms = pending.created_at.elapsed().as_millis() as u64,
            "Completing pending request"
        );
        if pending.reply.send(result).is_err() {
            debug!(ticket = %pending.ticket, "Caller stopped waiting before completion");
        }
    }
}

fn payload_ticket(payload: &Value) -> Option<Ticket> {
    let fields = payload.as_object()?;
    text(fields, "Ticket")
        .or_else(|| text(fields, "TicketNumber"))
        .map(Ticket::from)
}

fn payload_function(payload: &Value) -> Option<FunctionCode> {
    let fields = payload.as_object()?;
    let code = match field(fields, "FunctionCode")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    FunctionCode::from_code(code)
}

/// Turns the session's single event stream into one completion per call.
pub struct RequestCorrelator {
    session: TerminalSession,
    pending: Arc<Mutex<PendingTable>>,
    gate: tokio::sync::Mutex<()>,
    options: CorrelatorOptions,
    local_tickets: AtomicU64,
}

impl RequestCorrelator {
    /// Spawns a session over `connector` and attaches a correlator to it.
    pub fn connect(
        connector: ConnectorBox,
        policy: TimeoutPolicy,
        options: CorrelatorOptions,
    ) -> Self {
        let (events_tx, events_rx): (EventSink, _) = mpsc::unbounded_channel();
        let session = TerminalSession::spawn(connector, policy, events_tx);
        Self::new(session, events_rx, options)
    }

    /// Attaches to an existing session; `events` must be that session's listener.
    pub fn new(
        session: TerminalSession,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        options: CorrelatorOptions,
    ) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        tokio::spawn(route_events(
            events,
            Arc::clone(&pending),
            options.match_policy,
        ));
        Self {
            session,
            pending,
            gate: tokio::sync::Mutex::new(()),
            options,
            local_tickets: AtomicU64::new(1),
        }
    }

    pub fn session(&self) -> &TerminalSession {
        &self.session
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Issues `command` under `ticket` and waits for its result.
    ///
    /// Never fails: transport faults, timeouts and terminal declines all come back as
    /// a [`CanonicalResult`] with `ok == false`.
    pub async fn call(
        &self,
        command: Command,
        ticket: Ticket,
        window: Option<Duration>,
    ) -> CanonicalResult {
        let _turn = if self.options.serialize_calls {
            Some(self.gate.lock().await)
        } else {
            None
        };

        let function = command.function();
        let on_wire = command.ticket() == Some(&ticket);
        let registered = {
            let mut pending = self.pending.lock();
            if on_wire {
                pending.register(ticket.clone(), function)
            } else {
                pending.register_local(ticket.clone(), function)
            }
        };
        let mut completion = match registered {
            Ok(completion) => completion,
            Err(err) => {
                warn!(%ticket, "Rejecting call: {err}");
                return CanonicalResult::failure(
                    ERROR_DUPLICATE_TICKET,
                    err.to_string(),
                    json!({ "error": err.to_string() }),
                );
            }
        };

        let window = self.session.policy().window_for(function, window);
        info!(%ticket, %function, "Issuing terminal command");

        // The backstop covers opening the link and writing as well as the wait.
        let backstop = window + self.options.backstop_margin;
        let exchange = async {
            self.session.dispatch(command, Some(window)).await?;
            Ok::<_, TerminalError>((&mut completion).await)
        };

        let outcome = tokio::time::timeout(backstop, exchange).await;
        match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(_))) => CanonicalResult::sdk_error("pending request was dropped"),
            Ok(Err(err)) => {
                error!(%ticket, "Command could not be sent: {err}");
                self.pending.lock().expire(&ticket);
                CanonicalResult::sdk_error(err.to_string())
            }
            Err(_) => self.give_up(&ticket, completion),
        }
    }

    /// Runs any catalog command. Commands without a wire ticket are tracked under a
    /// local one such as `106-3`, and their responses are matched by fallback.
    pub async fn execute(&self, command: Command, window: Option<Duration>) -> CanonicalResult {
        let ticket = match command.ticket() {
            Some(ticket) => ticket.clone(),
            None => {
                let sequence = self.local_tickets.fetch_add(1, Ordering::Relaxed);
                Ticket::from(format!("{}-{sequence}", command.function().code()))
            }
        };
        self.call(command, ticket, window).await
    }

    /// Validates `amount` and runs a sale with the configured defaults.
    pub async fn sale(&self, amount: i64, ticket: Ticket) -> CanonicalResult {
        self.sale_within(amount, ticket, None).await
    }

    pub async fn sale_within(
        &self,
        amount: i64,
        ticket: Ticket,
        window: Option<Duration>,
    ) -> CanonicalResult {
        match Amount::new(amount) {
            Ok(amount) => self.submit_sale(amount, ticket, window).await,
            Err(err) => CanonicalResult::invalid_amount(err.to_string()),
        }
    }

    /// Runs a sale for an already validated amount.
    pub async fn submit_sale(
        &self,
        amount: Amount,
        ticket: Ticket,
        window: Option<Duration>,
    ) -> CanonicalResult {
        let defaults = self.options.sale_defaults;
        let sale = SaleRequest {
            print_on_pos: defaults.print_on_pos,
            sale_type: defaults.sale_type,
            send_message: defaults.send_message,
            employee_id: defaults.employee_id,
            ..SaleRequest::new(amount, ticket.clone())
        };
        self.call(Command::sale(sale), ticket, window).await
    }

    fn give_up(
        &self,
        ticket: &Ticket,
        mut completion: oneshot::Receiver<CanonicalResult>,
    ) -> CanonicalResult {
        if self.pending.lock().expire(ticket) {
            warn!(%ticket, "Gave up waiting for the terminal response");
            CanonicalResult::sdk_error("Timed out waiting for the terminal response")
        } else {
            // Completed between the deadline and the removal; that result wins.
            completion
                .try_recv()
                .unwrap_or_else(|_| CanonicalResult::sdk_error("pending request was dropped"))
        }
    }
}

async fn route_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    pending: Arc<Mutex<PendingTable>>,
    policy: MatchPolicy,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Acknowledged => debug!("Terminal confirmed reception"),
            SessionEvent::ReceiveTimeout => {
                warn!("Terminal did not confirm reception, still waiting for its response");
            }
            SessionEvent::ResponseTimeout => {
                let failed = pending.lock().fail_all(CanonicalResult::sdk_error(
                    "Timed out waiting for the terminal response",
                ));
                error!(failed, "Terminal response timed out");
            }
            SessionEvent::Response(payload) => {
                let resolution = pending.lock().resolve(&payload, policy);
                match resolution {
                    Resolution::Resolved(ticket) => debug!(%ticket, "Response matched"),
                    Resolution::Ambiguous(tickets) => {
                        warn!(?tickets, "Ambiguous response, failed every candidate");
                    }
                    Resolution::Unmatched => {
                        warn!(%payload, "Response arrived without a pending request");
                    }
                }
            }
        }
    }
    debug!("Session event stream closed");
}
