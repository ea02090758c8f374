use crate::config::TimeoutPolicy;
use crate::domain::command::{Amount, Command, CommandRequest, SaleRequest, SaleType};
use crate::domain::message::InboundMessage;
use crate::domain::ports::{ConnectorBox, TransportBox};
use crate::domain::signer;
use crate::error::{Result, TerminalError};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// Where the in-flight command stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sent,
    ReceivedAcked,
    Completed,
    TimedOutReceive,
    TimedOutResponse,
}

/// Notifications delivered to the single caller-facing listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Acknowledged,
    Response(Value),
    ReceiveTimeout,
    ResponseTimeout,
}

pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

struct Dispatch {
    command: Command,
    window: Duration,
    done: oneshot::Sender<Result<()>>,
}

/// Handle to the protocol engine.
///
/// The engine runs as a single task that owns the transport, the two command timers
/// and the phase. Commands are not queued behind each other: dispatching while a
/// command is in flight re-arms the timers for the new one, so callers must keep at
/// most one command outstanding (the request correlator does this).
#[derive(Clone)]
pub struct TerminalSession {
    requests: mpsc::Sender<Dispatch>,
    phase: watch::Receiver<Phase>,
    policy: TimeoutPolicy,
}

impl TerminalSession {
    /// Starts the engine task. The transport is opened lazily by the first command.
    pub fn spawn(connector: ConnectorBox, policy: TimeoutPolicy, listener: EventSink) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(8);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        let actor = SessionActor {
            connector,
            transport: None,
            requests: requests_rx,
            inbound_tx,
            inbound: inbound_rx,
            listener,
            phase: phase_tx,
            policy,
            received_deadline: None,
            response_deadline: None,
        };
        tokio::spawn(actor.run());

        Self {
            requests: requests_tx,
            phase: phase_rx,
            policy,
        }
    }

    /// Signs and writes `command`, arming both timers.
    ///
    /// Resolves once the bytes are handed to the transport; the terminal's answer
    /// arrives later as a [`SessionEvent`].
    pub async fn dispatch(&self, command: Command, window: Option<Duration>) -> Result<()> {
        let window = self.policy.window_for(command.function(), window);
        let (done, outcome) = oneshot::channel();
        self.requests
            .send(Dispatch {
                command,
                window,
                done,
            })
            .await
            .map_err(|_| TerminalError::SessionClosed)?;
        outcome.await.map_err(|_| TerminalError::SessionClosed)?
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub async fn poll(&self) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::Poll), None).await
    }

    pub async fn sale(&self, sale: SaleRequest, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::sale(sale), window).await
    }

    pub async fn last_voucher(&self, print_on_pos: bool, window: Option<Duration>) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::LastVoucher { print_on_pos }),
            window,
        )
        .await
    }

    pub async fn refund(
        &self,
        operation_id: u64,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::Refund {
                operation_id,
                print_on_pos,
            }),
            window,
        )
        .await
    }

    pub async fn close(&self, print_on_pos: bool, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::Close { print_on_pos }), window)
            .await
    }

    pub async fn totals(&self, print_on_pos: bool, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::Totals { print_on_pos }), window)
            .await
    }

    pub async fn details(&self, print_on_pos: bool, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::Details { print_on_pos }), window)
            .await
    }

    pub async fn set_normal_mode(&self, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::SetNormalMode), window)
            .await
    }

    /// Returns (partially or fully) a previous sale identified by its authorization code.
    pub async fn return_sale(
        &self,
        authorization_code: String,
        amount: Amount,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::Return {
                authorization_code,
                amount,
                print_on_pos,
            }),
            window,
        )
        .await
    }

    pub async fn duplicate_others(
        &self,
        operation_id: u64,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::DuplicateOthers {
                operation_id,
                print_on_pos,
            }),
            window,
        )
        .await
    }

    pub async fn sales_by_seller(
        &self,
        employee_id: u32,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::SalesBySeller {
                employee_id,
                print_on_pos,
            }),
            window,
        )
        .await
    }

    pub async fn tip_report(
        &self,
        employee_id: u32,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::TipReport {
                employee_id,
                print_on_pos,
            }),
            window,
        )
        .await
    }

    pub async fn default_sale_type(
        &self,
        sale_type: SaleType,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::DefaultSaleType { sale_type }),
            window,
        )
        .await
    }

    pub async fn parameter_report(
        &self,
        print_on_pos: bool,
        window: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::ParameterReport { print_on_pos }),
            window,
        )
        .await
    }

    pub async fn sim_report(&self, print_on_pos: bool, window: Option<Duration>) -> Result<()> {
        self.dispatch(
            Command::new(CommandRequest::SimReport { print_on_pos }),
            window,
        )
        .await
    }

    pub async fn cancel_sale(&self, window: Option<Duration>) -> Result<()> {
        self.dispatch(Command::new(CommandRequest::CancelSale), window)
            .await
    }
}

struct SessionActor {
    connector: ConnectorBox,
    transport: Option<TransportBox>,
    requests: mpsc::Receiver<Dispatch>,
    // Kept so every transport generation feeds the same inbound queue.
    inbound_tx: mpsc::UnboundedSender<Value>,
    inbound: mpsc::UnboundedReceiver<Value>,
    listener: EventSink,
    phase: watch::Sender<Phase>,
    policy: TimeoutPolicy,
    received_deadline: Option<Instant>,
    response_deadline: Option<Instant>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                request = self.requests.recv() => match request {
                    Some(request) if request.done.is_closed() => {
                        debug!(function = %request.command.function(), "Caller gave up before dispatch, skipping");
                    }
                    Some(request) => {
                        let outcome = self.dispatch(request.command, request.window).await;
                        let _ = request.done.send(outcome);
                    }
                    None => break,
                },
                Some(message) = self.inbound.recv() => self.on_message(message),
                _ = wait_until(self.response_deadline) => self.on_response_timeout(),
                _ = wait_until(self.received_deadline) => self.on_received_timeout(),
            }
        }
        debug!("Terminal session stopped");
    }

    fn current(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "Session phase changed");
        }
    }

    fn disarm(&mut self) {
        self.received_deadline = None;
        self.response_deadline = None;
    }

    fn emit(&self, event: SessionEvent) {
        if self.listener.send(event).is_err() {
            debug!("Session listener is gone, dropping event");
        }
    }

    async fn dispatch(&mut self, command: Command, window: Duration) -> Result<()> {
        if matches!(self.current(), Phase::Sent | Phase::ReceivedAcked) {
            warn!(
                function = %command.function(),
                "Dispatching while another command is in flight, its timers are replaced"
            );
        }

        let envelope = signer::sign(&command)?;
        let bytes = envelope.to_bytes()?;

        let transport = match self.ensure_transport().await {
            Ok(transport) => transport,
            Err(err) => {
                error!("Failed to open terminal transport: {err}");
                self.disarm();
                self.set_phase(Phase::Idle);
                return Err(err);
            }
        };

        let now = Instant::now();
        self.received_deadline = Some(now + self.policy.received);
        self.response_deadline = Some(now + window);
        self.set_phase(Phase::Sent);

        debug!(
            function = %command.function(),
            window_secs = window.as_secs(),
            request = envelope.json_serialized(),
            "Sending command"
        );

        if let Err(err) = transport.send(&bytes).await {
            error!(function = %command.function(), "Failed to write command: {err}");
            self.disarm();
            self.set_phase(Phase::Idle);
            return Err(err);
        }

        Ok(())
    }

    async fn ensure_transport(&mut self) -> Result<TransportBox> {
        if let Some(transport) = &self.transport {
            if transport.is_connected() {
                return Ok(transport.clone());
            }
            info!("Terminal link was lost, reconnecting");
            self.transport = None;
        }

        // Bounded by the shortest response window so a dead link cannot hold the engine.
        let link = self.connector.describe();
        info!(%link, "Opening terminal transport");
        let transport = tokio::time::timeout(
            self.policy.min,
            self.connector.connect(self.inbound_tx.clone()),
        )
        .await
        .map_err(|_| {
            TerminalError::Transport(format!(
                "opening {link} did not finish within {}s",
                self.policy.min.as_secs()
            ))
        })??;
        self.transport = Some(transport.clone());
        Ok(transport)
    }

    fn on_message(&mut self, message: Value) {
        match InboundMessage::classify(message) {
            InboundMessage::Acknowledgement => {
                self.received_deadline = None;
                if matches!(self.current(), Phase::Sent | Phase::TimedOutReceive) {
                    self.set_phase(Phase::ReceivedAcked);
                }
                debug!("Terminal acknowledged the command");
                self.emit(SessionEvent::Acknowledged);
            }
            InboundMessage::FinalPayload(payload) => {
                self.response_deadline = None;
                if matches!(
                    self.current(),
                    Phase::Sent | Phase::ReceivedAcked | Phase::TimedOutReceive
                ) {
                    self.set_phase(Phase::Completed);
                } else {
                    debug!(phase = ?self.current(), "Response arrived with no command in flight");
                }
                debug!(%payload, "Terminal response");
                self.emit(SessionEvent::Response(payload));
            }
            InboundMessage::Malformed { embedded, reason } => {
                self.response_deadline = None;
                if matches!(
                    self.current(),
                    Phase::Sent | Phase::ReceivedAcked | Phase::TimedOutReceive
                ) {
                    self.set_phase(Phase::Completed);
                }
                error!(%embedded, "Dropping unparseable terminal response: {reason}");
            }
            InboundMessage::Unrecognized(value) => {
                warn!(%value, "Dropping unrecognized terminal message");
            }
        }
    }

    fn on_received_timeout(&mut self) {
        self.received_deadline = None;
        if self.current() == Phase::Sent {
            warn!(
                window_secs = self.policy.received.as_secs(),
                "Terminal did not acknowledge the command in time"
            );
            self.set_phase(Phase::TimedOutReceive);
            self.emit(SessionEvent::ReceiveTimeout);
        } else {
            debug!(phase = ?self.current(), "Receive window elapsed after the command moved on");
        }
    }

    fn on_response_timeout(&mut self) {
        self.disarm();
        error!("Timed out waiting for the terminal response");
        self.set_phase(Phase::TimedOutResponse);
        self.emit(SessionEvent::ResponseTimeout);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::{InMemoryConnector, InMemoryTerminal};
    use serde_json::json;
    use std::sync::Arc;

    fn start() -> (
        TerminalSession,
        InMemoryTerminal,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (connector, terminal) = InMemoryConnector::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session =
            TerminalSession::spawn(Arc::new(connector), TimeoutPolicy::default(), events_tx);
        (session, terminal, events_rx)
    }

    fn assert_elapsed(started: Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "elapsed {elapsed:?}, expected about {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_then_final_walks_the_phases() {
        let (session, terminal, mut events) = start();
        assert_eq!(session.phase(), Phase::Idle);

        session.poll().await.unwrap();
        assert_eq!(session.phase(), Phase::Sent);
        assert_eq!(terminal.sent_commands().len(), 1);

        terminal.reply(json!({"Received": true}));
        assert_eq!(events.recv().await, Some(SessionEvent::Acknowledged));
        assert_eq!(session.phase(), Phase::ReceivedAcked);

        terminal.reply(json!({"JsonSerialized": "{\"ResponseCode\":0,\"FunctionCode\":106}"}));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Response(
                json!({"ResponseCode": 0, "FunctionCode": 106})
            ))
        );
        assert_eq!(session.phase(), Phase::Completed);

        // Both timers are disarmed: nothing fires later.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(session.phase(), Phase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_receive_then_response() {
        let (session, _terminal, mut events) = start();
        let started = Instant::now();

        session.poll().await.unwrap();

        assert_eq!(events.recv().await, Some(SessionEvent::ReceiveTimeout));
        assert_elapsed(started, Duration::from_secs(3));
        assert_eq!(session.phase(), Phase::TimedOutReceive);

        assert_eq!(events.recv().await, Some(SessionEvent::ResponseTimeout));
        assert_elapsed(started, Duration::from_secs(10));
        assert_eq!(session.phase(), Phase::TimedOutResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_before_ack_does_not_double_cancel() {
        let (session, terminal, mut events) = start();
        session.poll().await.unwrap();

        terminal.reply(json!({"JsonSerialized": "{\"ResponseCode\":0}"}));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Response(_))
        ));
        terminal.reply(json!({"Received": true}));
        assert_eq!(events.recv().await, Some(SessionEvent::Acknowledged));
        assert_eq!(session.phase(), Phase::Completed);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_without_ack_keeps_quiet_after_receive_window() {
        let (session, terminal, mut events) = start();
        session.poll().await.unwrap();

        terminal.reply(json!({"JsonSerialized": "{\"ResponseCode\":0}"}));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Response(_))
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(session.phase(), Phase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped() {
        let (session, terminal, mut events) = start();
        session.poll().await.unwrap();

        terminal.reply(json!({"Received": true}));
        assert_eq!(events.recv().await, Some(SessionEvent::Acknowledged));
        terminal.reply(json!({"JsonSerialized": "{oops"}));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_is_opened_once_and_reused() {
        let (session, terminal, _events) = start();
        session.poll().await.unwrap();
        session.totals(false, None).await.unwrap();
        session.cancel_sale(None).await.unwrap();

        assert_eq!(terminal.connect_count(), 1);
        assert_eq!(terminal.sent_commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_transport_is_replaced() {
        let (session, terminal, _events) = start();
        session.poll().await.unwrap();

        terminal.disconnect();
        session.poll().await.unwrap();

        assert_eq!(terminal.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_returns_to_idle() {
        let (session, terminal, mut events) = start();
        terminal.fail_sends(true);

        let result = session.poll().await;
        assert!(matches!(result, Err(TerminalError::Transport(_))));
        assert_eq!(session.phase(), Phase::Idle);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_open_fails_after_the_shortest_window() {
        let (session, terminal, _events) = start();
        terminal.stall_connects(true);
        let started = Instant::now();

        let result = session.poll().await;

        assert!(matches!(result, Err(TerminalError::Transport(_))));
        assert_elapsed(started, Duration::from_secs(10));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(terminal.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sale_window_is_honored() {
        let (session, terminal, mut events) = start();
        let started = Instant::now();

        let sale = SaleRequest::new(Amount::new(1000).unwrap(), 7.into());
        session
            .sale(sale, Some(Duration::from_secs(45)))
            .await
            .unwrap();
        terminal.reply(json!({"Received": true}));
        assert_eq!(events.recv().await, Some(SessionEvent::Acknowledged));

        assert_eq!(events.recv().await, Some(SessionEvent::ResponseTimeout));
        assert_elapsed(started, Duration::from_secs(45));

        let sent = terminal.sent_commands();
        assert_eq!(sent[0]["Command"], 100);
        assert_eq!(sent[0]["TicketNumber"], "7");
    }
}
