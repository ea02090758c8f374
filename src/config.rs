use crate::domain::command::{FunctionCode, WindowClass};
use crate::error::{Result, TerminalError};
use clap::{Args, ValueEnum};
use std::time::Duration;

/// Window for the hardware acknowledgement after a command is written.
pub const RECEIVED_TIMEOUT_SECS: u64 = 3;
pub const MIN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// USB/serial link (device path + baud rate)
    Serial,
    /// TCP link to the terminal
    Ip,
    /// Simulated terminal, no hardware involved
    Demo,
}

/// The two timer windows the terminal session arms for every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub received: Duration,
    pub min: Duration,
    pub standard: Duration,
    pub max: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            received: Duration::from_secs(RECEIVED_TIMEOUT_SECS),
            min: Duration::from_secs(MIN_TIMEOUT_SECS),
            standard: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max: Duration::from_secs(MAX_TIMEOUT_SECS),
        }
    }
}

impl TimeoutPolicy {
    /// Response window for `function`; a requested window is clamped to `[min, max]`.
    pub fn window_for(&self, function: FunctionCode, requested: Option<Duration>) -> Duration {
        match requested {
            Some(window) => window.clamp(self.min, self.max),
            None => match function.window_class() {
                WindowClass::Short => self.min,
                WindowClass::Standard => self.standard,
                WindowClass::Long => self.max,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(TerminalError::ConfigError(
                "minimum response window exceeds the maximum".to_string(),
            ));
        }
        if self.received.is_zero() {
            return Err(TerminalError::ConfigError(
                "received window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoSettings {
    /// Probability in `0..=1` that a simulated sale is approved.
    pub approval_rate: f64,
    pub latency: Duration,
    pub jitter: Duration,
    pub seed: Option<u64>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            approval_rate: 0.8,
            latency: Duration::from_millis(1000),
            jitter: Duration::from_millis(2000),
            seed: None,
        }
    }
}

/// Everything the terminal client needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalConfig {
    pub transport: TransportKind,
    pub serial_path: String,
    pub baud_rate: u32,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeouts: TimeoutPolicy,
    /// Response window requested for sales.
    pub sale_timeout: Duration,
    pub employee_id: u32,
    pub starting_ticket: u64,
    /// How much longer than the engine window the correlator waits before giving up.
    pub backstop_margin: Duration,
    pub strict_match: bool,
    pub demo: DemoSettings,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            serial_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            host: None,
            port: None,
            timeouts: TimeoutPolicy::default(),
            sale_timeout: Duration::from_secs(MAX_TIMEOUT_SECS),
            employee_id: 1,
            starting_ticket: 1,
            backstop_margin: Duration::from_secs(5),
            strict_match: false,
            demo: DemoSettings::default(),
        }
    }
}

/// Terminal settings, taken from flags or `GETNET_*` environment variables.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Transport used to reach the terminal
    #[arg(long, env = "GETNET_TRANSPORT", value_enum, default_value_t = TransportKind::Serial)]
    pub transport: TransportKind,

    /// Use the simulated terminal whatever --transport says
    #[arg(long, env = "GETNET_DEMO")]
    pub demo: bool,

    /// Serial device path
    #[arg(long, env = "GETNET_COM_PORT", default_value = "/dev/ttyUSB0")]
    pub com_port: String,

    /// Serial baud rate
    #[arg(long, env = "GETNET_BAUDRATE", default_value_t = 9600)]
    pub baud_rate: u32,

    /// Terminal host for the IP transport
    #[arg(long, env = "GETNET_POS_IP")]
    pub pos_ip: Option<String>,

    /// Terminal port for the IP transport
    #[arg(long, env = "GETNET_POS_PORT")]
    pub pos_port: Option<u16>,

    /// Response window for sales, in seconds
    #[arg(long, env = "GETNET_TIMEOUT", default_value_t = MAX_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Employee id sent with sales
    #[arg(long, env = "GETNET_EMPLOYEE_ID", default_value_t = 1)]
    pub employee_id: u32,

    /// First ticket number handed out by the payment service
    #[arg(long, env = "GETNET_START_TICKET", default_value_t = 1)]
    pub start_ticket: u64,

    /// Extra seconds the correlator waits past the engine's response window
    #[arg(long, env = "GETNET_BACKSTOP_MARGIN", default_value_t = 5)]
    pub backstop_margin_secs: u64,

    /// Refuse to guess the owner of a ticketless response when several calls are pending
    #[arg(long, env = "GETNET_STRICT_MATCH")]
    pub strict_match: bool,

    /// Approval probability of the simulated terminal
    #[arg(long, env = "GETNET_DEMO_APPROVAL_RATE", default_value_t = 0.8)]
    pub demo_approval_rate: f64,

    /// Minimum simulated reply latency, in milliseconds
    #[arg(long, env = "GETNET_DEMO_LATENCY_MS", default_value_t = 1000)]
    pub demo_latency_ms: u64,

    /// Random latency added on top of the minimum, in milliseconds
    #[arg(long, env = "GETNET_DEMO_JITTER_MS", default_value_t = 2000)]
    pub demo_jitter_ms: u64,

    /// Seed for the simulated terminal
    #[arg(long, env = "GETNET_DEMO_SEED")]
    pub demo_seed: Option<u64>,
}

impl ConfigArgs {
    pub fn into_config(self) -> Result<TerminalConfig> {
        let transport = if self.demo {
            TransportKind::Demo
        } else {
            self.transport
        };

        if transport == TransportKind::Ip && (self.pos_ip.is_none() || self.pos_port.is_none()) {
            return Err(TerminalError::ConfigError(
                "IP transport requires GETNET_POS_IP and GETNET_POS_PORT".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.demo_approval_rate) {
            return Err(TerminalError::ConfigError(format!(
                "demo approval rate {} is outside 0..=1",
                self.demo_approval_rate
            )));
        }

        let timeouts = TimeoutPolicy::default();
        timeouts.validate()?;

        Ok(TerminalConfig {
            transport,
            serial_path: self.com_port,
            baud_rate: self.baud_rate,
            host: self.pos_ip,
            port: self.pos_port,
            timeouts,
            sale_timeout: Duration::from_secs(self.timeout_secs),
            employee_id: self.employee_id,
            starting_ticket: self.start_ticket,
            backstop_margin: Duration::from_secs(self.backstop_margin_secs),
            strict_match: self.strict_match,
            demo: DemoSettings {
                approval_rate: self.demo_approval_rate,
                latency: Duration::from_millis(self.demo_latency_ms),
                jitter: Duration::from_millis(self.demo_jitter_ms),
                seed: self.demo_seed,
            },
        })
    }
}
