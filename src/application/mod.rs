//! Application layer: drives the terminal protocol.
//!
//! [`session::TerminalSession`] is the protocol engine. It runs as a single `tokio` task
//! that owns the transport and the command timers. [`correlator::RequestCorrelator`]
//! turns its event stream into one awaited result per call, and
//! [`service::PaymentService`] is the payment-level entry point built on top.

pub mod correlator;
pub mod service;
pub mod session;
