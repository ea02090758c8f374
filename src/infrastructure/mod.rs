//! Transports that carry signed envelopes to a terminal and parsed JSON back.

pub mod demo;
pub mod framing;
pub mod in_memory;
pub mod ip;
pub mod serial;

use crate::config::{TerminalConfig, TransportKind};
use crate::domain::ports::ConnectorBox;
use crate::error::{Result, TerminalError};
use std::sync::Arc;

/// Picks the connector named by `config`. Nothing is opened here.
pub fn connector_from_config(config: &TerminalConfig) -> Result<ConnectorBox> {
    let connector: ConnectorBox = match config.transport {
        TransportKind::Serial => Arc::new(serial::SerialConnector::new(
            config.serial_path.clone(),
            config.baud_rate,
        )),
        TransportKind::Ip => {
            let (Some(host), Some(port)) = (config.host.as_ref(), config.port) else {
                return Err(TerminalError::ConfigError(
                    "IP transport requires a host and a port".to_string(),
                ));
            };
            Arc::new(ip::IpConnector::new(host.clone(), port))
        }
        TransportKind::Demo => Arc::new(demo::DemoConnector::new(config.demo.clone())),
    };
    Ok(connector)
}
