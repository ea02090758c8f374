//! Protocol vocabulary shared by every layer: the command catalog, the signed
//! envelope, inbound message shapes, the canonical result and the transport ports.

pub mod command;
pub mod message;
pub mod ports;
pub mod result;
pub mod signer;
