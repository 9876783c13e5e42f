//! Bluetooth session layer for IronOS irons
//! This module handles discovery, the GATT session with the connected iron,
//! request correlation and telemetry polling.

mod commands;
mod connection;
pub mod constants;
mod correlation;
#[cfg(test)]
pub(crate) mod fake;
mod manager;
mod notification;
mod registry;
mod scanner;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::{CharacteristicIo, CommandExecutor, ControlCommand};
pub use connection::BluestTransport;
pub use constants::*; // Re-export all constants
pub use correlation::{CorrelationTable, RequestKind, Responder};
pub use manager::TransportSession;
pub use registry::DeviceRegistry;
pub use transport::{
    transport_channel, Advertisement, BleTransport, CharacteristicInfo, CharacteristicProperties,
    TransportEvent, TransportEventReceiver, TransportEventSender, WriteMode,
};
pub use types::{ConnectionState, DeviceHandle, IronColor, SessionEvent, SignalQuality};
