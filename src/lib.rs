//! IronOS companion library
//! This is the main library for the IronOS companion: BLE session, telemetry
//! and settings for IronOS soldering irons.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::core::{
    ConnectionState, DeviceHandle, IronError, IronResult, SessionEvent, SettingsOrchestrator,
    TransportSession,
};
pub use state::AppState;
