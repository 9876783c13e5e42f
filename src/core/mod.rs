//! Core functionality for the IronOS companion
//! This module contains the characteristic catalog, the BLE session with the
//! iron, telemetry decoding and settings management.

pub mod bluetooth;
pub mod catalog;
pub mod error;
pub mod settings;
pub mod telemetry;

// Re-export commonly used types
pub use bluetooth::{ConnectionState, DeviceHandle, SessionEvent, TransportSession};
pub use error::{IronError, IronResult};
pub use settings::{SettingValue, SettingsOrchestrator, SettingsSnapshot};
pub use telemetry::{LiveStatus, TelemetryHistory, TelemetrySnapshot};
