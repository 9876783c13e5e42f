//! Defines shared data structures for the Bluetooth module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::telemetry::{LiveStatus, TelemetrySnapshot};

/// Colour variant of the iron's housing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IronColor {
    #[default]
    Teal,
    Red,
    Blue,
    Liquid,
    Pink,
    Pride,
    Transparent,
}

/// Coarse signal strength bucket derived from RSSI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    Excellent,
    Good,
    Poor,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            r if r >= -60 => Self::Excellent,
            -80..=-61 => Self::Good,
            _ => Self::Poor,
        }
    }
}

/// Represents a discovered or remembered iron.
///
/// The platform peripheral object stays inside the transport backend; this
/// record only carries its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Platform identifier. Never changes after creation.
    pub id: String,
    pub name: Option<String>,
    /// Signal strength in dBm from the latest advertisement
    pub rssi: i16,
    /// MAC address when the platform exposes one
    pub address: Option<String>,
    /// Firmware build string, populated after connect
    pub build: Option<String>,
    pub serial_number: Option<String>,
    pub device_id: Option<String>,
    pub variation: IronColor,
    pub connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name,
            rssi,
            address: None,
            build: None,
            serial_number: None,
            device_id: None,
            variation: IronColor::default(),
            connected: false,
            connected_at: None,
        }
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Lifecycle of the session with the current iron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Status line suitable for a non-blocking status display
    pub fn message(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::DiscoveringServices => "Discovering services...",
            Self::DiscoveringCharacteristics => "Discovering characteristics...",
            Self::Connected => "Connected",
            Self::Failed => "Connection failed",
        }
    }

    /// True while a connect attempt is underway
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::DiscoveringServices | Self::DiscoveringCharacteristics
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Events published by the session to any number of observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    /// The registry changed; carries the full device list
    DeviceListUpdated(Vec<DeviceHandle>),
    ScanStarted,
    ScanStopped,
    /// A session reached `Connected`
    DeviceConnected(DeviceHandle),
    DeviceDisconnected { id: String },
    ConnectionFailed(String),
    /// A new bulk telemetry snapshot was decoded
    SnapshotUpdated(TelemetrySnapshot),
    /// Notification from an individual live-data characteristic
    LiveValue { characteristic: Uuid, value: Vec<u8> },
    /// Per-tick status for lock-screen style surfaces
    LiveStatus(LiveStatus),
    LiveStatusEnded,
}
