//! Platform seam between the session and the Bluetooth stack.
//!
//! A backend accepts requests without blocking and reports every completion
//! as a [`TransportEvent`] on the channel handed to the session.

use tokio::sync::mpsc;
use uuid::Uuid;

/// How a characteristic write is performed on the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for the device to acknowledge
    WithResponse,
    /// Fire and forget
    WithoutResponse,
}

/// Declared capabilities of a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Unacknowledged writes are preferred when the characteristic allows them.
    pub fn preferred_write_mode(&self) -> WriteMode {
        if self.write_without_response {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        }
    }

    pub fn can_subscribe(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A characteristic as discovered on the connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service: Uuid,
    pub properties: CharacteristicProperties,
}

/// One advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub rssi: Option<i16>,
}

/// Completions reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceDiscovered(Advertisement),
    /// The scan started with `scan_id` ended
    ScanStopped { scan_id: u64 },
    Connected { device_id: String },
    ConnectFailed { device_id: String, error: String },
    /// Link closed, locally requested or not
    Disconnected { device_id: String, error: Option<String> },
    ServicesDiscovered(Result<Vec<Uuid>, String>),
    CharacteristicsDiscovered {
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, String>,
    },
    /// Completion of a read request
    ValueRead {
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    /// Value pushed by the device on a subscribed characteristic
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// Completion of an acknowledged write
    WriteCompleted {
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Submit-style access to the Bluetooth stack.
///
/// Calls return immediately. Every call that has an outcome reports it later
/// as a [`TransportEvent`].
pub trait BleTransport: Send + 'static {
    /// Starts a scan; its end is reported as `ScanStopped` carrying `scan_id`.
    fn start_scan(&mut self, scan_id: u64, services: &[Uuid]);
    fn stop_scan(&mut self);
    fn connect(&mut self, device_id: &str);
    fn disconnect(&mut self, device_id: &str);
    fn discover_services(&mut self, services: &[Uuid]);
    fn discover_characteristics(&mut self, service: Uuid);
    fn subscribe(&mut self, characteristic: Uuid);
    fn read(&mut self, characteristic: Uuid);
    fn write(&mut self, characteristic: Uuid, value: Vec<u8>, mode: WriteMode);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_prefers_without_response() {
        let both = CharacteristicProperties {
            write: true,
            write_without_response: true,
            ..Default::default()
        };
        assert_eq!(both.preferred_write_mode(), WriteMode::WithoutResponse);

        let acked = CharacteristicProperties {
            write: true,
            ..Default::default()
        };
        assert_eq!(acked.preferred_write_mode(), WriteMode::WithResponse);
    }
}
