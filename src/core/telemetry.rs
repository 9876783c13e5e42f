//! Telemetry decoding
//! Turns the bulk live-data payload into typed snapshots and keeps a short
//! history of them for charting.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::core::bluetooth::constants::{
    BULK_PAYLOAD_SIZE, BULK_PAYLOAD_WORDS, TELEMETRY_HISTORY_CAPACITY,
};
use crate::core::error::{IronError, IronResult};

/// Operating mode reported by the iron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperatingMode {
    #[default]
    Idle,
    Soldering,
    Boost,
    Sleeping,
    Settings,
    Debug,
}

impl OperatingMode {
    /// Maps the raw mode word; unknown values fall back to `Idle`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Soldering,
            2 => Self::Boost,
            3 => Self::Sleeping,
            4 => Self::Settings,
            5 => Self::Debug,
            _ => Self::Idle,
        }
    }

    pub fn display_text(self) -> &'static str {
        match self {
            Self::Idle => "Stand-by",
            Self::Soldering => "Soldering",
            Self::Boost => "Boost",
            Self::Sleeping => "Sleeping",
            Self::Settings => "Settings",
            Self::Debug => "Debug",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_text())
    }
}

/// One decoded bulk telemetry reading
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Tip temperature
    pub current_temp: u32,
    pub setpoint: u32,
    /// Volts
    pub input_voltage: f64,
    pub handle_temp: f64,
    /// Power draw as the firmware's PWM level
    pub power: u32,
    pub power_source: u32,
    pub tip_resistance: u32,
    /// Seconds since boot
    pub uptime: f64,
    /// Seconds since the last detected motion
    pub last_movement: f64,
    pub max_temp: u32,
    pub raw_tip: u32,
    pub hall_sensor: u32,
    pub mode: OperatingMode,
    /// Watts
    pub estimated_wattage: f64,
}

/// Decodes a bulk telemetry payload of 14 little-endian `u32` words.
///
/// Trailing bytes past the 14th word are ignored.
pub fn decode_bulk(bytes: &[u8]) -> IronResult<TelemetrySnapshot> {
    if bytes.len() < BULK_PAYLOAD_SIZE {
        return Err(IronError::PayloadTooShort {
            expected: BULK_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }

    let mut words = [0u32; BULK_PAYLOAD_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let tenths = |raw: u32| f64::from(raw) / 10.0;

    Ok(TelemetrySnapshot {
        current_temp: words[0],
        setpoint: words[1],
        input_voltage: tenths(words[2]),
        handle_temp: tenths(words[3]),
        power: words[4],
        power_source: words[5],
        tip_resistance: words[6],
        uptime: tenths(words[7]),
        last_movement: tenths(words[8]),
        max_temp: words[9],
        raw_tip: words[10],
        hall_sensor: words[11],
        mode: OperatingMode::from_raw(words[12]),
        estimated_wattage: tenths(words[13]),
    })
}

/// Most recent snapshots in arrival order, oldest first
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    entries: VecDeque<TelemetrySnapshot>,
    capacity: usize,
}

impl Default for TelemetryHistory {
    fn default() -> Self {
        Self::with_capacity(TELEMETRY_HISTORY_CAPACITY)
    }
}

impl TelemetryHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: TelemetrySnapshot) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&TelemetrySnapshot> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<TelemetrySnapshot> {
        self.entries.iter().cloned().collect()
    }
}

/// Content forwarded to lock-screen style status surfaces on every poll tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub temperature: u32,
    pub setpoint: u32,
    pub mode: OperatingMode,
    pub handle_temp: f64,
    pub power: u32,
}

impl From<&TelemetrySnapshot> for LiveStatus {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            temperature: snapshot.current_temp,
            setpoint: snapshot.setpoint,
            mode: snapshot.mode,
            handle_temp: snapshot.handle_temp,
            power: snapshot.power,
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_words() -> [u32; 14] {
        [330, 320, 201, 254, 45, 1, 62, 12345, 87, 450, 1800, 0, 1, 423]
    }

    #[test]
    fn test_decode_bulk_fields() {
        let snapshot = decode_bulk(&encode_words(&sample_words())).unwrap();

        assert_eq!(snapshot.current_temp, 330);
        assert_eq!(snapshot.setpoint, 320);
        assert_eq!(snapshot.input_voltage, 20.1);
        assert_eq!(snapshot.handle_temp, 25.4);
        assert_eq!(snapshot.power, 45);
        assert_eq!(snapshot.power_source, 1);
        assert_eq!(snapshot.tip_resistance, 62);
        assert_eq!(snapshot.uptime, 1234.5);
        assert_eq!(snapshot.last_movement, 8.7);
        assert_eq!(snapshot.max_temp, 450);
        assert_eq!(snapshot.raw_tip, 1800);
        assert_eq!(snapshot.hall_sensor, 0);
        assert_eq!(snapshot.mode, OperatingMode::Soldering);
        assert_eq!(snapshot.estimated_wattage, 42.3);
    }

    #[test]
    fn test_unknown_mode_decodes_to_idle() {
        let mut words = sample_words();
        words[12] = 6;
        let snapshot = decode_bulk(&encode_words(&words)).unwrap();
        assert_eq!(snapshot.mode, OperatingMode::Idle);

        words[12] = u32::MAX;
        let snapshot = decode_bulk(&encode_words(&words)).unwrap();
        assert_eq!(snapshot.mode, OperatingMode::Idle);
    }

    #[test]
    fn test_short_payload_is_an_error() {
        for len in [0, 1, 4, 52, 55] {
            let bytes = vec![0xAB; len];
            assert_eq!(
                decode_bulk(&bytes).unwrap_err(),
                IronError::PayloadTooShort {
                    expected: 56,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode_words(&sample_words());
        bytes.extend_from_slice(&[0xFF; 7]);
        let snapshot = decode_bulk(&bytes).unwrap();
        assert_eq!(snapshot.estimated_wattage, 42.3);
    }

    #[test]
    fn test_decode_total_over_arbitrary_bytes() {
        let bytes = vec![0xFF; 56];
        let snapshot = decode_bulk(&bytes).unwrap();
        assert_eq!(snapshot.current_temp, u32::MAX);
        assert_eq!(snapshot.mode, OperatingMode::Idle);
    }

    #[test]
    fn test_history_keeps_most_recent_sixty() {
        let mut history = TelemetryHistory::default();
        for i in 0..65u32 {
            history.push(TelemetrySnapshot {
                current_temp: i,
                ..Default::default()
            });
        }

        assert_eq!(history.len(), 60);
        let temps: Vec<u32> = history.iter().map(|s| s.current_temp).collect();
        assert_eq!(temps, (5..65).collect::<Vec<u32>>());
        assert_eq!(history.latest().map(|s| s.current_temp), Some(64));
    }

    #[test]
    fn test_live_status_from_snapshot() {
        let snapshot = decode_bulk(&encode_words(&sample_words())).unwrap();
        let status = LiveStatus::from(&snapshot);
        assert_eq!(status.temperature, 330);
        assert_eq!(status.mode.display_text(), "Soldering");
        assert_eq!(status.handle_temp, 25.4);
    }
}
