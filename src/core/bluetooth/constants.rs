//! Constants used throughout the session layer
//! This module contains the GATT identifiers exposed by IronOS firmware
//! and the timing values the session runs with.

use uuid::Uuid;

/// Live data service: one notifiable characteristic per telemetry value
pub const UUID_LIVE_DATA_SERVICE: Uuid = Uuid::from_u128(0xd85ef000_168e_4a71_aa55_33e27f9bc533);
/// Bulk data service: packed telemetry blob plus device identity strings
pub const UUID_BULK_DATA_SERVICE: Uuid = Uuid::from_u128(0x9eae1000_9d0d_48c5_aa55_33e27f9bc533);
/// Settings service: one characteristic per configurable field
pub const UUID_SETTINGS_SERVICE: Uuid = Uuid::from_u128(0xf6d80000_5a10_4eba_aa55_33e27f9bc533);

/// Services the scanner filters on and the session discovers after connecting
pub const IRON_SERVICES: [Uuid; 3] = [
    UUID_LIVE_DATA_SERVICE,
    UUID_SETTINGS_SERVICE,
    UUID_BULK_DATA_SERVICE,
];

/// Live data characteristics
pub const UUID_LIVE_TEMP: Uuid = Uuid::from_u128(0xd85ef001_168e_4a71_aa55_33e27f9bc533);
pub const UUID_SETPOINT_TEMP: Uuid = Uuid::from_u128(0xd85ef002_168e_4a71_aa55_33e27f9bc533);
pub const UUID_DC_INPUT: Uuid = Uuid::from_u128(0xd85ef003_168e_4a71_aa55_33e27f9bc533);
pub const UUID_HANDLE_TEMP: Uuid = Uuid::from_u128(0xd85ef004_168e_4a71_aa55_33e27f9bc533);
pub const UUID_POWER_LEVEL: Uuid = Uuid::from_u128(0xd85ef005_168e_4a71_aa55_33e27f9bc533);
pub const UUID_POWER_SOURCE: Uuid = Uuid::from_u128(0xd85ef006_168e_4a71_aa55_33e27f9bc533);
pub const UUID_TIP_RESISTANCE: Uuid = Uuid::from_u128(0xd85ef007_168e_4a71_aa55_33e27f9bc533);
pub const UUID_UPTIME: Uuid = Uuid::from_u128(0xd85ef008_168e_4a71_aa55_33e27f9bc533);
pub const UUID_MOVEMENT: Uuid = Uuid::from_u128(0xd85ef009_168e_4a71_aa55_33e27f9bc533);
pub const UUID_MAX_TEMP: Uuid = Uuid::from_u128(0xd85ef00a_168e_4a71_aa55_33e27f9bc533);
pub const UUID_RAW_TIP: Uuid = Uuid::from_u128(0xd85ef00b_168e_4a71_aa55_33e27f9bc533);
pub const UUID_HALL_SENSOR: Uuid = Uuid::from_u128(0xd85ef00c_168e_4a71_aa55_33e27f9bc533);
pub const UUID_OPERATING_MODE: Uuid = Uuid::from_u128(0xd85ef00d_168e_4a71_aa55_33e27f9bc533);
pub const UUID_ESTIMATED_WATTS: Uuid = Uuid::from_u128(0xd85ef00e_168e_4a71_aa55_33e27f9bc533);

/// Bulk data characteristics
pub const UUID_BULK_LIVE_DATA: Uuid = Uuid::from_u128(0x9eae1001_9d0d_48c5_aa55_33e27f9bc533);
pub const UUID_ACCEL_NAME: Uuid = Uuid::from_u128(0x9eae1002_9d0d_48c5_aa55_33e27f9bc533);
pub const UUID_BUILD: Uuid = Uuid::from_u128(0x9eae1003_9d0d_48c5_aa55_33e27f9bc533);
pub const UUID_DEVICE_SERIAL: Uuid = Uuid::from_u128(0x9eae1004_9d0d_48c5_aa55_33e27f9bc533);
pub const UUID_DEVICE_ID: Uuid = Uuid::from_u128(0x9eae1005_9d0d_48c5_aa55_33e27f9bc533);

/// Settings control characteristics
pub const UUID_SAVE_TO_FLASH: Uuid = Uuid::from_u128(0xf6d7ffff_5a10_4eba_aa55_33e27f9bc533);
pub const UUID_SETTINGS_RESET: Uuid = Uuid::from_u128(0xf6d7fffe_5a10_4eba_aa55_33e27f9bc533);

/// Characteristics read once as soon as they are discovered
pub const READ_ON_DISCOVERY: [Uuid; 2] = [UUID_BULK_LIVE_DATA, UUID_BUILD];

/// Number of little-endian u32 words in the bulk telemetry payload
pub const BULK_PAYLOAD_WORDS: usize = 14;

/// Size of the bulk telemetry payload in bytes
pub const BULK_PAYLOAD_SIZE: usize = BULK_PAYLOAD_WORDS * 4;

/// Telemetry history length retained for charting
pub const TELEMETRY_HISTORY_CAPACITY: usize = 60;

/// Bulk telemetry poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Timeout for a correlated read or write in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 8000;

/// Window in which the last known iron must reappear for auto-reconnect
pub const DEFAULT_RECONNECT_GRACE_MS: u64 = 3000;

/// Quiet period before a debounced settings write goes out
pub const DEFAULT_SETTINGS_DEBOUNCE_MS: u64 = 500;

/// Capacity of the session event broadcast channel
pub const SESSION_EVENT_CAPACITY: usize = 128;

/// Capacity of the command channel into the session task
pub const SESSION_COMMAND_CAPACITY: usize = 32;
