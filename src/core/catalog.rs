//! Protocol catalog
//! Static registry of every characteristic the session knows about: its
//! identifier, owning service, byte width and how its value is interpreted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;
use crate::core::settings::codec::{TimeUnit, ValueKind};

/// The three GATT services exposed by IronOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceGroup {
    LiveData,
    Bulk,
    Settings,
}

impl ServiceGroup {
    pub fn uuid(self) -> Uuid {
        match self {
            Self::LiveData => UUID_LIVE_DATA_SERVICE,
            Self::Bulk => UUID_BULK_DATA_SERVICE,
            Self::Settings => UUID_SETTINGS_SERVICE,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        [Self::LiveData, Self::Bulk, Self::Settings]
            .into_iter()
            .find(|group| group.uuid() == uuid)
    }
}

/// How a characteristic's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single live telemetry value, u32 little-endian
    Telemetry,
    /// Packed bulk telemetry payload
    BulkPayload,
    /// UTF-8 identity string of variable length
    Text,
    /// Configurable setting
    Setting(ValueKind),
    /// Write-only control trigger
    Control,
}

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicSpec {
    pub name: &'static str,
    pub uuid: Uuid,
    pub service: ServiceGroup,
    /// Expected byte width, 0 for variable length
    pub width: usize,
    pub kind: FieldKind,
}

/// Settings characteristics, discriminant is the index in the UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum SettingKey {
    SetTemperature = 0x00,
    SleepTemperature = 0x01,
    SleepTimeout = 0x02,
    DcInCutoff = 0x03,
    MinVoltageCell = 0x04,
    QcMaxVoltage = 0x05,
    DisplayRotation = 0x06,
    MotionSensitivity = 0x07,
    AnimationLoop = 0x08,
    AnimationSpeed = 0x09,
    AutoStart = 0x0a,
    ShutdownTimeout = 0x0b,
    CooldownBlink = 0x0c,
    AdvancedIdle = 0x0d,
    AdvancedSoldering = 0x0e,
    TemperatureUnit = 0x0f,
    ScrollingSpeed = 0x10,
    LockingMode = 0x11,
    PowerPulsePower = 0x12,
    PowerPulseWait = 0x13,
    PowerPulseDuration = 0x14,
    VoltageCalibration = 0x15,
    BoostTemperature = 0x16,
    CalibrationOffset = 0x17,
    PowerLimit = 0x18,
    ReverseButtonTempChange = 0x19,
    TempChangeLongStep = 0x1a,
    TempChangeShortStep = 0x1b,
    HallEffectSensitivity = 0x1c,
    AccelMissingWarningCounter = 0x1d,
    PdMissingWarningCounter = 0x1e,
    UiLanguage = 0x1f,
    PdNegotiationTimeout = 0x20,
    ColourInversion = 0x21,
    Brightness = 0x22,
    LogoTime = 0x23,
    CalibrateCjc = 0x24,
    BleEnabled = 0x25,
    PdVpdoEnabled = 0x26,
}

const SETTINGS_UUID_BASE: u128 = 0xf6d70000_5a10_4eba_aa55_33e27f9bc533;

impl SettingKey {
    pub const ALL: [SettingKey; 39] = [
        Self::SetTemperature,
        Self::SleepTemperature,
        Self::SleepTimeout,
        Self::DcInCutoff,
        Self::MinVoltageCell,
        Self::QcMaxVoltage,
        Self::DisplayRotation,
        Self::MotionSensitivity,
        Self::AnimationLoop,
        Self::AnimationSpeed,
        Self::AutoStart,
        Self::ShutdownTimeout,
        Self::CooldownBlink,
        Self::AdvancedIdle,
        Self::AdvancedSoldering,
        Self::TemperatureUnit,
        Self::ScrollingSpeed,
        Self::LockingMode,
        Self::PowerPulsePower,
        Self::PowerPulseWait,
        Self::PowerPulseDuration,
        Self::VoltageCalibration,
        Self::BoostTemperature,
        Self::CalibrationOffset,
        Self::PowerLimit,
        Self::ReverseButtonTempChange,
        Self::TempChangeLongStep,
        Self::TempChangeShortStep,
        Self::HallEffectSensitivity,
        Self::AccelMissingWarningCounter,
        Self::PdMissingWarningCounter,
        Self::UiLanguage,
        Self::PdNegotiationTimeout,
        Self::ColourInversion,
        Self::Brightness,
        Self::LogoTime,
        Self::CalibrateCjc,
        Self::BleEnabled,
        Self::PdVpdoEnabled,
    ];

    pub fn uuid(self) -> Uuid {
        Uuid::from_u128(SETTINGS_UUID_BASE | ((self as u128) << 96))
    }

    pub fn kind(self) -> ValueKind {
        use SettingKey::*;
        match self {
            DcInCutoff | DisplayRotation | AnimationSpeed | AutoStart | TemperatureUnit
            | ScrollingSpeed | LockingMode => ValueKind::EnumOrdinal,
            MinVoltageCell | QcMaxVoltage | PowerPulsePower => ValueKind::FixedPoint,
            MotionSensitivity | HallEffectSensitivity => ValueKind::UInt8Direct,
            AnimationLoop | CooldownBlink | AdvancedIdle | AdvancedSoldering
            | ReverseButtonTempChange | ColourInversion | CalibrateCjc | BleEnabled
            | PdVpdoEnabled => ValueKind::Boolean,
            ShutdownTimeout => ValueKind::Duration(TimeUnit::Minutes),
            PdNegotiationTimeout => ValueKind::Duration(TimeUnit::Deciseconds),
            PowerPulseWait | PowerPulseDuration | LogoTime => {
                ValueKind::Duration(TimeUnit::Seconds)
            }
            SetTemperature | SleepTemperature | SleepTimeout | VoltageCalibration
            | BoostTemperature | CalibrationOffset | PowerLimit | TempChangeLongStep
            | TempChangeShortStep | AccelMissingWarningCounter | PdMissingWarningCounter
            | UiLanguage | Brightness => ValueKind::UInt16Le,
        }
    }

    pub fn name(self) -> &'static str {
        use SettingKey::*;
        match self {
            SetTemperature => "set_temperature",
            SleepTemperature => "sleep_temperature",
            SleepTimeout => "sleep_timeout",
            DcInCutoff => "dc_in_cutoff",
            MinVoltageCell => "min_voltage_cell",
            QcMaxVoltage => "qc_max_voltage",
            DisplayRotation => "display_rotation",
            MotionSensitivity => "motion_sensitivity",
            AnimationLoop => "animation_loop",
            AnimationSpeed => "animation_speed",
            AutoStart => "auto_start",
            ShutdownTimeout => "shutdown_timeout",
            CooldownBlink => "cooldown_blink",
            AdvancedIdle => "advanced_idle",
            AdvancedSoldering => "advanced_soldering",
            TemperatureUnit => "temperature_unit",
            ScrollingSpeed => "scrolling_speed",
            LockingMode => "locking_mode",
            PowerPulsePower => "power_pulse_power",
            PowerPulseWait => "power_pulse_wait",
            PowerPulseDuration => "power_pulse_duration",
            VoltageCalibration => "voltage_calibration",
            BoostTemperature => "boost_temperature",
            CalibrationOffset => "calibration_offset",
            PowerLimit => "power_limit",
            ReverseButtonTempChange => "reverse_button_temp_change",
            TempChangeLongStep => "temp_change_long_step",
            TempChangeShortStep => "temp_change_short_step",
            HallEffectSensitivity => "hall_effect_sensitivity",
            AccelMissingWarningCounter => "accel_missing_warning_counter",
            PdMissingWarningCounter => "pd_missing_warning_counter",
            UiLanguage => "ui_language",
            PdNegotiationTimeout => "pd_negotiation_timeout",
            ColourInversion => "colour_inversion",
            Brightness => "brightness",
            LogoTime => "logo_time",
            CalibrateCjc => "calibrate_cjc",
            BleEnabled => "ble_enabled",
            PdVpdoEnabled => "pd_vpdo_enabled",
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.uuid() == uuid)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn entry(
    name: &'static str,
    uuid: Uuid,
    service: ServiceGroup,
    width: usize,
    kind: FieldKind,
) -> CharacteristicSpec {
    CharacteristicSpec {
        name,
        uuid,
        service,
        width,
        kind,
    }
}

static CATALOG: LazyLock<Vec<CharacteristicSpec>> = LazyLock::new(|| {
    use FieldKind::*;
    use ServiceGroup::*;

    let mut entries = vec![
        entry("live_temp", UUID_LIVE_TEMP, LiveData, 4, Telemetry),
        entry("setpoint_temp", UUID_SETPOINT_TEMP, LiveData, 4, Telemetry),
        entry("dc_input", UUID_DC_INPUT, LiveData, 4, Telemetry),
        entry("handle_temp", UUID_HANDLE_TEMP, LiveData, 4, Telemetry),
        entry("power_level", UUID_POWER_LEVEL, LiveData, 4, Telemetry),
        entry("power_source", UUID_POWER_SOURCE, LiveData, 4, Telemetry),
        entry("tip_resistance", UUID_TIP_RESISTANCE, LiveData, 4, Telemetry),
        entry("uptime", UUID_UPTIME, LiveData, 4, Telemetry),
        entry("movement", UUID_MOVEMENT, LiveData, 4, Telemetry),
        entry("max_temp", UUID_MAX_TEMP, LiveData, 4, Telemetry),
        entry("raw_tip", UUID_RAW_TIP, LiveData, 4, Telemetry),
        entry("hall_sensor", UUID_HALL_SENSOR, LiveData, 4, Telemetry),
        entry("operating_mode", UUID_OPERATING_MODE, LiveData, 4, Telemetry),
        entry("estimated_watts", UUID_ESTIMATED_WATTS, LiveData, 4, Telemetry),
        entry("bulk_live_data", UUID_BULK_LIVE_DATA, Bulk, BULK_PAYLOAD_SIZE, BulkPayload),
        entry("accel_name", UUID_ACCEL_NAME, Bulk, 0, Text),
        entry("build", UUID_BUILD, Bulk, 0, Text),
        entry("device_serial", UUID_DEVICE_SERIAL, Bulk, 0, Text),
        entry("device_id", UUID_DEVICE_ID, Bulk, 0, Text),
    ];
    entries.extend(SettingKey::ALL.into_iter().map(|key| {
        let kind = key.kind();
        entry(key.name(), key.uuid(), Settings, kind.width(), Setting(kind))
    }));
    entries.push(entry("save_to_flash", UUID_SAVE_TO_FLASH, Settings, 1, Control));
    entries.push(entry("settings_reset", UUID_SETTINGS_RESET, Settings, 1, Control));
    entries
});

/// All catalog entries
pub fn entries() -> &'static [CharacteristicSpec] {
    &CATALOG
}

/// Looks up a characteristic by UUID
pub fn lookup(uuid: Uuid) -> Option<&'static CharacteristicSpec> {
    CATALOG.iter().find(|spec| spec.uuid == uuid)
}

/// Looks up a characteristic by name
pub fn by_name(name: &str) -> Option<&'static CharacteristicSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}
