//! Settings snapshot model
//! Typed view of the iron's configuration, grouped the way the firmware
//! menus group it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::catalog::SettingKey;
use crate::core::error::{IronError, IronResult};
use crate::core::settings::codec::SettingValue;

/// Enumerations stored on the wire as a single ordinal byte
pub trait Ordinal: Sized + Copy + Default {
    fn ordinal(self) -> u8;
    fn from_ordinal(value: u8) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerSource {
    #[default]
    Dc,
    ThreeCell,
    FourCell,
    FiveCell,
    SixCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartupBehavior {
    #[default]
    Off,
    HeatToSetpoint,
    StandbyUntilMoved,
    StandbyWithoutHeating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockingBehavior {
    #[default]
    Off,
    BoostOnly,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TempUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayOrientation {
    #[default]
    Right,
    Left,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScrollingSpeed {
    #[default]
    Slow,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnimationSpeed {
    #[default]
    Off,
    Slow,
    Medium,
    Fast,
}

impl Ordinal for PowerSource {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dc),
            1 => Some(Self::ThreeCell),
            2 => Some(Self::FourCell),
            3 => Some(Self::FiveCell),
            4 => Some(Self::SixCell),
            _ => None,
        }
    }
}

impl Ordinal for StartupBehavior {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::HeatToSetpoint),
            2 => Some(Self::StandbyUntilMoved),
            3 => Some(Self::StandbyWithoutHeating),
            _ => None,
        }
    }
}

impl Ordinal for LockingBehavior {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::BoostOnly),
            2 => Some(Self::Full),
            _ => None,
        }
    }
}

impl Ordinal for TempUnit {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Celsius),
            1 => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

impl Ordinal for DisplayOrientation {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Right),
            1 => Some(Self::Left),
            2 => Some(Self::Auto),
            _ => None,
        }
    }
}

impl Ordinal for ScrollingSpeed {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Slow),
            1 => Some(Self::Fast),
            _ => None,
        }
    }
}

impl Ordinal for AnimationSpeed {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Slow),
            2 => Some(Self::Medium),
            3 => Some(Self::Fast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerSettings {
    pub dc_in_cutoff: PowerSource,
    /// Volts per cell
    pub min_voltage_cell: f64,
    /// Volts
    pub qc_max_voltage: f64,
    pub pd_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolderingSettings {
    pub soldering_temp: u16,
    pub boost_temp: u16,
    pub startup_behavior: StartupBehavior,
    pub temp_change_short_press: u16,
    pub temp_change_long_press: u16,
    pub locking_behavior: LockingBehavior,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiSettings {
    pub temp_unit: TempUnit,
    pub display_orientation: DisplayOrientation,
    pub cooldown_flashing: bool,
    pub scrolling_speed: ScrollingSpeed,
    pub swap_plus_minus_keys: bool,
    pub animation_speed: AnimationSpeed,
    pub screen_brightness: u16,
    pub invert_screen: bool,
    pub boot_logo_duration: Duration,
    pub detailed_idle_screen: bool,
    pub detailed_soldering_screen: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdvancedSettings {
    pub power_limit: u16,
    pub calibrate_cjc_next_boot: bool,
    /// Watts
    pub power_pulse: f64,
    pub power_pulse_duration: Duration,
    pub power_pulse_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SleepSettings {
    pub motion_sensitivity: u8,
    pub sleep_temp: u16,
    pub sleep_timeout: u16,
    pub shutdown_timeout: Duration,
}

/// The five settings sub-groups, in fetch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsGroup {
    Power,
    Soldering,
    Ui,
    Advanced,
    Sleep,
}

impl SettingsGroup {
    pub const FETCH_ORDER: [SettingsGroup; 5] = [
        Self::Power,
        Self::Soldering,
        Self::Ui,
        Self::Advanced,
        Self::Sleep,
    ];

    /// Characteristics backing this group, in read order
    pub fn keys(self) -> &'static [SettingKey] {
        use SettingKey::*;
        match self {
            Self::Power => &[DcInCutoff, MinVoltageCell, QcMaxVoltage, PdNegotiationTimeout],
            Self::Soldering => &[
                SetTemperature,
                BoostTemperature,
                AutoStart,
                TempChangeShortStep,
                TempChangeLongStep,
                LockingMode,
            ],
            Self::Ui => &[
                TemperatureUnit,
                DisplayRotation,
                CooldownBlink,
                ScrollingSpeed,
                ReverseButtonTempChange,
                AnimationSpeed,
                Brightness,
                ColourInversion,
                LogoTime,
                AdvancedIdle,
                AdvancedSoldering,
            ],
            Self::Advanced => &[
                PowerLimit,
                CalibrateCjc,
                PowerPulsePower,
                PowerPulseDuration,
                PowerPulseWait,
            ],
            Self::Sleep => &[
                SleepTemperature,
                SleepTimeout,
                ShutdownTimeout,
                MotionSensitivity,
            ],
        }
    }

    /// Every characteristic read by a full fetch, in read order
    pub fn all_keys() -> impl Iterator<Item = SettingKey> {
        Self::FETCH_ORDER
            .into_iter()
            .flat_map(|group| group.keys().iter().copied())
    }
}

/// Complete settings of one iron
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub power: PowerSettings,
    pub soldering: SolderingSettings,
    pub ui: UiSettings,
    pub advanced: AdvancedSettings,
    pub sleep: SleepSettings,
}

fn expect_u16(key: SettingKey, value: SettingValue) -> IronResult<u16> {
    match value {
        SettingValue::Integer(v) => u16::try_from(v)
            .map_err(|_| IronError::ValueOutOfRange(format!("{key} = {v} exceeds 65535"))),
        other => Err(IronError::InvalidValueType {
            expected: "integer",
            actual: other.type_name(),
        }),
    }
}

fn expect_u8(key: SettingKey, value: SettingValue) -> IronResult<u8> {
    match value {
        SettingValue::Integer(v) => u8::try_from(v)
            .map_err(|_| IronError::ValueOutOfRange(format!("{key} = {v} exceeds 255"))),
        other => Err(IronError::InvalidValueType {
            expected: "integer",
            actual: other.type_name(),
        }),
    }
}

fn expect_decimal(value: SettingValue) -> IronResult<f64> {
    match value {
        SettingValue::Decimal(v) => Ok(v),
        other => Err(IronError::InvalidValueType {
            expected: "decimal",
            actual: other.type_name(),
        }),
    }
}

fn expect_bool(value: SettingValue) -> IronResult<bool> {
    match value {
        SettingValue::Bool(v) => Ok(v),
        other => Err(IronError::InvalidValueType {
            expected: "bool",
            actual: other.type_name(),
        }),
    }
}

fn expect_duration(value: SettingValue) -> IronResult<Duration> {
    match value {
        SettingValue::Duration(v) => Ok(v),
        other => Err(IronError::InvalidValueType {
            expected: "duration",
            actual: other.type_name(),
        }),
    }
}

/// Device-provided ordinals fall back to the default variant; caller-provided
/// ordinals must be valid.
fn expect_enum<T: Ordinal>(key: SettingKey, value: SettingValue, lenient: bool) -> IronResult<T> {
    match value {
        SettingValue::Ordinal(raw) => match T::from_ordinal(raw) {
            Some(v) => Ok(v),
            None if lenient => Ok(T::default()),
            None => Err(IronError::ValueOutOfRange(format!(
                "{key} has no variant {raw}"
            ))),
        },
        other => Err(IronError::InvalidValueType {
            expected: "ordinal",
            actual: other.type_name(),
        }),
    }
}

impl SettingsSnapshot {
    /// Current value of a field, `None` for characteristics outside the snapshot
    pub fn value(&self, key: SettingKey) -> Option<SettingValue> {
        use SettingKey::*;
        use SettingValue as V;
        let value = match key {
            DcInCutoff => V::Ordinal(self.power.dc_in_cutoff.ordinal()),
            MinVoltageCell => V::Decimal(self.power.min_voltage_cell),
            QcMaxVoltage => V::Decimal(self.power.qc_max_voltage),
            PdNegotiationTimeout => V::Duration(self.power.pd_timeout),

            SetTemperature => V::Integer(self.soldering.soldering_temp.into()),
            BoostTemperature => V::Integer(self.soldering.boost_temp.into()),
            AutoStart => V::Ordinal(self.soldering.startup_behavior.ordinal()),
            TempChangeShortStep => V::Integer(self.soldering.temp_change_short_press.into()),
            TempChangeLongStep => V::Integer(self.soldering.temp_change_long_press.into()),
            LockingMode => V::Ordinal(self.soldering.locking_behavior.ordinal()),

            TemperatureUnit => V::Ordinal(self.ui.temp_unit.ordinal()),
            DisplayRotation => V::Ordinal(self.ui.display_orientation.ordinal()),
            CooldownBlink => V::Bool(self.ui.cooldown_flashing),
            ScrollingSpeed => V::Ordinal(self.ui.scrolling_speed.ordinal()),
            ReverseButtonTempChange => V::Bool(self.ui.swap_plus_minus_keys),
            AnimationSpeed => V::Ordinal(self.ui.animation_speed.ordinal()),
            Brightness => V::Integer(self.ui.screen_brightness.into()),
            ColourInversion => V::Bool(self.ui.invert_screen),
            LogoTime => V::Duration(self.ui.boot_logo_duration),
            AdvancedIdle => V::Bool(self.ui.detailed_idle_screen),
            AdvancedSoldering => V::Bool(self.ui.detailed_soldering_screen),

            PowerLimit => V::Integer(self.advanced.power_limit.into()),
            CalibrateCjc => V::Bool(self.advanced.calibrate_cjc_next_boot),
            PowerPulsePower => V::Decimal(self.advanced.power_pulse),
            PowerPulseDuration => V::Duration(self.advanced.power_pulse_duration),
            PowerPulseWait => V::Duration(self.advanced.power_pulse_delay),

            SleepTemperature => V::Integer(self.sleep.sleep_temp.into()),
            SleepTimeout => V::Integer(self.sleep.sleep_timeout.into()),
            ShutdownTimeout => V::Duration(self.sleep.shutdown_timeout),
            MotionSensitivity => V::Integer(self.sleep.motion_sensitivity.into()),

            _ => return None,
        };
        Some(value)
    }

    /// Sets one field from a caller-provided value.
    ///
    /// Keys outside the snapshot are accepted and leave it unchanged.
    pub fn apply(&mut self, key: SettingKey, value: SettingValue) -> IronResult<()> {
        self.set(key, value, false)
    }

    /// Sets one field from a value decoded off the wire.
    pub(crate) fn apply_decoded(&mut self, key: SettingKey, value: SettingValue) -> IronResult<()> {
        self.set(key, value, true)
    }

    fn set(&mut self, key: SettingKey, value: SettingValue, lenient: bool) -> IronResult<()> {
        use SettingKey::*;
        match key {
            DcInCutoff => self.power.dc_in_cutoff = expect_enum(key, value, lenient)?,
            MinVoltageCell => self.power.min_voltage_cell = expect_decimal(value)?,
            QcMaxVoltage => self.power.qc_max_voltage = expect_decimal(value)?,
            PdNegotiationTimeout => self.power.pd_timeout = expect_duration(value)?,

            SetTemperature => self.soldering.soldering_temp = expect_u16(key, value)?,
            BoostTemperature => self.soldering.boost_temp = expect_u16(key, value)?,
            AutoStart => self.soldering.startup_behavior = expect_enum(key, value, lenient)?,
            TempChangeShortStep => {
                self.soldering.temp_change_short_press = expect_u16(key, value)?
            }
            TempChangeLongStep => self.soldering.temp_change_long_press = expect_u16(key, value)?,
            LockingMode => self.soldering.locking_behavior = expect_enum(key, value, lenient)?,

            TemperatureUnit => self.ui.temp_unit = expect_enum(key, value, lenient)?,
            DisplayRotation => self.ui.display_orientation = expect_enum(key, value, lenient)?,
            CooldownBlink => self.ui.cooldown_flashing = expect_bool(value)?,
            ScrollingSpeed => self.ui.scrolling_speed = expect_enum(key, value, lenient)?,
            ReverseButtonTempChange => self.ui.swap_plus_minus_keys = expect_bool(value)?,
            AnimationSpeed => self.ui.animation_speed = expect_enum(key, value, lenient)?,
            Brightness => self.ui.screen_brightness = expect_u16(key, value)?,
            ColourInversion => self.ui.invert_screen = expect_bool(value)?,
            LogoTime => self.ui.boot_logo_duration = expect_duration(value)?,
            AdvancedIdle => self.ui.detailed_idle_screen = expect_bool(value)?,
            AdvancedSoldering => self.ui.detailed_soldering_screen = expect_bool(value)?,

            PowerLimit => self.advanced.power_limit = expect_u16(key, value)?,
            CalibrateCjc => self.advanced.calibrate_cjc_next_boot = expect_bool(value)?,
            PowerPulsePower => self.advanced.power_pulse = expect_decimal(value)?,
            PowerPulseDuration => self.advanced.power_pulse_duration = expect_duration(value)?,
            PowerPulseWait => self.advanced.power_pulse_delay = expect_duration(value)?,

            SleepTemperature => self.sleep.sleep_temp = expect_u16(key, value)?,
            SleepTimeout => self.sleep.sleep_timeout = expect_u16(key, value)?,
            ShutdownTimeout => self.sleep.shutdown_timeout = expect_duration(value)?,
            MotionSensitivity => self.sleep.motion_sensitivity = expect_u8(key, value)?,

            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_groups_cover_thirty_distinct_fields() {
        let keys: Vec<SettingKey> = SettingsGroup::all_keys().collect();
        assert_eq!(keys.len(), 30);
        let unique: HashSet<SettingKey> = keys.iter().copied().collect();
        assert_eq!(unique.len(), 30);
        assert_eq!(keys[0], SettingKey::DcInCutoff);
        assert_eq!(keys[4], SettingKey::SetTemperature);
    }

    #[test]
    fn test_every_snapshot_key_has_a_value() {
        let snapshot = SettingsSnapshot::default();
        for key in SettingsGroup::all_keys() {
            assert!(snapshot.value(key).is_some(), "{key} missing");
        }
        assert!(snapshot.value(SettingKey::UiLanguage).is_none());
    }

    #[test]
    fn test_apply_then_value() {
        let mut snapshot = SettingsSnapshot::default();
        snapshot
            .apply(SettingKey::SetTemperature, SettingValue::Integer(320))
            .unwrap();
        snapshot
            .apply(SettingKey::LockingMode, SettingValue::Ordinal(2))
            .unwrap();
        snapshot
            .apply(SettingKey::ShutdownTimeout, SettingValue::Duration(Duration::from_secs(600)))
            .unwrap();

        assert_eq!(snapshot.soldering.soldering_temp, 320);
        assert_eq!(snapshot.soldering.locking_behavior, LockingBehavior::Full);
        assert_eq!(
            snapshot.value(SettingKey::ShutdownTimeout),
            Some(SettingValue::Duration(Duration::from_secs(600)))
        );
    }

    #[test]
    fn test_invalid_ordinal_rejected_unless_decoded() {
        let mut snapshot = SettingsSnapshot::default();
        assert!(
            snapshot
                .apply(SettingKey::DcInCutoff, SettingValue::Ordinal(9))
                .is_err()
        );

        snapshot
            .apply_decoded(SettingKey::TemperatureUnit, SettingValue::Ordinal(7))
            .unwrap();
        assert_eq!(snapshot.ui.temp_unit, TempUnit::Celsius);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut snapshot = SettingsSnapshot::default();
        let err = snapshot
            .apply(SettingKey::CooldownBlink, SettingValue::Integer(1))
            .unwrap_err();
        assert!(matches!(err, IronError::InvalidValueType { .. }));
    }
}
