//! Settings value codec
//! Converts typed setting values to and from the little-endian byte layout
//! IronOS uses for its settings characteristics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::error::{IronError, IronResult};

/// Unit of a duration stored as a raw 16-bit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Deciseconds,
    Minutes,
}

impl TimeUnit {
    fn millis(self) -> u64 {
        match self {
            Self::Seconds => 1_000,
            Self::Deciseconds => 100,
            Self::Minutes => 60_000,
        }
    }
}

/// Wire representation of a settings field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Single unsigned byte
    UInt8Direct,
    /// Unsigned 16-bit little-endian integer
    UInt16Le,
    /// 16-bit little-endian integer holding `value * 10`
    FixedPoint,
    /// Single byte, 0 or 1
    Boolean,
    /// Single byte holding an enumeration ordinal
    EnumOrdinal,
    /// 16-bit little-endian count of `TimeUnit`s
    Duration(TimeUnit),
}

impl ValueKind {
    /// Number of bytes written for this kind
    pub fn width(self) -> usize {
        match self {
            Self::UInt8Direct | Self::Boolean | Self::EnumOrdinal => 1,
            Self::UInt16Le | Self::FixedPoint | Self::Duration(_) => 2,
        }
    }
}

/// A typed settings value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Integer(u32),
    Decimal(f64),
    Bool(bool),
    Ordinal(u8),
    Duration(Duration),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Bool(_) => "bool",
            Self::Ordinal(_) => "ordinal",
            Self::Duration(_) => "duration",
        }
    }
}

fn mismatch(expected: &'static str, value: &SettingValue) -> IronError {
    IronError::InvalidValueType {
        expected,
        actual: value.type_name(),
    }
}

fn to_u16(raw: u64, what: &str) -> IronResult<[u8; 2]> {
    u16::try_from(raw)
        .map(u16::to_le_bytes)
        .map_err(|_| IronError::ValueOutOfRange(format!("{what} {raw} exceeds 65535")))
}

/// Encodes `value` as the byte layout of `kind`.
pub fn encode(kind: ValueKind, value: &SettingValue) -> IronResult<Vec<u8>> {
    match (kind, value) {
        (ValueKind::UInt8Direct, SettingValue::Integer(v)) => u8::try_from(*v)
            .map(|b| vec![b])
            .map_err(|_| IronError::ValueOutOfRange(format!("byte value {v} exceeds 255"))),
        (ValueKind::UInt8Direct, other) => Err(mismatch("integer", other)),

        (ValueKind::UInt16Le, SettingValue::Integer(v)) => {
            Ok(to_u16(u64::from(*v), "value")?.to_vec())
        }
        (ValueKind::UInt16Le, other) => Err(mismatch("integer", other)),

        (ValueKind::FixedPoint, SettingValue::Decimal(v)) => {
            let scaled = (v * 10.0).round();
            if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(u16::MAX) {
                return Err(IronError::ValueOutOfRange(format!(
                    "decimal {v} not representable as fixed point"
                )));
            }
            Ok((scaled as u16).to_le_bytes().to_vec())
        }
        (ValueKind::FixedPoint, other) => Err(mismatch("decimal", other)),

        (ValueKind::Boolean, SettingValue::Bool(b)) => Ok(vec![u8::from(*b)]),
        (ValueKind::Boolean, other) => Err(mismatch("bool", other)),

        (ValueKind::EnumOrdinal, SettingValue::Ordinal(o)) => Ok(vec![*o]),
        (ValueKind::EnumOrdinal, other) => Err(mismatch("ordinal", other)),

        (ValueKind::Duration(unit), SettingValue::Duration(d)) => {
            let step = u128::from(unit.millis());
            let units = (d.as_millis() + step / 2) / step;
            let units = u64::try_from(units).unwrap_or(u64::MAX);
            Ok(to_u16(units, "duration units")?.to_vec())
        }
        (ValueKind::Duration(_), other) => Err(mismatch("duration", other)),
    }
}

/// Decodes the byte layout of `kind` into a typed value.
///
/// Bytes past the field width are ignored.
pub fn decode(kind: ValueKind, bytes: &[u8]) -> IronResult<SettingValue> {
    let width = kind.width();
    if bytes.len() < width {
        return Err(IronError::ValueTooShort {
            expected: width,
            actual: bytes.len(),
        });
    }
    let word = || u16::from_le_bytes([bytes[0], bytes[1]]);

    let value = match kind {
        ValueKind::UInt8Direct => SettingValue::Integer(u32::from(bytes[0])),
        ValueKind::UInt16Le => SettingValue::Integer(u32::from(word())),
        ValueKind::FixedPoint => SettingValue::Decimal(f64::from(word()) / 10.0),
        ValueKind::Boolean => SettingValue::Bool(bytes[0] == 1),
        ValueKind::EnumOrdinal => SettingValue::Ordinal(bytes[0]),
        ValueKind::Duration(unit) => {
            SettingValue::Duration(Duration::from_millis(u64::from(word()) * unit.millis()))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_encoding() {
        let bytes = encode(ValueKind::FixedPoint, &SettingValue::Decimal(12.3)).unwrap();
        assert_eq!(bytes, vec![123, 0]);

        let value = decode(ValueKind::FixedPoint, &[50, 0]).unwrap();
        assert_eq!(value, SettingValue::Decimal(5.0));
    }

    #[test]
    fn test_fixed_point_round_trip_over_tenths() {
        for tenths in [0u32, 1, 33, 99, 100, 420, 2000, 65535] {
            let v = f64::from(tenths) / 10.0;
            let bytes = encode(ValueKind::FixedPoint, &SettingValue::Decimal(v)).unwrap();
            assert_eq!(
                decode(ValueKind::FixedPoint, &bytes).unwrap(),
                SettingValue::Decimal(v)
            );
        }
    }

    #[test]
    fn test_u16_little_endian() {
        let bytes = encode(ValueKind::UInt16Le, &SettingValue::Integer(320)).unwrap();
        assert_eq!(bytes, vec![0x40, 0x01]);
        assert_eq!(
            decode(ValueKind::UInt16Le, &bytes).unwrap(),
            SettingValue::Integer(320)
        );
    }

    #[test]
    fn test_bool_and_ordinal_are_single_byte() {
        assert_eq!(
            encode(ValueKind::Boolean, &SettingValue::Bool(true)).unwrap(),
            vec![1]
        );
        assert_eq!(
            encode(ValueKind::EnumOrdinal, &SettingValue::Ordinal(3)).unwrap(),
            vec![3]
        );
        assert_eq!(
            decode(ValueKind::Boolean, &[0, 0]).unwrap(),
            SettingValue::Bool(false)
        );
    }

    #[test]
    fn test_duration_units() {
        let ten_minutes = SettingValue::Duration(Duration::from_secs(600));
        let bytes = encode(ValueKind::Duration(TimeUnit::Minutes), &ten_minutes).unwrap();
        assert_eq!(bytes, vec![10, 0]);
        assert_eq!(
            decode(ValueKind::Duration(TimeUnit::Minutes), &bytes).unwrap(),
            ten_minutes
        );

        let pd = SettingValue::Duration(Duration::from_millis(2_500));
        let bytes = encode(ValueKind::Duration(TimeUnit::Deciseconds), &pd).unwrap();
        assert_eq!(bytes, vec![25, 0]);
        assert_eq!(
            decode(ValueKind::Duration(TimeUnit::Deciseconds), &bytes).unwrap(),
            pd
        );
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let too_long = SettingValue::Duration(Duration::from_secs(65_536));
        assert!(matches!(
            encode(ValueKind::Duration(TimeUnit::Seconds), &too_long),
            Err(IronError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode(ValueKind::UInt16Le, &SettingValue::Integer(70_000)),
            Err(IronError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode(ValueKind::UInt8Direct, &SettingValue::Integer(256)),
            Err(IronError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode(ValueKind::FixedPoint, &SettingValue::Decimal(-1.0)),
            Err(IronError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode(ValueKind::FixedPoint, &SettingValue::Decimal(f64::NAN)),
            Err(IronError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let err = encode(ValueKind::Boolean, &SettingValue::Integer(1)).unwrap_err();
        assert_eq!(
            err,
            IronError::InvalidValueType {
                expected: "bool",
                actual: "integer"
            }
        );
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        assert_eq!(
            decode(ValueKind::UInt16Le, &[1]).unwrap_err(),
            IronError::ValueTooShort {
                expected: 2,
                actual: 1
            }
        );
        assert!(decode(ValueKind::Boolean, &[]).is_err());
    }
}
