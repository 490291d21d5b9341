//! Value model and column-type-aware conversions.
//!
//! Records travel as maps of column name to [`Value`]. The two conversion
//! directions live here: payloads bound for the database are refined against
//! the target table's column types (`convert_payload`), and rows read from
//! the database are normalized into the record model (`normalize_row`).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use num_rational::Ratio;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// SAP HANA date and time column types.
const DATE_TYPE: &str = "DATE";
const TIME_TYPE: &str = "TIME";
const SECONDDATE_TYPE: &str = "SECONDDATE";
const TIMESTAMP_TYPE: &str = "TIMESTAMP";

// SAP HANA string types, including the deprecated cloud ones.
const VARCHAR_TYPE: &str = "VARCHAR";
const NVARCHAR_TYPE: &str = "NVARCHAR";
const CLOB_TYPE: &str = "CLOB";
const NCLOB_TYPE: &str = "NCLOB";
const ALPHANUM_TYPE: &str = "ALPHANUM";
const SHORTTEXT_TYPE: &str = "SHORTTEXT";

// SAP HANA decimal types.
const DECIMAL_TYPE: &str = "DECIMAL";
const SMALLDECIMAL_TYPE: &str = "SMALLDECIMAL";

/// A single database-agnostic value.
///
/// Decimals are rationals with a positive denominator, mirroring how the
/// database driver represents DECIMAL and SMALLDECIMAL. Timestamps carry an
/// explicit offset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Decimal(Ratio<i64>),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view across the two integer widths.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            Self::Int32(i) => Some(i64::from(*i)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a value from parsed JSON. Numbers become `Int64` when they fit,
    /// `Float64` otherwise; type refinement against column types happens in
    /// [`convert_payload`].
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else {
                    Self::Float64(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int32(i) => serializer.serialize_i32(*i),
            Self::Int64(i) => serializer.serialize_i64(*i),
            Self::Float64(f) => serializer.serialize_f64(*f),
            Self::Decimal(r) => {
                serializer.serialize_str(&format!("{}/{}", r.numer(), r.denom()))
            }
            Self::String(s) => serializer.serialize_str(s),
            Self::Bytes(b) => serializer.serialize_str(&BASE64.encode(b)),
            Self::Timestamp(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(json))
    }
}

/// Converts a structured payload into database-bindable values, guided by the
/// target table's column types (keys are uppercase).
///
/// Nested maps become JSON text since the database has no JSON column type.
/// Temporal columns parse string values against the accepted layout list, and
/// decimal columns accept rationals, floats, dotted or `num/den` strings and
/// integers. Everything else passes through.
pub fn convert_payload(
    column_types: &BTreeMap<String, String>,
    payload: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let mut result = BTreeMap::new();

    for (key, value) in payload {
        if value.is_null() {
            result.insert(key, value);
            continue;
        }

        if let Value::Map(_) = value {
            let text = serde_json::to_string(&value)?;
            result.insert(key, Value::String(text));
            continue;
        }

        let column_type = column_types
            .get(&key.to_uppercase())
            .map(String::as_str)
            .unwrap_or_default();

        match column_type {
            DATE_TYPE | TIME_TYPE | SECONDDATE_TYPE | TIMESTAMP_TYPE => {
                let converted = match value {
                    Value::Timestamp(_) => value,
                    Value::String(ref s) => Value::Timestamp(parse_timestamp(s)?),
                    other => other,
                };
                result.insert(key, converted);
            }
            DECIMAL_TYPE | SMALLDECIMAL_TYPE => {
                result.insert(key, Value::Decimal(to_decimal(&value)?));
            }
            _ => {
                result.insert(key, value);
            }
        }
    }

    Ok(result)
}

/// Normalizes a row read from the database. Text-typed columns arriving as
/// raw bytes are decoded into UTF-8 strings.
pub fn normalize_row(
    column_types: &BTreeMap<String, String>,
    row: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let mut result = BTreeMap::new();

    for (key, value) in row {
        if value.is_null() {
            result.insert(key, value);
            continue;
        }

        let column_type = column_types.get(&key).map(String::as_str).unwrap_or_default();

        match column_type {
            CLOB_TYPE | NCLOB_TYPE | VARCHAR_TYPE | NVARCHAR_TYPE | ALPHANUM_TYPE
            | SHORTTEXT_TYPE => match value {
                Value::Bytes(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|_| Error::CannotConvertToBytes(key.clone()))?;
                    result.insert(key, Value::String(text));
                }
                Value::String(_) => {
                    result.insert(key, value);
                }
                _ => return Err(Error::CannotConvertToBytes(key)),
            },
            _ => {
                result.insert(key, value);
            }
        }
    }

    Ok(result)
}

/// Accepted timestamp layouts with a numeric UTC offset.
const OFFSET_LAYOUTS: &[&str] = &[
    // Ruby date: Mon Jan 02 15:04:05 -0700 2006
    "%a %b %e %H:%M:%S %z %Y",
    // reference layout: 01/02 03:04:05PM '06 -0700
    "%m/%d %I:%M:%S%p '%y %z",
    // RFC 850 with a numeric offset
    "%A, %d-%b-%y %H:%M:%S %z",
];

/// Accepted layouts without an offset; the wall clock is read as UTC. Named
/// zones (Unix date, RFC 850, RFC 1123) are skipped over, not resolved.
const NAIVE_LAYOUTS: &[&str] = &[
    // Unix date: Mon Jan  2 15:04:05 MST 2006
    "%a %b %e %H:%M:%S %Z %Y",
    // RFC 1123: Mon, 02 Jan 2006 15:04:05 MST
    "%a, %d %b %Y %H:%M:%S %Z",
    // RFC 850: Monday, 02-Jan-06 15:04:05 MST
    "%A, %d-%b-%y %H:%M:%S %Z",
    // ANSI C: Mon Jan  2 15:04:05 2006
    "%a %b %e %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S%.f",
];

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    // RFC 3339 including the fractional-second variant.
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t);
    }
    // RFC 822/1123 with a numeric zone.
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Ok(t);
    }
    for layout in OFFSET_LAYOUTS {
        if let Ok(t) = DateTime::parse_from_str(value, layout) {
            return Ok(t);
        }
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, layout) {
            return Ok(t.and_utc().fixed_offset());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let t = d.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(t.and_utc().fixed_offset());
    }
    // Stamp family carries no year; anchor at the zero year like the
    // reference layouts do.
    if let Ok(t) = NaiveDateTime::parse_from_str(&format!("{value} 0000"), "%b %e %H:%M:%S%.f %Y") {
        return Ok(t.and_utc().fixed_offset());
    }
    // Kitchen: 3:04PM.
    if let Ok(t) = NaiveTime::parse_from_str(value, "%I:%M%p") {
        let d = NaiveDate::from_ymd_opt(0, 1, 1).expect("zero date is valid");
        return Ok(d.and_time(t).and_utc().fixed_offset());
    }

    Err(Error::InvalidTimeLayout(value.to_string()))
}

/// Converts a value into the database's rational decimal representation.
pub(crate) fn to_decimal(value: &Value) -> Result<Ratio<i64>> {
    match value {
        Value::Decimal(r) => Ok(*r),
        Value::Float64(f) => decimal_from_str(&format!("{f}")),
        Value::String(s) => {
            if s.contains('.') {
                // usual case, for example 110.45
                decimal_from_str(s)
            } else if s.contains('/') {
                // the database's own rendering, for example 11045/100
                let parts: Vec<&str> = s.split('/').collect();
                if parts.len() != 2 {
                    return Err(Error::InvalidDecimalString(s.clone()));
                }
                let numer: i64 = parts[0]
                    .parse()
                    .map_err(|_| Error::InvalidDecimalString(s.clone()))?;
                let denom: i64 = parts[1]
                    .parse()
                    .map_err(|_| Error::InvalidDecimalString(s.clone()))?;
                if denom == 0 {
                    return Err(Error::InvalidDecimalString(s.clone()));
                }
                Ok(Ratio::new(numer, denom))
            } else {
                Err(Error::CannotConvertValueToDecimal)
            }
        }
        Value::Int64(i) => Ok(Ratio::new(*i, 1)),
        Value::Int32(i) => Ok(Ratio::new(i64::from(*i), 1)),
        _ => Err(Error::CannotConvertValueToDecimal),
    }
}

/// Parses `whole` or `whole.fraction` into `digits / 10^len(fraction)`.
pub(crate) fn decimal_from_str(value: &str) -> Result<Ratio<i64>> {
    let parts: Vec<&str> = value.split('.').collect();
    match parts.len() {
        1 => {
            let i: i64 = parts[0]
                .parse()
                .map_err(|_| Error::InvalidDecimalString(value.to_string()))?;
            Ok(Ratio::new(i, 1))
        }
        2 => {
            let digits: i64 = format!("{}{}", parts[0], parts[1])
                .parse()
                .map_err(|_| Error::InvalidDecimalString(value.to_string()))?;
            let denom = 10i64
                .checked_pow(parts[1].len() as u32)
                .ok_or_else(|| Error::InvalidDecimalString(value.to_string()))?;
            Ok(Ratio::new(digits, denom))
        }
        _ => Err(Error::InvalidDecimalString(value.to_string())),
    }
}

/// Renders a rational as a plain decimal string for parameter binding.
/// Power-of-ten denominators (the only kind the codec produces) render
/// exactly; anything else falls back to floating division.
pub(crate) fn decimal_to_sql_string(r: &Ratio<i64>) -> String {
    let numer = *r.numer();
    let denom = *r.denom();
    if denom == 1 {
        return numer.to_string();
    }
    let mut scale = 0u32;
    let mut d = denom;
    while d % 10 == 0 {
        d /= 10;
        scale += 1;
    }
    if d == 1 {
        let negative = numer < 0;
        let digits = numer.unsigned_abs().to_string();
        let digits = if digits.len() <= scale as usize {
            format!("{:0>width$}", digits, width = scale as usize + 1)
        } else {
            digits
        };
        let split = digits.len() - scale as usize;
        let sign = if negative { "-" } else { "" };
        format!("{sign}{}.{}", &digits[..split], &digits[split..])
    } else {
        format!("{}", numer as f64 / denom as f64)
    }
}
