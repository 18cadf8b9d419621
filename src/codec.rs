//! Typed encode/decode for values held in the store.
//!
//! The store only knows strings, lists of strings and string hashes. Every typed field goes
//! through one of the helpers below so a malformed value is rejected at this boundary instead
//! of somewhere inside an aggregation.
//!
//! Booleans are written as `"True"` / `"False"`. Decoding also accepts `"true"`, `"false"`,
//! `"1"` and `"0"`.

use chrono::{DateTime, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::str::FromStr;

pub type FieldMap = HashMap<String, String>;

pub const TRUE: &str = "True";
pub const FALSE: &str = "False";

const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a valid {expected}: {value:?}")]
    Invalid {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("malformed json at `{path}`: {message}")]
    Json { path: String, message: String },
}

fn invalid(field: &'static str, expected: &'static str, value: &str) -> CodecError {
    CodecError::Invalid {
        field,
        expected,
        value: value.to_string(),
    }
}

pub fn encode_bool(value: bool) -> &'static str {
    if value { TRUE } else { FALSE }
}

pub fn decode_bool(field: &'static str, raw: &str) -> Result<bool, CodecError> {
    match raw {
        TRUE | "true" | "1" => Ok(true),
        FALSE | "false" | "0" => Ok(false),
        other => Err(invalid(field, "boolean", other)),
    }
}

pub fn decode_int<T: FromStr>(field: &'static str, raw: &str) -> Result<T, CodecError> {
    raw.trim().parse::<T>().map_err(|_| invalid(field, "integer", raw))
}

/// Validate a decimal and hand back the stored text untouched, so "-0.500100" stays
/// "-0.500100" on the way out.
pub fn decode_decimal(field: &'static str, raw: &str) -> Result<String, CodecError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(raw.to_string()),
        _ => Err(invalid(field, "decimal", raw)),
    }
}

pub fn decode_time_of_day(field: &'static str, raw: &str) -> Result<String, CodecError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(|_| raw.to_string())
        .map_err(|_| invalid(field, "time of day", raw))
}

/// Parse either an RFC 3339 timestamp or an offset-less `YYYY-MM-DDTHH:MM:SS` into local
/// wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, NAIVE_TIMESTAMP_FORMAT))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

pub fn decode_timestamp(field: &'static str, raw: &str) -> Result<String, CodecError> {
    parse_timestamp(raw)
        .map(|_| raw.to_string())
        .ok_or_else(|| invalid(field, "timestamp", raw))
}

pub fn encode_timestamp(ts: NaiveDateTime) -> String {
    ts.format(NAIVE_TIMESTAMP_FORMAT).to_string()
}

pub fn field<'a>(fields: &'a FieldMap, name: &'static str) -> Result<&'a str, CodecError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(CodecError::MissingField(name))
}

/// Optional text fields are stored as empty strings and read back the same way.
pub fn text(fields: &FieldMap, name: &'static str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

/// A record stored as a field-named hash.
pub trait HashRecord: Sized {
    fn to_fields(&self) -> Vec<(&'static str, String)>;
    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError>;
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Json {
        path: ".".to_string(),
        message: e.to_string(),
    })
}

pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    let de = &mut serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(de).map_err(|e| CodecError::Json {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}
