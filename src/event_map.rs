use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::err::{EvtxError, Result};
use crate::utils::format_utc;

/// Canonical event paths, shared with downstream consumers.
pub const EVENT_ID_PATH: &str = "/Event/System/EventID";
pub const EVENT_ID_VALUE_PATH: &str = "/Event/System/EventID/Value";
pub const CHANNEL_PATH: &str = "/Event/System/Channel";
pub const EVENT_RECORD_ID_PATH: &str = "/Event/System/EventRecordID";
pub const SYSTEM_TIME_PATH: &str = "/Event/System/TimeCreated/SystemTime";
pub const USER_ID_PATH: &str = "/Event/System/Security/UserID";
pub(crate) const XMLNS_PATH: &str = "/Event/xmlns";

const PATH_SEPARATOR: char = '/';

/// A value held by an [`EventMap`]: a scalar, an array, or a nested map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapValue {
    Null,
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Binary(Vec<u8>),
    StringArray(Vec<String>),
    UInt16Array(Vec<u16>),
    UInt64Array(Vec<u64>),
    Map(EventMap),
}

/// The decoded form of an event: a nested mapping from element and attribute
/// names to values. Downstream consumers may add their own keys (tags,
/// enrichment) before shipping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventMap {
    entries: BTreeMap<String, MapValue>,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches(PATH_SEPARATOR)
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
}

fn not_found(path: &str) -> EvtxError {
    EvtxError::PathNotFound {
        path: path.to_string(),
    }
}

fn conversion(path: &str, expected: &'static str) -> EvtxError {
    EvtxError::ValueConversion {
        path: path.to_string(),
        expected,
    }
}

/// Parses integers the way consumers write them in filters: decimal by
/// default, with `0x`/`0o`/`0b` prefixes accepted.
fn parse_prefixed<T: TryFrom<i128>>(s: &str) -> Option<T> {
    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        (8, oct)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin)
    } else {
        (10, digits)
    };

    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    T::try_from(value).ok()
}

impl EventMap {
    pub fn new() -> Self {
        EventMap::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Direct single-key access, no path navigation.
    pub fn get_key(&self, key: &str) -> Option<&MapValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MapValue) -> Option<MapValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MapValue)> {
        self.entries.iter()
    }

    /// Navigates a `/`-separated key path.
    pub fn get(&self, path: &str) -> Result<&MapValue> {
        let mut current = self;
        let mut segments = split_path(path).peekable();

        while let Some(segment) = segments.next() {
            let value = current.entries.get(segment).ok_or_else(|| not_found(path))?;
            if segments.peek().is_none() {
                return Ok(value);
            }
            match value {
                MapValue::Map(inner) => current = inner,
                _ => return Err(not_found(path)),
            }
        }

        Err(not_found(path))
    }

    pub fn get_string(&self, path: &str) -> Result<&str> {
        match self.get(path)? {
            MapValue::String(s) => Ok(s),
            _ => Err(conversion(path, "string")),
        }
    }

    pub fn get_int(&self, path: &str) -> Result<i64> {
        match self.get(path)? {
            MapValue::Int(i) => Ok(*i),
            MapValue::UInt(u) => i64::try_from(*u).map_err(|_| conversion(path, "int64")),
            MapValue::String(s) => parse_prefixed(s).ok_or_else(|| conversion(path, "int64")),
            _ => Err(conversion(path, "int64")),
        }
    }

    pub fn get_uint(&self, path: &str) -> Result<u64> {
        match self.get(path)? {
            MapValue::UInt(u) => Ok(*u),
            MapValue::Int(i) => u64::try_from(*i).map_err(|_| conversion(path, "uint64")),
            MapValue::String(s) => parse_prefixed(s).ok_or_else(|| conversion(path, "uint64")),
            _ => Err(conversion(path, "uint64")),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        match self.get(path)? {
            MapValue::Bool(b) => Ok(*b),
            MapValue::String(s) => match s.as_str() {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
                _ => Err(conversion(path, "bool")),
            },
            _ => Err(conversion(path, "bool")),
        }
    }

    /// Reads a timestamp. Values decoded from raw BinXML fragments may be
    /// stored as text, in which case RFC 3339 is accepted.
    pub fn get_time(&self, path: &str) -> Result<DateTime<Utc>> {
        match self.get(path)? {
            MapValue::Time(t) => Ok(*t),
            MapValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| conversion(path, "time")),
            _ => Err(conversion(path, "time")),
        }
    }

    /// Overwrites the value at `path`. Intermediate keys must already exist.
    pub fn set(&mut self, path: &str, value: MapValue) -> Result<()> {
        let segments: Vec<&str> = split_path(path).collect();
        let (last, intermediate) = segments.split_last().ok_or_else(|| not_found(path))?;

        let mut current = self;
        for segment in intermediate {
            match current.entries.get_mut(*segment) {
                Some(MapValue::Map(inner)) => current = inner,
                _ => return Err(not_found(path)),
            }
        }

        current.entries.insert((*last).to_string(), value);
        Ok(())
    }

    /// Removes the value at `path`; a no-op when absent.
    pub fn del(&mut self, path: &str) {
        let segments: Vec<&str> = split_path(path).collect();
        let Some((last, intermediate)) = segments.split_last() else {
            return;
        };

        let mut current = self;
        for segment in intermediate {
            match current.entries.get_mut(*segment) {
                Some(MapValue::Map(inner)) => current = inner,
                _ => return,
            }
        }

        current.entries.remove(*last);
    }

    pub fn equal(&self, path: &str, value: &MapValue) -> bool {
        self.get(path).map(|v| v == value).unwrap_or(false)
    }

    pub fn any_equal(&self, path: &str, values: &[MapValue]) -> bool {
        match self.get(path) {
            Ok(v) => values.iter().any(|candidate| candidate == v),
            Err(_) => false,
        }
    }

    pub fn regex_match(&self, path: &str, pattern: &Regex) -> bool {
        self.get_string(path)
            .map(|s| pattern.is_match(s))
            .unwrap_or(false)
    }

    /// Merges another map in, failing on duplicate keys.
    pub fn add(&mut self, other: EventMap) -> Result<()> {
        for (key, value) in other.entries {
            if self.entries.contains_key(&key) {
                return Err(EvtxError::DuplicateKey { key });
            }
            self.entries.insert(key, value);
        }
        Ok(())
    }

    /// The event identifier; forwarded events occasionally keep it nested
    /// under a `Value` key, both shapes are tried.
    pub fn event_id(&self) -> Result<i64> {
        self.get_int(EVENT_ID_PATH)
            .or_else(|_| self.get_int(EVENT_ID_VALUE_PATH))
    }

    pub fn channel(&self) -> Result<&str> {
        self.get_string(CHANNEL_PATH)
    }

    pub fn event_record_id(&self) -> Result<i64> {
        self.get_int(EVENT_RECORD_ID_PATH)
    }

    pub fn time_created(&self) -> Result<DateTime<Utc>> {
        self.get_time(SYSTEM_TIME_PATH)
    }

    /// `/Event/System/Security/UserID`, present only on some channels.
    pub fn user_id(&self) -> Option<&str> {
        self.get_string(USER_ID_PATH).ok()
    }

    pub fn is_event_id(&self, event_ids: &[i64]) -> bool {
        self.event_id()
            .map(|id| event_ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn before(&self, t: DateTime<Utc>) -> bool {
        self.time_created().map(|tc| tc < t).unwrap_or(false)
    }

    pub fn after(&self, t: DateTime<Utc>) -> bool {
        self.time_created().map(|tc| tc > t).unwrap_or(false)
    }

    pub fn at(&self, t: DateTime<Utc>) -> bool {
        self.time_created().map(|tc| tc == t).unwrap_or(false)
    }

    pub fn between(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
        self.time_created()
            .map(|tc| tc >= start && tc <= stop)
            .unwrap_or(false)
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for EventMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for MapValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MapValue::Null => serializer.serialize_none(),
            MapValue::String(s) => serializer.serialize_str(s),
            MapValue::Int(i) => serializer.serialize_i64(*i),
            MapValue::UInt(u) => serializer.serialize_u64(*u),
            MapValue::Float(f) => serializer.serialize_f64(*f),
            MapValue::Bool(b) => serializer.serialize_bool(*b),
            MapValue::Time(t) => serializer.serialize_str(&format_utc(t)),
            MapValue::Binary(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                serializer.serialize_str(&hex)
            }
            MapValue::StringArray(values) => values.serialize(serializer),
            MapValue::UInt16Array(values) => values.serialize(serializer),
            MapValue::UInt64Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for v in values {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            MapValue::Map(map) => map.serialize(serializer),
        }
    }
}

impl fmt::Display for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapValue::Null => f.write_str("NULL"),
            MapValue::String(s) => f.write_str(s),
            MapValue::Int(i) => write!(f, "{i}"),
            MapValue::UInt(u) => write!(f, "{u}"),
            MapValue::Float(v) => write!(f, "{v}"),
            MapValue::Bool(b) => write!(f, "{b}"),
            MapValue::Time(t) => f.write_str(&format_utc(t)),
            MapValue::Binary(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            MapValue::StringArray(values) => f.write_str(&values.join(",")),
            MapValue::UInt16Array(values) => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                f.write_str(&rendered.join(","))
            }
            MapValue::UInt64Array(values) => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                f.write_str(&rendered.join(","))
            }
            MapValue::Map(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for MapValue {
    fn from(s: &str) -> Self {
        MapValue::String(s.to_string())
    }
}

impl From<String> for MapValue {
    fn from(s: String) -> Self {
        MapValue::String(s)
    }
}

impl From<i64> for MapValue {
    fn from(i: i64) -> Self {
        MapValue::Int(i)
    }
}

impl From<u64> for MapValue {
    fn from(u: u64) -> Self {
        MapValue::UInt(u)
    }
}

impl From<bool> for MapValue {
    fn from(b: bool) -> Self {
        MapValue::Bool(b)
    }
}
