//! In-memory data model shared by the container and the format plugins:
//! sample payloads, channel datatype tags, timestamps and attribute values.
//!
//! # Endianness
//! Sampled payloads are kept as interleaved little-endian frames exactly as
//! they are stored in container blocks, so moving data between a plugin and
//! the container never re-encodes samples.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArfxError, Result};

// ── Attributes ───────────────────────────────────────────────────────────────

/// A single attribute value on a container, entry or channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v)   => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Text(s)  => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v)   => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Float(_) => None,
            AttrValue::Text(s)  => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _                  => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v)   => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Text(s)  => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self { AttrValue::Text(s.to_owned()) }
}
impl From<String> for AttrValue {
    fn from(s: String) -> Self { AttrValue::Text(s) }
}
impl From<i64> for AttrValue {
    fn from(v: i64) -> Self { AttrValue::Int(v) }
}
impl From<f64> for AttrValue {
    fn from(v: f64) -> Self { AttrValue::Float(v) }
}

/// String-keyed attribute mapping.  Ordered so that listings and the
/// serialized index are deterministic.
pub type Attributes = BTreeMap<String, AttrValue>;

// ── DataType ─────────────────────────────────────────────────────────────────

/// Channel datatype tag.  Codes are the ARF numeric constants; codes at or
/// above 1000 denote event (point-process or interval) data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataType(pub u32);

const DATATYPE_NAMES: &[(DataType, &str, &str)] = &[
    (DataType::UNDEFINED,  "UNDEFINED",  "undefined or unknown"),
    (DataType::ACOUSTIC,   "ACOUSTIC",   "acoustic"),
    (DataType::EXTRAC_HP,  "EXTRAC_HP",  "extracellular, high-pass (single-unit or multi-unit)"),
    (DataType::EXTRAC_LF,  "EXTRAC_LF",  "extracellular, low-frequency (local field potential)"),
    (DataType::EXTRAC_EEG, "EXTRAC_EEG", "extracellular, EEG"),
    (DataType::INTRAC_CC,  "INTRAC_CC",  "intracellular, current-clamp"),
    (DataType::INTRAC_VC,  "INTRAC_VC",  "intracellular, voltage-clamp"),
    (DataType::EVENT,      "EVENT",      "generic event times"),
    (DataType::SPIKET,     "SPIKET",     "spike event times"),
    (DataType::BEHAVET,    "BEHAVET",    "behavioral event times"),
    (DataType::INTERVAL,   "INTERVAL",   "generic intervals"),
    (DataType::STIMI,      "STIMI",      "stimulus presentation intervals"),
    (DataType::COMPONENTL, "COMPONENTL", "component (e.g. motif) labels"),
];

impl DataType {
    pub const UNDEFINED:  DataType = DataType(0);
    pub const ACOUSTIC:   DataType = DataType(1);
    pub const EXTRAC_HP:  DataType = DataType(2);
    pub const EXTRAC_LF:  DataType = DataType(3);
    pub const EXTRAC_EEG: DataType = DataType(4);
    pub const INTRAC_CC:  DataType = DataType(5);
    pub const INTRAC_VC:  DataType = DataType(6);
    pub const EVENT:      DataType = DataType(1000);
    pub const SPIKET:     DataType = DataType(1001);
    pub const BEHAVET:    DataType = DataType(1002);
    pub const INTERVAL:   DataType = DataType(2000);
    pub const STIMI:      DataType = DataType(2001);
    pub const COMPONENTL: DataType = DataType(2002);

    pub fn is_event(self) -> bool { self.0 >= 1000 }

    pub fn name(self) -> Option<&'static str> {
        DATATYPE_NAMES.iter().find(|(d, _, _)| *d == self).map(|(_, n, _)| *n)
    }

    /// Table of symbolic names, one per line (for `--help-datatypes`).
    pub fn doc() -> String {
        let mut out = String::from("Data types:\n");
        for (d, name, desc) in DATATYPE_NAMES {
            out.push_str(&format!("  {:>4}: {:<11} {}\n", d.0, name, desc));
        }
        out
    }
}

impl Default for DataType {
    fn default() -> Self { DataType::UNDEFINED }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None    => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for DataType {
    type Err = ArfxError;

    /// Accepts a numeric code or a case-insensitive symbolic name.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.parse::<u32>() {
            return Ok(DataType(code));
        }
        DATATYPE_NAMES
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(d, _, _)| *d)
            .ok_or_else(|| ArfxError::InvalidArgument(format!("{s} is not a valid data type")))
    }
}

// ── SampleType ───────────────────────────────────────────────────────────────

/// Element type of a sampled payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            SampleType::U8  | SampleType::I8  => 1,
            SampleType::I16                   => 2,
            SampleType::I32 | SampleType::F32 => 4,
            SampleType::I64 | SampleType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleType::U8  => "u8",
            SampleType::I8  => "i8",
            SampleType::I16 => "i16",
            SampleType::I32 => "i32",
            SampleType::I64 => "i64",
            SampleType::F32 => "f32",
            SampleType::F64 => "f64",
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleType {
    type Err = ArfxError;

    /// Accepts Rust-style names (`i16`) and single-character array codes
    /// (`h`, `i`, `f`, `d`, ...).
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "u8"  | "uint8"   | "b" => SampleType::U8,
            "i8"  | "int8"          => SampleType::I8,
            "i16" | "int16"   | "h" => SampleType::I16,
            "i32" | "int32"   | "i" => SampleType::I32,
            "i64" | "int64"   | "l" => SampleType::I64,
            "f32" | "float32" | "f" => SampleType::F32,
            "f64" | "float64" | "d" => SampleType::F64,
            other => return Err(ArfxError::InvalidArgument(format!("unknown sample type '{other}'"))),
        })
    }
}

// ── Sampled payload ──────────────────────────────────────────────────────────

/// Interleaved frames of `columns` elements of `sample_type`, little-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledData {
    sample_type: SampleType,
    columns:     u16,
    bytes:       Vec<u8>,
}

impl SampledData {
    /// Wrap raw little-endian bytes.  The length must be a whole number of
    /// frames.
    pub fn new(sample_type: SampleType, columns: u16, bytes: Vec<u8>) -> Result<Self> {
        if columns == 0 {
            return Err(ArfxError::TypeMismatch("payload must have at least one column".into()));
        }
        let frame = sample_type.size() * columns as usize;
        if bytes.len() % frame != 0 {
            return Err(ArfxError::TypeMismatch(format!(
                "{} bytes is not a whole number of {}-byte frames", bytes.len(), frame
            )));
        }
        Ok(Self { sample_type, columns, bytes })
    }

    pub fn from_i16(samples: &[i16], columns: u16) -> Result<Self> {
        let mut bytes = vec![0u8; samples.len() * 2];
        LittleEndian::write_i16_into(samples, &mut bytes);
        Self::new(SampleType::I16, columns, bytes)
    }

    pub fn from_f64(samples: &[f64], columns: u16) -> Result<Self> {
        let mut bytes = vec![0u8; samples.len() * 8];
        LittleEndian::write_f64_into(samples, &mut bytes);
        Self::new(SampleType::F64, columns, bytes)
    }

    pub fn sample_type(&self) -> SampleType { self.sample_type }
    pub fn columns(&self)     -> u16        { self.columns }
    pub fn as_bytes(&self)    -> &[u8]      { &self.bytes }
    pub fn into_bytes(self)   -> Vec<u8>    { self.bytes }

    pub fn frame_size(&self) -> usize {
        self.sample_type.size() * self.columns as usize
    }

    pub fn frames(&self) -> usize {
        self.bytes.len() / self.frame_size()
    }

    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }

    /// Decode as `i16` samples; fails unless the element type is `i16`.
    pub fn to_i16_vec(&self) -> Result<Vec<i16>> {
        if self.sample_type != SampleType::I16 {
            return Err(ArfxError::TypeMismatch(format!("payload is {}, not i16", self.sample_type)));
        }
        let mut out = vec![0i16; self.bytes.len() / 2];
        LittleEndian::read_i16_into(&self.bytes, &mut out);
        Ok(out)
    }

    /// Append frames of an identically shaped payload.
    pub fn extend(&mut self, other: &SampledData) -> Result<()> {
        if other.sample_type != self.sample_type || other.columns != self.columns {
            return Err(ArfxError::TypeMismatch(format!(
                "cannot append {}x{} frames to {}x{} payload",
                other.sample_type, other.columns, self.sample_type, self.columns
            )));
        }
        self.bytes.extend_from_slice(&other.bytes);
        Ok(())
    }
}

/// Data stored in a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Sampled(SampledData),
    /// Event times, in the channel's units.
    Events(Vec<f64>),
}

impl Payload {
    pub fn events_to_bytes(events: &[f64]) -> Vec<u8> {
        let mut bytes = vec![0u8; events.len() * 8];
        LittleEndian::write_f64_into(events, &mut bytes);
        bytes
    }

    pub fn events_from_bytes(bytes: &[u8]) -> Vec<f64> {
        let mut out = vec![0f64; bytes.len() / 8];
        LittleEndian::read_f64_into(&bytes[..out.len() * 8], &mut out);
        out
    }
}

// ── Timestamp ────────────────────────────────────────────────────────────────

/// Point in time as seconds + microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub micros:  i64,
}

impl Timestamp {
    pub fn new(seconds: i64, micros: i64) -> Self {
        let seconds = seconds + micros.div_euclid(1_000_000);
        Self { seconds, micros: micros.rem_euclid(1_000_000) }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.floor();
        Self::new(whole as i64, ((secs - whole) * 1e6).round() as i64)
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.micros as f64 * 1e-6
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.seconds >= 0 {
            UNIX_EPOCH + Duration::new(self.seconds as u64, (self.micros * 1000) as u32)
        } else {
            UNIX_EPOCH - Duration::from_secs((-self.seconds) as u64)
                + Duration::from_micros(self.micros as u64)
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d)  => Timestamp::new(d.as_secs() as i64, d.subsec_micros() as i64),
            Err(e) => {
                let d = e.duration();
                Timestamp::new(-(d.as_secs() as i64), -(d.subsec_micros() as i64))
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.seconds, (self.micros * 1000) as u32) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            None     => write!(f, "{}.{:06}", self.seconds, self.micros),
        }
    }
}
