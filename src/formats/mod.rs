//! Format plugins: adapters between external file formats and the
//! container's data model.
//!
//! A plugin is described by a [`FormatDescriptor`] (identity, API version,
//! extensions, capability flags and an open function) and, once opened, is a
//! [`FormatPlugin`] trait object bound to one file and one [`IoMode`].
//!
//! # Contract
//! - `open` fails with `NotFound`/`AccessDenied` when the path cannot be
//!   opened for the mode, and with `InvalidArgument` for an unsupported mode
//!   or an attribute value that contradicts the file (for example a sampling
//!   rate that disagrees with a WAVE header).  Attributes a plugin does not
//!   understand are ignored.
//! - `read` returns `Ok(None)` at end of data; that is never an error.
//! - `write` fails with `WrongMode` on a reader and `TypeMismatch` when the
//!   payload cannot be represented in the format.
//! - `nentries`/`set_entry` are only called when the descriptor declares
//!   [`Capabilities::multi_entry`]; `set_timestamp` only when it declares
//!   [`Capabilities::settable_timestamp`].
//! - `close` must be called to finish writers; pending timestamps are
//!   applied there.

pub mod mda;
pub mod pcm;
pub mod registry;
pub mod wav;

use std::fs;
use std::path::Path;

use filetime::FileTime;

use crate::data::{Attributes, SampleType, SampledData, Timestamp};
use crate::error::{ArfxError, Result};

pub use registry::{FormatRegistry, OpenedFormat};

/// Version of the plugin contract implemented by this host.  Descriptors
/// declaring a newer version are rejected at registration.
pub const FORMAT_API_VERSION: u32 = 1;

/// I/O mode a plugin is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Read,
    Write,
    Append,
}

impl IoMode {
    pub fn name(self) -> &'static str {
        match self {
            IoMode::Read   => "read",
            IoMode::Write  => "write",
            IoMode::Append => "append",
        }
    }

    pub fn is_writable(self) -> bool { self != IoMode::Read }
}

/// Optional capabilities, declared once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The format holds several entries; `nentries`/`set_entry` are live.
    pub multi_entry:        bool,
    /// `set_timestamp` is honoured.
    pub settable_timestamp: bool,
}

pub type OpenFn = fn(&Path, IoMode, &Attributes) -> Result<Box<dyn FormatPlugin>>;

/// Registration record for one plugin.
#[derive(Clone, Copy)]
pub struct FormatDescriptor {
    /// Identity.  Re-registering the same name replaces the old descriptor.
    pub name:         &'static str,
    pub api_version:  u32,
    /// Extensions including the leading dot, e.g. `".wav"`.
    pub extensions:   &'static [&'static str],
    pub capabilities: Capabilities,
    pub open:         OpenFn,
}

impl std::fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("name", &self.name)
            .field("api_version", &self.api_version)
            .field("extensions", &self.extensions)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// An open external file.
pub trait FormatPlugin {
    /// Read the active entry.  `Ok(None)` once it has been consumed.
    fn read(&mut self) -> Result<Option<SampledData>>;

    fn write(&mut self, data: &SampledData) -> Result<()>;

    fn timestamp(&self) -> Option<Timestamp>;

    fn set_timestamp(&mut self, _ts: Timestamp) -> Result<()> {
        Err(ArfxError::InvalidArgument("timestamp is read-only for this format".into()))
    }

    /// Sampling rate in Hz.
    fn sampling_rate(&self) -> f64;

    fn nentries(&self) -> usize { 1 }

    /// Select the active entry and rewind it.
    fn set_entry(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(ArfxError::InvalidArgument(format!("entry {index} out of range")))
        }
    }

    fn close(self: Box<Self>) -> Result<()>;
}

/// Built-in plugins, in registration order.
pub const BUILTIN_FORMATS: &[FormatDescriptor] = &[wav::DESCRIPTOR, pcm::DESCRIPTOR, mda::DESCRIPTOR];

// ── Attribute helpers ────────────────────────────────────────────────────────

/// Numeric attribute; present-but-unparseable is an error.
pub fn attr_f64(attrs: &Attributes, key: &str) -> Result<Option<f64>> {
    match attrs.get(key) {
        None    => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            ArfxError::InvalidArgument(format!("attribute {key}={v} is not a number"))
        }),
    }
}

pub fn attr_sampling_rate(attrs: &Attributes) -> Result<Option<f64>> {
    match attr_f64(attrs, "sampling_rate")? {
        Some(r) if r.is_nan() || r <= 0.0 => {
            Err(ArfxError::InvalidArgument(format!("sampling_rate must be positive, got {r}")))
        }
        other => Ok(other),
    }
}

pub fn attr_sample_type(attrs: &Attributes) -> Result<Option<SampleType>> {
    attrs.get("dtype").map(|v| v.to_string().parse()).transpose()
}

pub fn attr_columns(attrs: &Attributes) -> Result<Option<u16>> {
    match attrs.get("nchannels") {
        None    => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 && n <= u16::MAX as i64 => Ok(Some(n as u16)),
            _ => Err(ArfxError::InvalidArgument(format!("nchannels={v} is not a valid channel count"))),
        },
    }
}

// ── Timestamp helpers ────────────────────────────────────────────────────────

/// Modification time of `path`, used as the recording time by formats that
/// do not store one.
pub fn file_mtime(path: &Path) -> Option<Timestamp> {
    fs::metadata(path).and_then(|m| m.modified()).ok().map(Timestamp::from)
}

pub fn apply_mtime(path: &Path, ts: Timestamp) -> Result<()> {
    let ft = FileTime::from_unix_time(ts.seconds, (ts.micros * 1000) as u32);
    filetime::set_file_mtime(path, ft)?;
    Ok(())
}

pub(crate) fn wrong_mode(mode: IoMode) -> ArfxError {
    ArfxError::WrongMode { mode: mode.name() }
}
