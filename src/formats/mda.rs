//! MountainSort `.mda` arrays.
//!
//! Header: `i32` dtype code, `i32` bytes per element, `i32` dimension count
//! (negative when the dimensions are stored as `i64`), then the dimensions.
//! A two-dimensional array of shape `(columns, frames)` is stored
//! column-major, which is the same interleaved frame layout the container
//! uses.  The format has no sampling rate, so one must be supplied as an
//! attribute.  Append is not supported.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    apply_mtime, attr_sampling_rate, file_mtime, wrong_mode, Capabilities, FormatDescriptor,
    FormatPlugin, IoMode, FORMAT_API_VERSION,
};
use crate::data::{Attributes, SampleType, SampledData, Timestamp};
use crate::error::{ArfxError, Result};

pub const DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name:         "mda",
    api_version:  FORMAT_API_VERSION,
    extensions:   &[".mda"],
    capabilities: Capabilities { multi_entry: false, settable_timestamp: true },
    open:         open,
};

fn dtype_code(t: SampleType) -> Option<i32> {
    match t {
        SampleType::U8  => Some(-2),
        SampleType::F32 => Some(-3),
        SampleType::I16 => Some(-4),
        SampleType::I32 => Some(-5),
        SampleType::F64 => Some(-7),
        SampleType::I8 | SampleType::I64 => None,
    }
}

fn sample_type_for(code: i32) -> Option<SampleType> {
    match code {
        -2 => Some(SampleType::U8),
        -3 => Some(SampleType::F32),
        -4 => Some(SampleType::I16),
        -5 => Some(SampleType::I32),
        -7 => Some(SampleType::F64),
        _  => None,
    }
}

pub struct MdaFile {
    path:          PathBuf,
    mode:          IoMode,
    sampling_rate: f64,
    /// Read mode: the parsed array, taken on first read.
    /// Write mode: frames buffered until close.
    data:          Option<SampledData>,
    mtime:         Option<Timestamp>,
    pending_mtime: Option<Timestamp>,
}

pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Box<dyn FormatPlugin>> {
    Ok(Box::new(MdaFile::open(path, mode, attrs)?))
}

impl MdaFile {
    pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Self> {
        if mode == IoMode::Append {
            return Err(ArfxError::InvalidArgument(format!(
                "{}: mda files cannot be opened for append", path.display()
            )));
        }
        let sampling_rate = attr_sampling_rate(attrs)?.ok_or_else(|| {
            ArfxError::InvalidArgument(format!("{}: mda files need a sampling_rate", path.display()))
        })?;

        let (data, mtime) = if mode == IoMode::Read {
            let file = File::open(path).map_err(|e| ArfxError::open_failed(path, e))?;
            (Some(read_array(path, file)?), file_mtime(path))
        } else {
            // Create the file now so permission problems surface at open.
            File::create(path).map_err(|e| ArfxError::open_failed(path, e))?;
            (None, None)
        };

        Ok(Self { path: path.to_owned(), mode, sampling_rate, data, mtime, pending_mtime: None })
    }
}

fn read_array(path: &Path, file: File) -> Result<SampledData> {
    let bad = |reason: String| ArfxError::malformed(path, reason);
    let len = file.metadata()?.len();
    let mut r = BufReader::new(file);

    let code = r.read_i32::<LittleEndian>().map_err(|_| bad("truncated header".into()))?;
    let sample_type = sample_type_for(code).ok_or_else(|| bad(format!("unsupported dtype code {code}")))?;
    let elem = r.read_i32::<LittleEndian>()?;
    if elem as usize != sample_type.size() {
        return Err(bad(format!("{elem} bytes per element does not match {sample_type}")));
    }
    let ndims = r.read_i32::<LittleEndian>()?;
    let wide = ndims < 0;
    let ndims = ndims.unsigned_abs() as usize;
    if ndims == 0 || ndims > 50 {
        return Err(bad(format!("{ndims} dimensions")));
    }
    let mut dims = Vec::with_capacity(ndims);
    for _ in 0..ndims {
        let d = if wide { r.read_i64::<LittleEndian>()? } else { r.read_i32::<LittleEndian>()? as i64 };
        if d < 0 {
            return Err(bad(format!("negative dimension {d}")));
        }
        dims.push(d as u64);
    }
    let header = 12 + ndims as u64 * if wide { 8 } else { 4 };

    // A vector is a single column; anything beyond two dimensions folds into frames.
    let columns = if ndims == 1 { 1 } else { dims[0] };
    if columns == 0 || columns > u16::MAX as u64 {
        return Err(bad(format!("{columns} columns")));
    }
    let size = dims
        .iter()
        .try_fold(sample_type.size() as u64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| bad(format!("dimensions {dims:?} overflow")))?;
    if header.checked_add(size).map_or(true, |end| end > len) {
        return Err(bad(format!("header promises {size} data bytes, file has {}", len.saturating_sub(header))));
    }
    let mut bytes = vec![0u8; size as usize];
    r.read_exact(&mut bytes)?;
    SampledData::new(sample_type, columns as u16, bytes)
}

fn write_array(path: &Path, data: &SampledData) -> Result<()> {
    let code = dtype_code(data.sample_type()).ok_or_else(|| {
        ArfxError::TypeMismatch(format!("mda files cannot store {} samples", data.sample_type()))
    })?;
    let file = File::create(path).map_err(|e| ArfxError::open_failed(path, e))?;
    let mut w = BufWriter::new(file);
    w.write_i32::<LittleEndian>(code)?;
    w.write_i32::<LittleEndian>(data.sample_type().size() as i32)?;
    let (columns, frames) = (data.columns() as i64, data.frames() as i64);
    if frames > i32::MAX as i64 {
        w.write_i32::<LittleEndian>(-2)?;
        w.write_i64::<LittleEndian>(columns)?;
        w.write_i64::<LittleEndian>(frames)?;
    } else {
        w.write_i32::<LittleEndian>(2)?;
        w.write_i32::<LittleEndian>(columns as i32)?;
        w.write_i32::<LittleEndian>(frames as i32)?;
    }
    w.write_all(data.as_bytes())?;
    w.flush()?;
    Ok(())
}

impl FormatPlugin for MdaFile {
    fn read(&mut self) -> Result<Option<SampledData>> {
        if self.mode != IoMode::Read {
            return Err(wrong_mode(self.mode));
        }
        Ok(self.data.take())
    }

    fn write(&mut self, data: &SampledData) -> Result<()> {
        if self.mode != IoMode::Write {
            return Err(wrong_mode(self.mode));
        }
        if dtype_code(data.sample_type()).is_none() {
            return Err(ArfxError::TypeMismatch(format!(
                "mda files cannot store {} samples", data.sample_type()
            )));
        }
        match &mut self.data {
            Some(buffered) => buffered.extend(data)?,
            None           => self.data = Some(data.clone()),
        }
        Ok(())
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.pending_mtime.or(self.mtime)
    }

    fn set_timestamp(&mut self, ts: Timestamp) -> Result<()> {
        self.pending_mtime = Some(ts);
        Ok(())
    }

    fn sampling_rate(&self) -> f64 { self.sampling_rate }

    fn close(self: Box<Self>) -> Result<()> {
        if self.mode == IoMode::Write {
            let empty;
            let data = match &self.data {
                Some(d) => d,
                None    => {
                    empty = SampledData::new(SampleType::I16, 1, Vec::new())?;
                    &empty
                }
            };
            write_array(&self.path, data)?;
        }
        if let Some(ts) = self.pending_mtime {
            apply_mtime(&self.path, ts)?;
        }
        Ok(())
    }
}
