//! RIFF WAVE plugin.
//!
//! Reads PCM (8/16/32-bit integer), IEEE float (32/64-bit) and
//! `WAVE_FORMAT_EXTENSIBLE` files; writes canonical 44-byte-header files.
//! The sampling rate is stored as an integer, so writers reject fractional
//! rates.  Appending requires the `data` chunk to be the last chunk.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    apply_mtime, attr_columns, attr_sample_type, attr_sampling_rate, file_mtime, wrong_mode,
    Capabilities, FormatDescriptor, FormatPlugin, IoMode, FORMAT_API_VERSION,
};
use crate::data::{Attributes, SampleType, SampledData, Timestamp};
use crate::error::{ArfxError, Result};

pub const DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name:         "wav",
    api_version:  FORMAT_API_VERSION,
    extensions:   &[".wav"],
    capabilities: Capabilities { multi_entry: false, settable_timestamp: true },
    open:         open,
};

const TAG_PCM: u16 = 1;
const TAG_FLOAT: u16 = 3;
const TAG_EXTENSIBLE: u16 = 0xFFFE;
const CANONICAL_HEADER: u64 = 44;

#[derive(Debug, Clone, Copy, PartialEq)]
struct WavFormat {
    sample_type: SampleType,
    columns:     u16,
}

impl WavFormat {
    fn tag(self) -> u16 {
        if self.sample_type.is_float() { TAG_FLOAT } else { TAG_PCM }
    }

    fn block_align(self) -> u32 {
        self.sample_type.size() as u32 * u32::from(self.columns)
    }

    /// `(byte rate, block align)` header fields at `rate` Hz, when both fit.
    fn header_rates(self, rate: u32) -> Option<(u32, u16)> {
        let align = u16::try_from(self.block_align()).ok()?;
        Some((rate.checked_mul(u32::from(align))?, align))
    }
}

fn check_writable(sample_type: SampleType) -> Result<()> {
    match sample_type {
        SampleType::U8 | SampleType::I16 | SampleType::I32 | SampleType::F32 | SampleType::F64 => Ok(()),
        other => Err(ArfxError::TypeMismatch(format!("WAVE files cannot store {other} samples"))),
    }
}

fn sample_type_for(tag: u16, bits: u16) -> Option<SampleType> {
    match (tag, bits) {
        (TAG_PCM, 8)    => Some(SampleType::U8),
        (TAG_PCM, 16)   => Some(SampleType::I16),
        (TAG_PCM, 32)   => Some(SampleType::I32),
        (TAG_FLOAT, 32) => Some(SampleType::F32),
        (TAG_FLOAT, 64) => Some(SampleType::F64),
        _               => None,
    }
}

/// Parsed header of an existing file.
struct Header {
    format:        WavFormat,
    sampling_rate: u32,
    data_offset:   u64,
    data_len:      u64,
    data_is_last:  bool,
}

fn parse_header(path: &Path, file: &mut File) -> Result<Header> {
    let bad = |reason: &str| ArfxError::malformed(path, reason);
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(&mut *file);

    let mut tag = [0u8; 4];
    r.read_exact(&mut tag).map_err(|_| bad("file too short"))?;
    if &tag != b"RIFF" {
        return Err(bad("missing RIFF tag"));
    }
    let _riff_len = r.read_u32::<LittleEndian>()?;
    r.read_exact(&mut tag)?;
    if &tag != b"WAVE" {
        return Err(bad("not a WAVE file"));
    }

    let mut fmt: Option<(WavFormat, u32)> = None;
    let mut pos = 12u64;
    while pos + 8 <= file_len {
        r.read_exact(&mut tag)?;
        let size = r.read_u32::<LittleEndian>()? as u64;
        pos += 8;
        match &tag {
            b"fmt " => {
                if size < 16 {
                    return Err(bad("fmt chunk too short"));
                }
                let mut format_tag = r.read_u16::<LittleEndian>()?;
                let columns = r.read_u16::<LittleEndian>()?;
                let rate = r.read_u32::<LittleEndian>()?;
                let _byte_rate = r.read_u32::<LittleEndian>()?;
                let _block_align = r.read_u16::<LittleEndian>()?;
                let bits = r.read_u16::<LittleEndian>()?;
                let mut consumed = 16u64;
                if format_tag == TAG_EXTENSIBLE {
                    if size < 40 {
                        return Err(bad("extensible fmt chunk too short"));
                    }
                    let _cb_size = r.read_u16::<LittleEndian>()?;
                    let _valid_bits = r.read_u16::<LittleEndian>()?;
                    let _channel_mask = r.read_u32::<LittleEndian>()?;
                    format_tag = r.read_u16::<LittleEndian>()?;
                    consumed += 10;
                }
                let sample_type = sample_type_for(format_tag, bits)
                    .ok_or_else(|| bad(&format!("unsupported encoding (tag {format_tag}, {bits} bits)")))?;
                if columns == 0 {
                    return Err(bad("zero channels"));
                }
                r.seek_relative((size + size % 2 - consumed) as i64)?;
                fmt = Some((WavFormat { sample_type, columns }, rate));
            }
            b"data" => {
                let (format, sampling_rate) = fmt.ok_or_else(|| bad("data chunk before fmt chunk"))?;
                let data_len = size.min(file_len.saturating_sub(pos));
                return Ok(Header {
                    format,
                    sampling_rate,
                    data_offset: pos,
                    data_len,
                    data_is_last: pos + data_len + data_len % 2 >= file_len,
                });
            }
            _ => {
                r.seek_relative((size + size % 2) as i64)?;
            }
        }
        pos += size + size % 2;
    }
    Err(bad("no data chunk"))
}

pub struct WavFile {
    path:          PathBuf,
    mode:          IoMode,
    file:          File,
    format:        Option<WavFormat>,
    sampling_rate: f64,
    data_offset:   u64,
    data_len:      u64,
    consumed:      bool,
    mtime:         Option<Timestamp>,
    pending_mtime: Option<Timestamp>,
}

pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Box<dyn FormatPlugin>> {
    Ok(Box::new(WavFile::open(path, mode, attrs)?))
}

impl WavFile {
    pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Self> {
        let rate_attr = attr_sampling_rate(attrs)?;
        let type_attr = attr_sample_type(attrs)?;
        let cols_attr = attr_columns(attrs)?;

        match mode {
            IoMode::Read | IoMode::Append => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(mode == IoMode::Append)
                    .open(path)
                    .map_err(|e| ArfxError::open_failed(path, e))?;
                let header = parse_header(path, &mut file)?;
                if let Some(rate) = rate_attr {
                    if rate != header.sampling_rate as f64 {
                        return Err(ArfxError::InvalidArgument(format!(
                            "{}: sampling rate is fixed at {} Hz by the file header, got {rate}",
                            path.display(), header.sampling_rate
                        )));
                    }
                }
                if mode == IoMode::Append {
                    if type_attr.is_some_and(|t| t != header.format.sample_type)
                        || cols_attr.is_some_and(|c| c != header.format.columns)
                    {
                        return Err(ArfxError::InvalidArgument(format!(
                            "{}: sample format differs from the existing file", path.display()
                        )));
                    }
                    if !header.data_is_last {
                        return Err(ArfxError::InvalidArgument(format!(
                            "{}: cannot append, data chunk is not the last chunk", path.display()
                        )));
                    }
                }
                Ok(Self {
                    path:          path.to_owned(),
                    mode,
                    file,
                    format:        Some(header.format),
                    sampling_rate: header.sampling_rate as f64,
                    data_offset:   header.data_offset,
                    data_len:      header.data_len,
                    consumed:      false,
                    mtime:         file_mtime(path),
                    pending_mtime: None,
                })
            }
            IoMode::Write => {
                let rate = rate_attr.ok_or_else(|| {
                    ArfxError::InvalidArgument(format!("{}: sampling_rate is required", path.display()))
                })?;
                if rate.fract() != 0.0 || rate > u32::MAX as f64 {
                    return Err(ArfxError::InvalidArgument(format!(
                        "{}: WAVE files need an integral sampling rate, got {rate}", path.display()
                    )));
                }
                let format = match type_attr {
                    Some(sample_type) => {
                        check_writable(sample_type).map_err(|e| ArfxError::InvalidArgument(e.to_string()))?;
                        Some(WavFormat { sample_type, columns: cols_attr.unwrap_or(1) })
                    }
                    None => None,
                };
                if format.is_some_and(|f| f.header_rates(rate as u32).is_none()) {
                    return Err(ArfxError::InvalidArgument(format!(
                        "{}: {rate} Hz overflows the WAVE byte rate", path.display()
                    )));
                }
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| ArfxError::open_failed(path, e))?;
                file.write_all(&[0u8; CANONICAL_HEADER as usize])?;
                Ok(Self {
                    path:          path.to_owned(),
                    mode,
                    file,
                    format,
                    sampling_rate: rate,
                    data_offset:   CANONICAL_HEADER,
                    data_len:      0,
                    consumed:      false,
                    mtime:         None,
                    pending_mtime: None,
                })
            }
        }
    }

    fn write_canonical_header(&mut self, format: WavFormat) -> Result<()> {
        let (byte_rate, block_align) = self.header_rates(format)?;
        let pad = self.data_len % 2;
        let f = &mut self.file;
        f.seek(SeekFrom::Start(0))?;
        f.write_all(b"RIFF")?;
        f.write_u32::<LittleEndian>((36 + self.data_len + pad) as u32)?;
        f.write_all(b"WAVE")?;
        f.write_all(b"fmt ")?;
        f.write_u32::<LittleEndian>(16)?;
        f.write_u16::<LittleEndian>(format.tag())?;
        f.write_u16::<LittleEndian>(format.columns)?;
        f.write_u32::<LittleEndian>(self.sampling_rate as u32)?;
        f.write_u32::<LittleEndian>(byte_rate)?;
        f.write_u16::<LittleEndian>(block_align)?;
        f.write_u16::<LittleEndian>(format.sample_type.size() as u16 * 8)?;
        f.write_all(b"data")?;
        f.write_u32::<LittleEndian>(self.data_len as u32)?;
        Ok(())
    }

    fn header_rates(&self, format: WavFormat) -> Result<(u32, u16)> {
        format.header_rates(self.sampling_rate as u32).ok_or_else(|| {
            ArfxError::InvalidArgument(format!(
                "{}: {} Hz with {}x{} samples overflows the WAVE header",
                self.path.display(), self.sampling_rate, format.columns, format.sample_type
            ))
        })
    }

    /// Patch the RIFF and data chunk sizes of an appended file in place.
    fn patch_sizes(&mut self) -> io::Result<()> {
        let pad = self.data_len % 2;
        let riff_len = self.data_offset + self.data_len + pad - 8;
        self.file.seek(SeekFrom::Start(4))?;
        self.file.write_u32::<LittleEndian>(riff_len as u32)?;
        self.file.seek(SeekFrom::Start(self.data_offset - 4))?;
        self.file.write_u32::<LittleEndian>(self.data_len as u32)
    }
}

impl FormatPlugin for WavFile {
    fn read(&mut self) -> Result<Option<SampledData>> {
        if self.mode != IoMode::Read {
            return Err(wrong_mode(self.mode));
        }
        if self.consumed {
            return Ok(None);
        }
        let format = self.format.ok_or_else(|| ArfxError::malformed(&self.path, "no fmt chunk"))?;
        let usable = self.data_len - self.data_len % u64::from(format.block_align());
        let mut bytes = vec![0u8; usable as usize];
        self.file.seek(SeekFrom::Start(self.data_offset))?;
        self.file.read_exact(&mut bytes)?;
        self.consumed = true;
        Ok(Some(SampledData::new(format.sample_type, format.columns, bytes)?))
    }

    fn write(&mut self, data: &SampledData) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(wrong_mode(self.mode));
        }
        check_writable(data.sample_type())?;
        let incoming = WavFormat { sample_type: data.sample_type(), columns: data.columns() };
        match self.format {
            None => {
                self.header_rates(incoming)?;
                self.format = Some(incoming);
            }
            Some(f) if f == incoming => {}
            Some(f) => {
                return Err(ArfxError::TypeMismatch(format!(
                    "{}: file holds {}x{} samples, got {}x{}",
                    self.path.display(), f.sample_type, f.columns, data.sample_type(), data.columns()
                )));
            }
        }
        if self.data_len + data.as_bytes().len() as u64 > u32::MAX as u64 - CANONICAL_HEADER {
            return Err(ArfxError::TypeMismatch("payload exceeds the 4 GiB WAVE limit".into()));
        }
        self.file.seek(SeekFrom::Start(self.data_offset + self.data_len))?;
        self.file.write_all(data.as_bytes())?;
        self.data_len += data.as_bytes().len() as u64;
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

    fn close(mut self: Box<Self>) -> Result<()> {
        match self.mode {
            IoMode::Read => {}
            IoMode::Write => {
                let format = self.format.unwrap_or(WavFormat { sample_type: SampleType::I16, columns: 1 });
                if self.data_len % 2 == 1 {
                    self.file.seek(SeekFrom::End(0))?;
                    self.file.write_all(&[0])?;
                }
                self.write_canonical_header(format)?;
            }
            IoMode::Append => {
                self.file.set_len(self.data_offset + self.data_len)?;
                if self.data_len % 2 == 1 {
                    self.file.seek(SeekFrom::End(0))?;
                    self.file.write_all(&[0])?;
                }
                self.patch_sizes()?;
            }
        }
        self.file.flush()?;
        if let Some(ts) = self.pending_mtime {
            self.file.sync_all()?;
            apply_mtime(&self.path, ts)?;
        }
        Ok(())
    }
}
