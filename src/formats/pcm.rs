//! Headerless raw sample files.
//!
//! Nothing about the data is stored in the file, so the element type,
//! channel count and sampling rate come from the open attributes (`dtype`,
//! `nchannels`, `sampling_rate`) and default to mono `i16` at 20 kHz.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{
    apply_mtime, attr_columns, attr_sample_type, attr_sampling_rate, file_mtime, wrong_mode,
    Capabilities, FormatDescriptor, FormatPlugin, IoMode, FORMAT_API_VERSION,
};
use crate::data::{Attributes, SampleType, SampledData, Timestamp};
use crate::error::{ArfxError, Result};

pub const DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name:         "pcm",
    api_version:  FORMAT_API_VERSION,
    extensions:   &[".pcm"],
    capabilities: Capabilities { multi_entry: false, settable_timestamp: true },
    open:         open,
};

pub const DEFAULT_SAMPLE_TYPE: SampleType = SampleType::I16;
pub const DEFAULT_SAMPLING_RATE: f64 = 20_000.0;

pub struct PcmFile {
    path:          PathBuf,
    mode:          IoMode,
    file:          File,
    sample_type:   SampleType,
    columns:       u16,
    sampling_rate: f64,
    consumed:      bool,
    mtime:         Option<Timestamp>,
    pending_mtime: Option<Timestamp>,
}

pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Box<dyn FormatPlugin>> {
    Ok(Box::new(PcmFile::open(path, mode, attrs)?))
}

impl PcmFile {
    pub fn open(path: &Path, mode: IoMode, attrs: &Attributes) -> Result<Self> {
        let sample_type = attr_sample_type(attrs)?.unwrap_or(DEFAULT_SAMPLE_TYPE);
        let columns = attr_columns(attrs)?.unwrap_or(1);
        let sampling_rate = attr_sampling_rate(attrs)?.unwrap_or(DEFAULT_SAMPLING_RATE);

        let mut opts = OpenOptions::new();
        match mode {
            IoMode::Read   => opts.read(true),
            IoMode::Write  => opts.write(true).create(true).truncate(true),
            IoMode::Append => opts.append(true),
        };
        let file = opts.open(path).map_err(|e| ArfxError::open_failed(path, e))?;

        if mode != IoMode::Write {
            let frame = (sample_type.size() * columns as usize) as u64;
            let len = file.metadata()?.len();
            if len % frame != 0 {
                return Err(ArfxError::malformed(path, format!(
                    "{len} bytes is not a whole number of {columns}x{sample_type} frames"
                )));
            }
        }

        Ok(Self {
            path: path.to_owned(),
            mode,
            file,
            sample_type,
            columns,
            sampling_rate,
            consumed: false,
            mtime: if mode == IoMode::Write { None } else { file_mtime(path) },
            pending_mtime: None,
        })
    }
}

impl FormatPlugin for PcmFile {
    fn read(&mut self) -> Result<Option<SampledData>> {
        if self.mode != IoMode::Read {
            return Err(wrong_mode(self.mode));
        }
        if self.consumed {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        self.consumed = true;
        Ok(Some(SampledData::new(self.sample_type, self.columns, bytes)?))
    }

    fn write(&mut self, data: &SampledData) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(wrong_mode(self.mode));
        }
        if data.sample_type() != self.sample_type || data.columns() != self.columns {
            return Err(ArfxError::TypeMismatch(format!(
                "{}: file is {}x{}, payload is {}x{}",
                self.path.display(), self.sample_type, self.columns, data.sample_type(), data.columns()
            )));
        }
        self.file.write_all(data.as_bytes())?;
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
        if self.mode.is_writable() {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        if let Some(ts) = self.pending_mtime {
            apply_mtime(&self.path, ts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AttrValue;
    use tempfile::tempdir;

    #[test]
    fn defaults_to_mono_i16_at_20k() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.pcm");
        std::fs::write(&path, [1u8, 0, 2, 0, 3, 0]).unwrap();

        let mut r = PcmFile::open(&path, IoMode::Read, &Attributes::new()).unwrap();
        assert_eq!(r.sampling_rate(), DEFAULT_SAMPLING_RATE);
        let data = r.read().unwrap().unwrap();
        assert_eq!(data.to_i16_vec().unwrap(), vec![1, 2, 3]);
        assert!(r.read().unwrap().is_none());
    }

    #[test]
    fn partial_frame_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.pcm");
        std::fs::write(&path, [0u8; 5]).unwrap();
        let err = PcmFile::open(&path, IoMode::Read, &Attributes::new()).err().unwrap();
        assert_eq!(err.kind(), "Malformed");
    }

    #[test]
    fn writer_checks_layout_and_applies_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut attrs = Attributes::new();
        attrs.insert("nchannels".into(), AttrValue::Int(2));

        let mut w = PcmFile::open(&path, IoMode::Write, &attrs).unwrap();
        let mono = SampledData::from_i16(&[1, 2], 1).unwrap();
        assert_eq!(w.write(&mono).unwrap_err().kind(), "TypeMismatch");
        w.write(&SampledData::from_i16(&[1, 2], 2).unwrap()).unwrap();
        w.set_timestamp(Timestamp::new(1_000_000_000, 0)).unwrap();
        Box::new(w).close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);
        assert_eq!(file_mtime(&path).unwrap().seconds, 1_000_000_000);
    }
}
