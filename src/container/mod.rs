//! High-level [`Container`] API: the entry / channel / attribute surface the
//! operation dispatcher programs against.
//!
//! ```no_run
//! use arfx::container::{Container, ContainerOptions, NewChannel, OpenMode};
//! use arfx::data::{Attributes, DataType, Payload, SampledData, Timestamp};
//!
//! let mut c = Container::create("song.arf", ContainerOptions::default())?;
//! let data = SampledData::from_i16(&[0, 1, 2, 3], 1)?;
//! c.create_entry("song", Timestamp::now(), Attributes::new(), vec![
//!     NewChannel::sampled("pcm", DataType::ACOUSTIC, 20000.0, data),
//! ])?;
//! c.close()?;
//!
//! let mut c = Container::open("song.arf", OpenMode::Read)?;
//! let payload = c.read_channel("song", "pcm")?;
//! # let _ = payload;
//! # Ok::<(), arfx::ArfxError>(())
//! ```

use std::path::Path;

use uuid::Uuid;

use crate::compression::Compression;
use crate::data::{AttrValue, Attributes, DataType, Payload, SampledData, Timestamp};
use crate::error::{ArfxError, Result};
use crate::index::{ChannelRecord, EntryRecord, Layout};
use crate::store::BlockStore;

// ── Options ──────────────────────────────────────────────────────────────────

/// How to open a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing container, no mutation.
    Read,
    /// Existing container, mutable.
    ReadWrite,
    /// Truncate or create.
    Create,
    /// Open mutable, creating the file if it does not exist.
    Append,
}

/// Configuration applied to blocks written through a container handle.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    pub compression: Compression,
}

// ── NewChannel ───────────────────────────────────────────────────────────────

/// A channel to be stored in a newly created entry.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name:          String,
    pub datatype:      DataType,
    pub sampling_rate: Option<f64>,
    pub units:         String,
    pub attrs:         Attributes,
    pub payload:       Payload,
}

impl NewChannel {
    pub fn sampled(name: &str, datatype: DataType, sampling_rate: f64, data: SampledData) -> Self {
        Self {
            name:          name.to_owned(),
            datatype,
            sampling_rate: Some(sampling_rate),
            units:         String::new(),
            attrs:         Attributes::new(),
            payload:       Payload::Sampled(data),
        }
    }

    pub fn events(name: &str, datatype: DataType, units: &str, times: Vec<f64>) -> Self {
        Self {
            name:          name.to_owned(),
            datatype,
            sampling_rate: None,
            units:         units.to_owned(),
            attrs:         Attributes::new(),
            payload:       Payload::Events(times),
        }
    }
}

// ── Container ────────────────────────────────────────────────────────────────

pub struct Container {
    store:       BlockStore,
    compression: Compression,
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ArfxError::InvalidArgument(format!("invalid entry or channel name '{name}'")));
    }
    Ok(())
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

impl Container {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open_with(path, mode, ContainerOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: OpenMode, opts: ContainerOptions) -> Result<Self> {
        let path = path.as_ref();
        let store = match mode {
            OpenMode::Read      => BlockStore::open(path, false)?,
            OpenMode::ReadWrite => BlockStore::open(path, true)?,
            OpenMode::Create    => BlockStore::create(path)?,
            OpenMode::Append if path.exists() => BlockStore::open(path, true)?,
            OpenMode::Append    => BlockStore::create(path)?,
        };
        Ok(Self { store, compression: opts.compression })
    }

    pub fn create<P: AsRef<Path>>(path: P, opts: ContainerOptions) -> Result<Self> {
        Self::open_with(path, OpenMode::Create, opts)
    }

    /// Write the index and release the file.
    pub fn close(mut self) -> Result<()> {
        self.store.commit()
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { self.store.path() }
    pub fn uuid(&self) -> Uuid { self.store.superblock.uuid }
    pub fn compression(&self) -> Compression { self.compression }
    pub fn file_size(&self) -> Result<u64> { self.store.file_size() }

    pub(crate) fn set_uuid(&mut self, uuid: Uuid) -> Result<()> {
        self.store.mark_dirty()?;
        self.store.superblock.uuid = uuid;
        Ok(())
    }

    pub fn attrs(&self) -> &Attributes { &self.store.index.attrs }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.store.index.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: &str, value: AttrValue) -> Result<()> {
        self.store.mark_dirty()?;
        self.store.index.attrs.insert(key.to_owned(), value);
        Ok(())
    }

    // ── Entries ──────────────────────────────────────────────────────────────

    /// Entries in creation order.
    pub fn entries(&self) -> &[EntryRecord] { &self.store.index.entries }

    pub fn entry(&self, name: &str) -> Option<&EntryRecord> { self.store.index.get(name) }

    pub fn contains(&self, name: &str) -> bool { self.store.index.position(name).is_some() }

    pub fn len(&self) -> usize { self.store.index.entries.len() }

    pub fn is_empty(&self) -> bool { self.store.index.entries.is_empty() }

    pub fn entry_names(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.name.clone()).collect()
    }

    /// Create an entry with its channels.  The entry becomes visible only
    /// once every channel's data has been written.
    pub fn create_entry(
        &mut self,
        name:      &str,
        timestamp: Timestamp,
        attrs:     Attributes,
        channels:  Vec<NewChannel>,
    ) -> Result<()> {
        check_name(name)?;
        if self.contains(name) {
            return Err(ArfxError::NameConflict { name: name.to_owned() });
        }

        let mut records: Vec<ChannelRecord> = Vec::with_capacity(channels.len());
        for ch in channels {
            check_name(&ch.name)?;
            if records.iter().any(|r| r.name == ch.name) {
                return Err(ArfxError::NameConflict { name: format!("{name}/{}", ch.name) });
            }
            if let Some(rate) = ch.sampling_rate {
                if rate.is_nan() || rate <= 0.0 {
                    return Err(ArfxError::InvalidArgument(format!("sampling rate must be positive, got {rate}")));
                }
            }
            let (layout, bytes) = match ch.payload {
                Payload::Sampled(data) => (
                    Layout::Sampled { sample_type: data.sample_type(), columns: data.columns() },
                    data.into_bytes(),
                ),
                Payload::Events(times) => (Layout::Events, Payload::events_to_bytes(&times)),
            };
            if matches!(layout, Layout::Sampled { .. }) && ch.sampling_rate.is_none() {
                return Err(ArfxError::InvalidArgument(format!("sampled channel '{}' needs a sampling rate", ch.name)));
            }
            let blocks = self.store.write_payload(&bytes, self.compression)?;
            records.push(ChannelRecord {
                name:          ch.name,
                datatype:      ch.datatype,
                sampling_rate: ch.sampling_rate,
                units:         ch.units,
                layout,
                blocks,
                attrs:         ch.attrs,
            });
        }

        self.store.index.entries.push(EntryRecord {
            name:      name.to_owned(),
            uuid:      Uuid::new_v4(),
            timestamp,
            attrs,
            channels:  records,
        });
        self.store.mark_dirty()
    }

    /// Append frames to an existing sampled channel.  Rejected unless the
    /// sampling rate, datatype, element type and column count all match the
    /// channel as created.
    pub fn append_samples(
        &mut self,
        entry:         &str,
        channel:       &str,
        sampling_rate: f64,
        datatype:      DataType,
        data:          &SampledData,
    ) -> Result<()> {
        let record = self.entry(entry)
            .ok_or_else(|| ArfxError::NoSuchEntry(entry.to_owned()))?
            .channel(channel)
            .ok_or_else(|| ArfxError::NoSuchEntry(format!("{entry}/{channel}")))?;

        match record.layout {
            Layout::Sampled { sample_type, columns }
                if sample_type == data.sample_type() && columns == data.columns() => {}
            Layout::Sampled { sample_type, columns } => {
                return Err(ArfxError::TypeMismatch(format!(
                    "/{entry}/{channel} holds {sample_type}x{columns}, got {}x{}",
                    data.sample_type(), data.columns()
                )));
            }
            Layout::Events => {
                return Err(ArfxError::TypeMismatch(format!("/{entry}/{channel} is an event channel")));
            }
        }
        if !record.sampling_rate.is_some_and(|r| same_rate(r, sampling_rate)) {
            return Err(ArfxError::TypeMismatch(format!(
                "/{entry}/{channel} sampling rate is {:?} Hz, got {sampling_rate} Hz", record.sampling_rate
            )));
        }
        if record.datatype != datatype {
            return Err(ArfxError::TypeMismatch(format!(
                "/{entry}/{channel} datatype is {}, got {datatype}", record.datatype
            )));
        }

        let blocks = self.store.write_payload(data.as_bytes(), self.compression)?;
        let record = self.store.index.get_mut(entry)
            .and_then(|e| e.channels.iter_mut().find(|c| c.name == channel))
            .ok_or_else(|| ArfxError::NoSuchEntry(format!("{entry}/{channel}")))?;
        record.blocks.extend(blocks);
        Ok(())
    }

    /// Read a channel's full payload.
    pub fn read_channel(&mut self, entry: &str, channel: &str) -> Result<Payload> {
        let record = self.entry(entry)
            .ok_or_else(|| ArfxError::NoSuchEntry(entry.to_owned()))?
            .channel(channel)
            .ok_or_else(|| ArfxError::NoSuchEntry(format!("{entry}/{channel}")))?
            .clone();
        let bytes = self.store.read_payload(&record.blocks)?;
        match record.layout {
            Layout::Sampled { sample_type, columns } => {
                Ok(Payload::Sampled(SampledData::new(sample_type, columns, bytes)?))
            }
            Layout::Events => Ok(Payload::Events(Payload::events_from_bytes(&bytes))),
        }
    }

    /// Remove an entry from the namespace.  Its blocks stay in the file
    /// until the container is repacked.
    ///
    /// The change lands in the next committed index, which is appended like
    /// every other write, so without a repack the file grows by one index
    /// block rather than staying at its previous size.
    pub fn delete_entry(&mut self, name: &str) -> Result<EntryRecord> {
        self.store.mark_dirty()?;
        let pos = self.store.index.position(name)
            .ok_or_else(|| ArfxError::NoSuchEntry(name.to_owned()))?;
        Ok(self.store.index.entries.remove(pos))
    }

    pub fn rename_entry(&mut self, from: &str, to: &str) -> Result<()> {
        check_name(to)?;
        self.store.mark_dirty()?;
        if from == to {
            return Ok(());
        }
        if self.contains(to) {
            return Err(ArfxError::NameConflict { name: to.to_owned() });
        }
        let entry = self.store.index.get_mut(from)
            .ok_or_else(|| ArfxError::NoSuchEntry(from.to_owned()))?;
        entry.name = to.to_owned();
        Ok(())
    }

    /// Apply several renames at once.  Only the final namespace has to be
    /// collision-free, so entries may swap names.
    pub fn rename_entries(&mut self, renames: &[(String, String)]) -> Result<()> {
        self.store.mark_dirty()?;
        let mut names = self.entry_names();
        for (from, to) in renames {
            check_name(to)?;
            let pos = self.store.index.position(from)
                .ok_or_else(|| ArfxError::NoSuchEntry(from.clone()))?;
            names[pos] = to.clone();
        }
        let mut sorted = names.clone();
        sorted.sort();
        if let Some(dup) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(ArfxError::NameConflict { name: dup[0].clone() });
        }
        for (entry, name) in self.store.index.entries.iter_mut().zip(names) {
            entry.name = name;
        }
        Ok(())
    }

    /// Add or override attributes on an existing entry.
    pub fn set_entry_attrs(&mut self, name: &str, attrs: &Attributes) -> Result<()> {
        self.store.mark_dirty()?;
        let entry = self.store.index.get_mut(name)
            .ok_or_else(|| ArfxError::NoSuchEntry(name.to_owned()))?;
        entry.attrs.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    /// Copy entry `name` from `src` into this container as `new_name`.
    ///
    /// With `recompress == None` the stored blocks are copied byte for byte;
    /// otherwise each block is decoded and re-encoded.
    pub fn copy_entry_from(
        &mut self,
        src:        &mut Container,
        name:       &str,
        new_name:   &str,
        recompress: Option<Compression>,
    ) -> Result<()> {
        check_name(new_name)?;
        self.store.mark_dirty()?;
        if self.contains(new_name) {
            return Err(ArfxError::NameConflict { name: new_name.to_owned() });
        }
        let mut entry = src.entry(name)
            .ok_or_else(|| ArfxError::NoSuchEntry(name.to_owned()))?
            .clone();

        for channel in &mut entry.channels {
            let mut blocks = Vec::with_capacity(channel.blocks.len());
            for block in &channel.blocks {
                match recompress {
                    None => {
                        let (header, stored) = src.store.read_raw_block(block)?;
                        blocks.push(self.store.write_raw_block(&header, &stored)?);
                    }
                    Some(compression) => {
                        let data = src.store.read_payload(std::slice::from_ref(block))?;
                        blocks.extend(self.store.write_payload(&data, compression)?);
                    }
                }
            }
            channel.blocks = blocks;
        }
        entry.name = new_name.to_owned();
        self.store.index.entries.push(entry);
        Ok(())
    }
}
