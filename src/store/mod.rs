//! Append-only block store underneath [`crate::container::Container`].
//!
//! # Layout
//! ```text
//! [ superblock (64 B) | block | block | ... | index block ]
//! ```
//! New payload blocks are always appended after the current end of file.
//! [`BlockStore::commit`] then appends a fresh zstd-compressed JSON index and
//! patches the superblock at offset 0 to point at it.  Until the superblock
//! is patched the previous index stays authoritative, so an interrupted
//! write never damages entries that were already committed.
//!
//! Nothing is ever freed in place: deleted entries and superseded index
//! blocks remain in the file until the container is repacked.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::block::{decode_block, encode_block, BlockHeader, BLOCK_HEADER_SIZE};
use crate::compression::{Compression, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{ArfxError, Result};
use crate::index::{BlockRef, ContainerIndex};
use crate::superblock::Superblock;

/// Payloads are split into blocks of at most 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub struct BlockStore {
    file:           File,
    path:           PathBuf,
    pub superblock: Superblock,
    pub index:      ContainerIndex,
    writable:       bool,
    dirty:          bool,
    pub chunk_size: usize,
}

impl BlockStore {
    /// Create (or truncate) a container file.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ArfxError::open_failed(path, e))?;
        let superblock = Superblock::new();
        superblock.write(&mut file)?;
        debug!(path = %path.display(), uuid = %superblock.uuid, "created container");
        Ok(Self {
            file,
            path: path.to_owned(),
            superblock,
            index: ContainerIndex::default(),
            writable: true,
            dirty: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Open an existing container and load its index.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| ArfxError::open_failed(path, e))?;
        let superblock = Superblock::read(&mut file)
            .map_err(|e| ArfxError::malformed(path, e.to_string()))?;

        let index = if superblock.index_offset == 0 {
            ContainerIndex::default()
        } else {
            file.seek(SeekFrom::Start(superblock.index_offset))?;
            let header = BlockHeader::read(&mut file)
                .map_err(|e| ArfxError::malformed(path, e.to_string()))?;
            let mut payload = vec![0u8; header.stored_size as usize];
            file.read_exact(&mut payload)?;
            let raw = decode_block(&header, &payload)
                .map_err(|e| ArfxError::malformed(path, format!("index: {e}")))?;
            ContainerIndex::from_bytes(&raw)?
        };
        debug!(path = %path.display(), entries = index.entries.len(), writable, "opened container");

        Ok(Self {
            file,
            path: path.to_owned(),
            superblock,
            index,
            writable,
            dirty: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn is_writable(&self) -> bool { self.writable }

    pub fn mark_dirty(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable { Ok(()) } else { Err(ArfxError::WrongMode { mode: "read" }) }
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    /// Split `data` into chunks and append each as a block.
    pub fn write_payload(&mut self, data: &[u8], compression: Compression) -> Result<Vec<BlockRef>> {
        self.ensure_writable()?;
        let mut refs = Vec::with_capacity(data.len() / self.chunk_size + 1);
        for chunk in data.chunks(self.chunk_size.max(1)) {
            let (header, stored) = encode_block(chunk, compression)
                .map_err(|e| ArfxError::malformed(&self.path, e.to_string()))?;
            refs.push(self.write_raw_block(&header, &stored)?);
        }
        self.dirty = true;
        Ok(refs)
    }

    /// Append an already encoded block verbatim.
    pub fn write_raw_block(&mut self, header: &BlockHeader, stored: &[u8]) -> Result<BlockRef> {
        self.ensure_writable()?;
        let offset = self.file.seek(SeekFrom::End(0))?;
        header.write(&mut self.file)?;
        self.file.write_all(stored)?;
        self.dirty = true;
        Ok(BlockRef {
            offset,
            stored_size: header.stored_size,
            orig_size:   header.orig_size as u64,
        })
    }

    pub fn read_raw_block(&mut self, block: &BlockRef) -> Result<(BlockHeader, Vec<u8>)> {
        self.file.seek(SeekFrom::Start(block.offset))?;
        let header = BlockHeader::read(&mut self.file)
            .map_err(|e| ArfxError::malformed(&self.path, format!("block at {}: {e}", block.offset)))?;
        if header.stored_size != block.stored_size {
            return Err(ArfxError::malformed(&self.path, format!(
                "block at {} is {} bytes, index says {}", block.offset, header.stored_size, block.stored_size
            )));
        }
        let mut stored = vec![0u8; header.stored_size as usize];
        self.file.read_exact(&mut stored)?;
        Ok((header, stored))
    }

    /// Read and concatenate the decoded contents of `blocks`.
    pub fn read_payload(&mut self, blocks: &[BlockRef]) -> Result<Vec<u8>> {
        let total: u64 = blocks.iter().map(|b| b.orig_size).sum();
        let mut out = Vec::with_capacity(total as usize);
        for block in blocks {
            let (header, stored) = self.read_raw_block(block)?;
            let data = decode_block(&header, &stored)
                .map_err(|e| ArfxError::malformed(&self.path, format!("block at {}: {e}", block.offset)))?;
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    // ── Commit ───────────────────────────────────────────────────────────────

    /// Write the index and patch the superblock.  No-op when nothing changed.
    pub fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.ensure_writable()?;

        let raw = self.index.to_bytes()?;
        let (header, stored) = encode_block(&raw, Compression::zstd(DEFAULT_COMPRESSION_LEVEL))
            .map_err(|e| ArfxError::malformed(&self.path, e.to_string()))?;
        let index_offset = self.file.seek(SeekFrom::End(0))?;
        header.write(&mut self.file)?;
        self.file.write_all(&stored)?;
        self.file.sync_data()?;

        self.superblock.index_offset = index_offset;
        self.superblock.index_size   = BLOCK_HEADER_SIZE + stored.len() as u64;
        self.file.seek(SeekFrom::Start(0))?;
        self.superblock.write(&mut self.file)?;
        self.file.sync_data()?;

        debug!(path = %self.path.display(), index_offset, entries = self.index.entries.len(), "committed index");
        self.dirty = false;
        Ok(())
    }

    /// Physical size of the container file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        if self.dirty && self.writable {
            if let Err(e) = self.commit() {
                tracing::warn!(path = %self.path.display(), "failed to commit container: {e}");
            }
        }
    }
}
