use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b"ARFX";
pub const VERSION: u32 = 2;
/// On-disk size of the superblock, including reserved bytes and checksum.
pub const SUPERBLOCK_SIZE: usize = 64;

const RESERVED: usize = 16;

#[derive(Error, Debug)]
pub enum SuperblockError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("Superblock checksum mismatch")]
    Checksum,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version:      u32,
    pub uuid:         Uuid,
    /// Offset of the index block; 0 until the container is first closed.
    pub index_offset: u64,
    pub index_size:   u64,
    pub flags:        u32,
}

impl Superblock {
    pub fn new() -> Self {
        Self {
            version:      VERSION,
            uuid:         Uuid::new_v4(),
            index_offset: 0,
            index_size:   0,
            flags:        0,
        }
    }

    fn body(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.write_all(MAGIC)?;
        buf.write_u32::<LittleEndian>(self.version)?;
        buf.write_all(self.uuid.as_bytes())?;
        buf.write_u64::<LittleEndian>(self.index_offset)?;
        buf.write_u64::<LittleEndian>(self.index_size)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.write_all(&[0u8; RESERVED])?;
        Ok(buf)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let body = self.body()?;
        let mut hasher = Hasher::new();
        hasher.update(&body);
        writer.write_all(&body)?;
        writer.write_u32::<LittleEndian>(hasher.finalize())?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, SuperblockError> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        reader.read_exact(&mut raw)?;
        let (body, crc) = raw.split_at(SUPERBLOCK_SIZE - 4);

        let mut r = body;
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SuperblockError::InvalidMagic);
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(SuperblockError::UnsupportedVersion(version));
        }
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != (&crc[..]).read_u32::<LittleEndian>()? {
            return Err(SuperblockError::Checksum);
        }
        let mut uuid_bytes = [0u8; 16];
        r.read_exact(&mut uuid_bytes)?;
        let index_offset = r.read_u64::<LittleEndian>()?;
        let index_size = r.read_u64::<LittleEndian>()?;
        let flags = r.read_u32::<LittleEndian>()?;
        Ok(Self {
            version,
            uuid: Uuid::from_bytes(uuid_bytes),
            index_offset,
            index_size,
            flags,
        })
    }
}

impl Default for Superblock {
    fn default() -> Self { Self::new() }
}
