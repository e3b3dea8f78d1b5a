use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use crate::compression::{get_compressor, Compression, CompressionError, CompressionId};
use crc32fast::Hasher;

pub const BLOCK_MAGIC: u32 = 0x424C_434B;
pub const BLOCK_HEADER_SIZE: u64 = 22;

/// Header preceding every payload block in a container.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub magic: u32,
    pub compression: u8,
    pub level: i8,
    pub stored_size: u64,
    pub orig_size: u32,
    /// CRC32 of the stored (possibly compressed) payload.
    pub checksum: u32,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u8(self.compression)?;
        writer.write_i8(self.level)?;
        writer.write_u64::<LittleEndian>(self.stored_size)?;
        writer.write_u32::<LittleEndian>(self.orig_size)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let header = Self {
            magic: reader.read_u32::<LittleEndian>()?,
            compression: reader.read_u8()?,
            level: reader.read_i8()?,
            stored_size: reader.read_u64::<LittleEndian>()?,
            orig_size: reader.read_u32::<LittleEndian>()?,
            checksum: reader.read_u32::<LittleEndian>()?,
        };
        if header.magic != BLOCK_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad block magic"));
        }
        Ok(header)
    }
}

pub fn encode_block(data: &[u8], compression: Compression) -> Result<(BlockHeader, Vec<u8>), CompressionError> {
    let compressor = get_compressor(compression.id);
    let stored = compressor.compress(data, compression.level)?;
    let mut hasher = Hasher::new();
    hasher.update(&stored);
    let header = BlockHeader {
        magic: BLOCK_MAGIC,
        compression: compression.id as u8,
        level: compression.level.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
        stored_size: stored.len() as u64,
        orig_size: data.len() as u32,
        checksum: hasher.finalize(),
    };
    Ok((header, stored))
}

pub fn decode_block(header: &BlockHeader, payload: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != header.checksum {
        return Err(CompressionError::Decompression("Checksum mismatch".to_string()));
    }
    let id = CompressionId::from_u8(header.compression)
        .ok_or(CompressionError::UnknownId(header.compression))?;
    let data = get_compressor(id).decompress(payload)?;
    if data.len() != header.orig_size as usize {
        return Err(CompressionError::Decompression(format!(
            "expected {} bytes, got {}", header.orig_size, data.len()
        )));
    }
    Ok(data)
}
