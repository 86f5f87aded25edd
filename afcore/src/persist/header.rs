use borsh::{
    BorshDeserialize, BorshSerialize,
    io::{Read, Result, Write},
};
use log::error;

use crate::{
    magic::{CACHE_MAGIC, CACHE_VERSION, INDEX_OFFSET_PLACEHOLDER},
    utils::error::{AfError, AfResult},
};

/// Fixed header opening a cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 8],
    pub version: i32,
    /// Checksum of the analyzed image the cache was computed for.
    pub checksum: u32,
    /// Position of the routine index; [`INDEX_OFFSET_PLACEHOLDER`] until the
    /// cache is finalized.
    pub index_offset: u64,
}

impl CacheHeader {
    /// Header of a cache being written for an image with `checksum`.
    pub fn new(checksum: u32) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
            checksum,
            index_offset: INDEX_OFFSET_PLACEHOLDER,
        }
    }

    /// Check magic word, format version and image checksum, in that order.
    pub fn validate(&self, checksum: u32, min_version: i32) -> AfResult<()> {
        if self.magic != CACHE_MAGIC {
            error!("Incorrect cache file format, magic word not found");
            return Err(AfError::BadMagic);
        }
        if self.version > CACHE_VERSION || self.version < min_version {
            error!(
                "Cache format version {} is outside [{}, {}], ignoring the cache",
                self.version, min_version, CACHE_VERSION
            );
            return Err(AfError::UnsupportedVersion {
                found: self.version,
                min: min_version,
                current: CACHE_VERSION,
            });
        }
        if self.checksum != checksum {
            error!(
                "Image checksum 0x{:08x} does not match cached 0x{:08x}, the image was recompiled",
                checksum, self.checksum
            );
            return Err(AfError::ChecksumMismatch {
                expected: checksum,
                found: self.checksum,
            });
        }
        Ok(())
    }
}

impl BorshSerialize for CacheHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        self.version.serialize(writer)?;
        self.checksum.serialize(writer)?;
        self.index_offset.serialize(writer)
    }
}

impl BorshDeserialize for CacheHeader {
    fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            version: i32::deserialize_reader(reader)?,
            checksum: u32::deserialize_reader(reader)?,
            index_offset: u64::deserialize_reader(reader)?,
        })
    }
}
