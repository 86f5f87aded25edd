use std::{
    collections::BTreeMap,
    io::{Read, Seek, SeekFrom},
};

use afinstr::Address;
use borsh::BorshDeserialize;
use log::{debug, error, info};

use crate::{
    magic::{CACHE_MIN_REQUIRED_VERSION, HEADER_SIZE, INDEX_OFFSET_PLACEHOLDER},
    persist::{codec::read_routine_block, header::CacheHeader},
    refs::RefFormulasMap,
    utils::error::{AfError, AfResult},
};

/// Reads routine blocks from a validated cache file.
///
/// Opening checks the header and loads the routine index; routine blocks are
/// decoded on demand.
pub struct CacheReader<R: Read + Seek> {
    reader: R,
    header: CacheHeader,
    routines: BTreeMap<Address, u64>,
}

impl<R: Read + Seek> CacheReader<R> {
    /// Open a cache computed for the image with `checksum`.
    pub fn open(reader: R, checksum: u32) -> AfResult<Self> {
        Self::open_with_min_version(reader, checksum, CACHE_MIN_REQUIRED_VERSION)
    }

    /// Open a cache, rejecting format versions older than `min_version`.
    pub fn open_with_min_version(mut reader: R, checksum: u32, min_version: i32) -> AfResult<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header = CacheHeader::deserialize_reader(&mut reader).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof
                || e.kind() == std::io::ErrorKind::InvalidData
            {
                error!("Cache file is too short to hold a header: {e}");
                AfError::BadMagic
            } else {
                AfError::IoError(e)
            }
        })?;
        header.validate(checksum, min_version)?;

        let routines = Self::read_index(&mut reader, header.index_offset)?;
        debug!(
            "Opened cache for image checksum 0x{:08x}: {} routines",
            checksum,
            routines.len()
        );
        Ok(Self {
            reader,
            header,
            routines,
        })
    }

    /// Like [`CacheReader::open`], but a cache that cannot be used is
    /// reported and treated as absent.
    pub fn open_or_absent(reader: R, checksum: u32) -> Option<Self> {
        match Self::open(reader, checksum) {
            Ok(cache) => Some(cache),
            Err(e) => {
                info!("Ignoring formula cache: {e}");
                None
            }
        }
    }

    fn read_index(reader: &mut R, index_offset: u64) -> AfResult<BTreeMap<Address, u64>> {
        let malformed = |reason: String| {
            error!("Malformed cache index at offset {index_offset}: {reason}");
            AfError::MalformedIndex {
                offset: index_offset,
                reason,
            }
        };
        if index_offset == INDEX_OFFSET_PLACEHOLDER || index_offset < HEADER_SIZE {
            return Err(malformed("cache was never finalized".to_string()));
        }
        reader.seek(SeekFrom::Start(index_offset))?;
        read_index_entries(reader, index_offset).map_err(|e| malformed(e.to_string()))
    }

    pub fn header(&self) -> &CacheHeader {
        &self.header
    }

    /// Routines with a cached block, as `(pc, offset)` in pc order.
    pub fn routines(&self) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.routines.iter().map(|(pc, offset)| (*pc, *offset))
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    pub fn offset_of(&self, routine_pc: Address) -> Option<u64> {
        self.routines.get(&routine_pc).copied()
    }

    /// Decode the routine block at `offset` into `map`, replacing its
    /// content. On failure `map` is left empty.
    pub fn load_routine_at(&mut self, offset: u64, map: &mut RefFormulasMap) -> AfResult<()> {
        map.clear();
        let result = match self.reader.seek(SeekFrom::Start(offset)) {
            Ok(_) => read_routine_block(&mut self.reader, map),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(
                    "Loaded {} reference entries from offset {}",
                    map.len(),
                    offset
                );
                Ok(())
            }
            Err(e) => {
                map.clear();
                error!("Malformed routine block at offset {offset}: {e}. Discarding its formulas");
                Err(AfError::MalformedRoutine {
                    offset,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Load the cached formulas of the routine entered at `routine_pc`.
    pub fn load_routine(&mut self, routine_pc: Address, map: &mut RefFormulasMap) -> AfResult<()> {
        let offset = self
            .offset_of(routine_pc)
            .ok_or(AfError::UnknownRoutine(routine_pc))?;
        self.load_routine_at(offset, map)
    }

    /// Same as [`CacheReader::load_routine`] but never fails.
    ///
    /// Returns false when the routine is not cached or its block is
    /// malformed; `map` is then empty and the routine must be recomputed.
    pub fn fetch_routine(&mut self, routine_pc: Address, map: &mut RefFormulasMap) -> bool {
        match self.load_routine(routine_pc, map) {
            Ok(()) => true,
            Err(AfError::UnknownRoutine(_)) => {
                map.clear();
                debug!("Routine 0x{routine_pc:x} is not cached");
                false
            }
            Err(_) => false,
        }
    }

    /// Give back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_index_entries<R: Read>(
    reader: &mut R,
    index_offset: u64,
) -> std::io::Result<BTreeMap<Address, u64>> {
    let invalid = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);

    let count = i32::deserialize_reader(reader)?;
    let count =
        usize::try_from(count).map_err(|_| invalid(format!("negative routine count {count}")))?;
    let mut routines = BTreeMap::new();
    for _ in 0..count {
        let pc = Address::deserialize_reader(reader)?;
        let offset = u64::deserialize_reader(reader)?;
        if !(HEADER_SIZE..index_offset).contains(&offset) {
            return Err(invalid(format!(
                "routine 0x{pc:x} has block offset {offset} outside the body"
            )));
        }
        routines.insert(pc, offset);
    }
    Ok(routines)
}
