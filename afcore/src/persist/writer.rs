use std::{
    collections::BTreeMap,
    io::{Seek, SeekFrom, Write},
};

use afinstr::Address;
use borsh::BorshSerialize;
use log::{debug, warn};

use crate::{
    magic::INDEX_OFFSET_POSITION,
    persist::{codec::write_routine_block, header::CacheHeader},
    refs::RefFormulasMap,
    utils::error::AfResult,
};

/// Writes a cache file: header, one block per routine, then the index.
///
/// The index offset in the header stays a placeholder until
/// [`CacheWriter::finish`] is called; an unfinished file is rejected by the
/// reader.
pub struct CacheWriter<W: Write + Seek> {
    writer: W,
    routines: BTreeMap<Address, u64>,
}

impl<W: Write + Seek> CacheWriter<W> {
    /// Start a cache for the image with `checksum`, writing the header at the
    /// beginning of `writer`.
    pub fn create(mut writer: W, checksum: u32) -> AfResult<Self> {
        writer.seek(SeekFrom::Start(0))?;
        CacheHeader::new(checksum).serialize(&mut writer)?;
        Ok(Self {
            writer,
            routines: BTreeMap::new(),
        })
    }

    /// Append the formulas of the routine entered at `routine_pc` and return
    /// the offset of its block.
    pub fn save_routine(&mut self, routine_pc: Address, map: &RefFormulasMap) -> AfResult<u64> {
        let offset = self.writer.stream_position()?;
        write_routine_block(&mut self.writer, map)?;
        if self.routines.insert(routine_pc, offset).is_some() {
            warn!("Routine 0x{routine_pc:x} saved twice, keeping the block at offset {offset}");
        }
        debug!(
            "Saved {} reference entries of routine 0x{:x} at offset {}",
            map.len(),
            routine_pc,
            offset
        );
        Ok(offset)
    }

    /// True if a block was already written for `routine_pc`.
    pub fn contains(&self, routine_pc: Address) -> bool {
        self.routines.contains_key(&routine_pc)
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    /// Write the routine index, patch its offset into the header and return
    /// the underlying writer.
    pub fn finish(mut self) -> AfResult<W> {
        let index_offset = self.writer.stream_position()?;
        let count = i32::try_from(self.routines.len()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("too many routines: {}", self.routines.len()),
            )
        })?;
        count.serialize(&mut self.writer)?;
        for (pc, offset) in &self.routines {
            pc.serialize(&mut self.writer)?;
            offset.serialize(&mut self.writer)?;
        }
        let end = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(INDEX_OFFSET_POSITION))?;
        index_offset.serialize(&mut self.writer)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;

        debug!(
            "Finalized cache with {} routines, index at offset {}",
            self.routines.len(),
            index_offset
        );
        Ok(self.writer)
    }
}
