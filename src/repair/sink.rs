//! Destinations for reconstructed block bytes

use crate::error::{Par3Error, Result};
use crate::file_ops::OutputHandle;
use crate::mapping::BlockMap;
use log::debug;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

/// Receives reconstructed blocks, possibly one piece at a time
pub trait BlockSink {
    /// Bytes `[offset, offset + data.len())` of the logical content of `block`
    fn write_block(&mut self, block: u64, offset: u64, data: &[u8]) -> Result<()>;

    /// Called once after the last piece of every block was written
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects reconstructed blocks in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub blocks: FxHashMap<u64, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, block: u64) -> Option<&[u8]> {
        self.blocks.get(&block).map(Vec::as_slice)
    }
}

impl BlockSink for MemorySink {
    fn write_block(&mut self, block: u64, offset: u64, data: &[u8]) -> Result<()> {
        let bytes = self.blocks.entry(block).or_default();
        let end = offset as usize + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}

/// Writes reconstructed bytes into files through the block's slices
///
/// Every slice of the block receives the part of the piece it covers, so a
/// block shared by several files (packed or identical tails) restores all of
/// them. Output files are created when missing.
pub struct FileBlockSink<'a> {
    map: &'a BlockMap,
    outputs: Vec<PathBuf>,
    handle: OutputHandle,
}

impl<'a> FileBlockSink<'a> {
    /// Repair the input files in place
    pub fn in_place(map: &'a BlockMap) -> Self {
        let outputs = map.files().iter().map(|f| f.path.clone()).collect();
        Self::with_outputs(map, outputs)
    }

    /// Write file `i` of the mapping to `outputs[i]`
    pub fn with_outputs(map: &'a BlockMap, outputs: Vec<PathBuf>) -> Self {
        FileBlockSink {
            map,
            outputs,
            handle: OutputHandle::new(),
        }
    }
}

impl BlockSink for FileBlockSink<'_> {
    fn write_block(&mut self, block: u64, offset: u64, data: &[u8]) -> Result<()> {
        let piece_end = offset + data.len() as u64;
        for index in self.map.chain(block)? {
            let slice = self.map.slice(index);
            let start = offset.max(slice.tail_offset);
            let end = piece_end.min(slice.tail_offset + slice.size);
            if start >= end {
                continue;
            }
            let path = self
                .outputs
                .get(slice.file.as_usize())
                .ok_or(Par3Error::Mapping { block })?;
            let file_offset = slice.offset + (start - slice.tail_offset);
            debug!(
                "Writing {} bytes of block[{}] to {} at {}",
                end - start,
                block,
                path.display(),
                file_offset
            );
            let bytes = &data[(start - offset) as usize..(end - offset) as usize];
            self.handle.write_at(path, file_offset, bytes)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.handle.close()
    }
}
