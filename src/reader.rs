//! Block reader
//!
//! Resolves a block, or a byte range of a block, through its slice chain and
//! reads the bytes from the input files. One file handle is kept open and
//! reused while consecutive reads hit the same file.

use crate::checksum::crc64;
use crate::domain::FileIndex;
use crate::error::{FileOp, Par3Error, Result};
use crate::mapping::{BlockKind, BlockMap};
use log::trace;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub struct BlockReader<'a> {
    map: &'a BlockMap,
    handle: Option<(FileIndex, File)>,
}

impl<'a> BlockReader<'a> {
    pub fn new(map: &'a BlockMap) -> Self {
        BlockReader { map, handle: None }
    }

    /// Read a whole block into `buf[..block_size]` and verify its CRC-64
    ///
    /// Bytes past the block's logical size are zeroed.
    pub fn read_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        let block_size = self.map.block_size() as usize;
        self.read_range(block, 0, &mut buf[..block_size])?;

        let expected = self.map.block(block)?;
        if crc64(&buf[..expected.size as usize]) != expected.crc {
            return Err(Par3Error::DataIntegrity { block });
        }
        Ok(())
    }

    /// Fill `buf` with bytes `[offset, offset + buf.len())` of `block`
    pub fn read_range(&mut self, block: u64, offset: u64, buf: &mut [u8]) -> Result<()> {
        let map = self.map;
        let info = map.block(block)?;
        let end = offset + buf.len() as u64;
        let data_end = end.min(info.size);

        match info.kind {
            BlockKind::Full => {
                if offset < data_end {
                    let slice = map.full_slice(block)?;
                    let (file, at) = (slice.file, slice.offset + offset);
                    self.read_at(file, at, &mut buf[..(data_end - offset) as usize])?;
                }
            }
            BlockKind::Tail => {
                let mut cursor = offset;
                while cursor < data_end {
                    let slice = map.tail_slice_at(block, cursor)?;
                    // the slice may start before the cursor
                    let gap = cursor - slice.tail_offset;
                    let len = (slice.size - gap).min(data_end - cursor);
                    let (file, at) = (slice.file, slice.offset + gap);
                    let start = (cursor - offset) as usize;
                    self.read_at(file, at, &mut buf[start..start + len as usize])?;
                    cursor += len;
                }
            }
        }

        if data_end < end {
            let zero_from = data_end.saturating_sub(offset) as usize;
            buf[zero_from..].fill(0);
        }
        Ok(())
    }

    fn read_at(&mut self, file: FileIndex, offset: u64, buf: &mut [u8]) -> Result<()> {
        let map = self.map;
        let path = &map.file(file).path;
        let handle = self.open(file)?;
        trace!("Reading {} bytes at {} of {}", buf.len(), offset, path.display());
        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        handle
            .read_exact(buf)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))
    }

    fn open(&mut self, file: FileIndex) -> Result<&mut File> {
        let handle = match self.handle.take() {
            Some((open, handle)) if open == file => handle,
            // the previous handle is dropped here
            _ => {
                let path: &Path = &self.map.file(file).path;
                File::open(path).map_err(|e| Par3Error::file_io(path, FileOp::Open, e))?
            }
        };
        Ok(&mut self.handle.insert((file, handle)).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn test_read_full_and_tail_blocks() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..21u8).collect();
        let one = write_file(&dir, "one", &data);
        let two = write_file(&dir, "two", b"xyz");
        let map = BlockMap::from_files(&[one, two], 8).unwrap();
        let mut reader = BlockReader::new(&map);

        let mut buf = vec![0xFFu8; 8];
        reader.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, &data[8..16]);

        reader.read_block(2, &mut buf).unwrap();
        assert_eq!(&buf[..5], &data[16..21]);
        assert_eq!(&buf[5..8], b"xyz");
    }

    #[test]
    fn test_read_range_zero_pads_past_logical_size() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one", b"hello");
        let map = BlockMap::from_files(&[one], 8).unwrap();
        let mut reader = BlockReader::new(&map);

        let mut buf = vec![0xFFu8; 4];
        reader.read_range(0, 4, &mut buf).unwrap();
        assert_eq!(buf, [b'o', 0, 0, 0]);
    }

    #[test]
    fn test_overlapping_tail_slices() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"abcdef");
        let b = write_file(&dir, "b", b"cdefgh");

        // block holds "abcdefgh": a covers [0, 6), b covers [2, 8)
        let mut map = BlockMap::new(8);
        let fa = map.add_file(&a, 6);
        let fb = map.add_file(&b, 6);
        let block = map.push_block(8, crc64(b"abcdefgh"), BlockKind::Tail);
        map.attach_slice(block, fa, 0, 6, 0).unwrap();
        map.attach_slice(block, fb, 0, 6, 2).unwrap();

        let mut reader = BlockReader::new(&map);
        let mut buf = vec![0u8; 8];
        reader.read_block(block, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");

        let mut part = vec![0u8; 3];
        reader.read_range(block, 5, &mut part).unwrap();
        assert_eq!(&part, b"fgh");
    }

    #[test]
    fn test_tampered_block_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one", &[7u8; 16]);
        let map = BlockMap::from_files(&[one.clone()], 8).unwrap();
        std::fs::write(&one, [7u8, 7, 7, 7, 7, 7, 7, 7, 7, 8, 7, 7, 7, 7, 7, 7]).unwrap();

        let mut reader = BlockReader::new(&map);
        let mut buf = vec![0u8; 8];
        reader.read_block(0, &mut buf).unwrap();
        assert!(matches!(
            reader.read_block(1, &mut buf),
            Err(Par3Error::DataIntegrity { block: 1 })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut map = BlockMap::new(4);
        let file = map.add_file("/nonexistent/par3rs/input", 4);
        let block = map.push_block(4, 0, BlockKind::Full);
        map.attach_slice(block, file, 0, 4, 0).unwrap();

        let mut reader = BlockReader::new(&map);
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            reader.read_block(block, &mut buf),
            Err(Par3Error::FileIo {
                op: FileOp::Open,
                ..
            })
        ));
    }
}
