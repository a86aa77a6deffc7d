//! Slice-to-block mapping
//!
//! Input files are cut into block-sized *slices*. A file's full-size chunks
//! each back one full block; the remaining tail of every file is packed with
//! other tails into shared tail blocks. Blocks and slices live in two flat
//! tables; each block points at the first slice of its chain and every slice
//! links to the next one by index.
//!
//! Several slices may describe the same block bytes: identical tails are
//! stored once and every file that ends with them gets its own slice pointing
//! at the same `tail_offset`. With [`Deduplication::Simple`] the same holds
//! for full chunks: a repeated chunk becomes another slice of the first block
//! with those bytes.

use crate::checksum::{crc64, packet_digest, DIGEST_LEN};
use crate::domain::{FileIndex, SliceIndex};
use crate::error::{FileOp, Par3Error, Result};
use crate::region::{alloc_capacity, alloc_zeroed};
use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Tails at least this long are counted as a block of their own when
/// estimating the block count
const MIN_TAIL_BLOCK: u64 = 40;

/// Whether identical full chunks of the input share one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deduplication {
    /// Every full chunk gets its own block
    #[default]
    Off,
    /// Full chunks with the same CRC-64 and BLAKE3 digest map to one block
    Simple,
}

/// Sizes of the input files, in order
pub fn file_sizes<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<u64>> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| Par3Error::file_io(path, FileOp::Open, e))
        })
        .collect()
}

/// Estimated number of input blocks when files of `sizes` are cut into
/// `block_size` blocks
///
/// Tails shorter than 40 bytes are assumed to fit into other tail blocks.
pub fn calculate_block_count(sizes: &[u64], block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    sizes
        .iter()
        .map(|&size| size / block_size + u64::from(size % block_size >= MIN_TAIL_BLOCK))
        .sum()
}

/// Block size for files of `sizes`, aiming at one block per percent of the
/// total size
///
/// The result is a power of two of at least 8 bytes, or 40 for tiny inputs.
/// It doubles while more than 32768 blocks would be made and a block is
/// still smaller than the largest file. When more than 128 blocks are
/// expected the size is even, so 16-bit codes can be used.
pub fn suggest_block_size(sizes: &[u64]) -> u64 {
    let max_size = sizes.iter().copied().max().unwrap_or(0);
    if max_size < MIN_TAIL_BLOCK {
        return MIN_TAIL_BLOCK;
    }
    let total = sizes.iter().fold(0u64, |acc, &s| acc.saturating_add(s));

    // total = block_size * block_count, block_count = block_size / 100
    let root = ((total as f64).sqrt() * 10.0) as u64;
    let bounded = root.min(max_size).max(8);
    let mut block_size = 1u64 << (63 - bounded.leading_zeros());

    let mut block_count = calculate_block_count(sizes, block_size);
    if block_count > 128 && block_count <= 1000 {
        block_size = (block_size / 2).max(MIN_TAIL_BLOCK);
    }
    while block_count > 32768 && block_size < max_size {
        block_size *= 2;
        block_count = calculate_block_count(sizes, block_size);
    }
    if block_count > 128 && block_size % 2 == 1 {
        block_size += 1;
    }
    block_size
}

/// How a block's bytes are stored in the input files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Backed by at least one slice of exactly `block_size` bytes
    Full,
    /// Made of one or more file tails packed side by side
    Tail,
}

/// An input file of the recovery set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Logical size; the rest up to `block_size` reads as zeros
    pub size: u64,
    /// CRC-64 of the logical bytes
    pub crc: u64,
    pub kind: BlockKind,
    pub first_slice: Option<SliceIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub file: FileIndex,
    /// Byte offset in the file
    pub offset: u64,
    pub size: u64,
    /// Position of these bytes inside the block (tail blocks)
    pub tail_offset: u64,
    pub block: u64,
    pub next: Option<SliceIndex>,
}

/// Block and slice tables of a recovery set
#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    block_size: u64,
    files: Vec<InputFile>,
    blocks: Vec<Block>,
    slices: Vec<Slice>,
}

impl BlockMap {
    pub fn new(block_size: u64) -> Self {
        BlockMap {
            block_size,
            ..Default::default()
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn file(&self, index: FileIndex) -> &InputFile {
        &self.files[index.as_usize()]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn block(&self, index: u64) -> Result<&Block> {
        self.blocks
            .get(index as usize)
            .ok_or(Par3Error::Mapping { block: index })
    }

    pub fn slice(&self, index: SliceIndex) -> &Slice {
        &self.slices[index.as_usize()]
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, size: u64) -> FileIndex {
        self.files.push(InputFile {
            path: path.into(),
            size,
        });
        FileIndex::new(self.files.len() - 1)
    }

    pub fn push_block(&mut self, size: u64, crc: u64, kind: BlockKind) -> u64 {
        self.blocks.push(Block {
            size,
            crc,
            kind,
            first_slice: None,
        });
        self.blocks.len() as u64 - 1
    }

    /// Append a slice to the end of `block`'s chain
    pub fn attach_slice(
        &mut self,
        block: u64,
        file: FileIndex,
        offset: u64,
        size: u64,
        tail_offset: u64,
    ) -> Result<SliceIndex> {
        let last = self.chain(block)?.last().copied();
        let index = SliceIndex::new(self.slices.len());
        self.slices.push(Slice {
            file,
            offset,
            size,
            tail_offset,
            block,
            next: None,
        });
        match last {
            Some(last) => self.slices[last.as_usize()].next = Some(index),
            None => self.blocks[block as usize].first_slice = Some(index),
        }
        Ok(index)
    }

    /// Slices of `block` in chain order
    ///
    /// Fails with a mapping error when the chain runs longer than the slice
    /// table (a cycle) or points outside it.
    pub fn chain(&self, block: u64) -> Result<SmallVec<[SliceIndex; 4]>> {
        let mut chain = SmallVec::new();
        let mut cursor = self.block(block)?.first_slice;
        while let Some(index) = cursor {
            if chain.len() >= self.slices.len() || index.as_usize() >= self.slices.len() {
                return Err(Par3Error::Mapping { block });
            }
            chain.push(index);
            cursor = self.slices[index.as_usize()].next;
        }
        Ok(chain)
    }

    /// First slice of `block` that holds a whole block
    pub fn full_slice(&self, block: u64) -> Result<&Slice> {
        self.chain(block)?
            .into_iter()
            .map(|i| self.slice(i))
            .find(|s| s.size == self.block_size)
            .ok_or(Par3Error::Mapping { block })
    }

    /// Slice of tail block `block` that covers byte `cursor` of the block
    pub fn tail_slice_at(&self, block: u64, cursor: u64) -> Result<&Slice> {
        self.chain(block)?
            .into_iter()
            .map(|i| self.slice(i))
            .find(|s| s.tail_offset <= cursor && s.tail_offset + s.size > cursor)
            .ok_or(Par3Error::Mapping { block })
    }

    /// Map `paths` into blocks of `block_size` bytes, computing block CRCs
    ///
    /// Full chunks become full blocks in file order; file tails are packed
    /// into tail blocks after them, and identical tails are stored once.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], block_size: u64) -> Result<Self> {
        Self::from_files_with(paths, block_size, Deduplication::Off)
    }

    /// Like [`from_files`](Self::from_files), optionally sharing identical
    /// full blocks
    pub fn from_files_with<P: AsRef<Path>>(
        paths: &[P],
        block_size: u64,
        dedup: Deduplication,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(Par3Error::InvalidConfig("block size must not be zero".into()));
        }
        let block_bytes =
            usize::try_from(block_size).map_err(|_| Par3Error::Memory { bytes: usize::MAX })?;
        let mut map = BlockMap::new(block_size);
        let mut tails: Vec<(FileIndex, u64, Vec<u8>)> = Vec::new();
        let mut buf = alloc_zeroed(block_bytes)?;
        // (crc, digest) -> block, for deduplicated full blocks
        let mut seen: FxHashMap<(u64, [u8; DIGEST_LEN]), u64> = FxHashMap::default();
        let mut shared = 0u64;

        for path in paths {
            let path = path.as_ref();
            let mut file =
                File::open(path).map_err(|e| Par3Error::file_io(path, FileOp::Open, e))?;
            let size = file
                .metadata()
                .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?
                .len();
            let index = map.add_file(path, size);

            let full_count = size / block_size;
            for chunk in 0..full_count {
                file.read_exact(&mut buf)
                    .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;
                let crc = crc64(&buf);
                let block = match dedup {
                    Deduplication::Off => map.push_block(block_size, crc, BlockKind::Full),
                    Deduplication::Simple => {
                        let key = (crc, packet_digest(&[&buf[..]]));
                        match seen.get(&key) {
                            Some(&block) => {
                                shared += 1;
                                block
                            }
                            None => {
                                let block = map.push_block(block_size, crc, BlockKind::Full);
                                seen.insert(key, block);
                                block
                            }
                        }
                    }
                };
                map.attach_slice(block, index, chunk * block_size, block_size, 0)?;
            }

            let tail_size = (size % block_size) as usize;
            if tail_size > 0 {
                let mut tail = alloc_zeroed(tail_size)?;
                file.read_exact(&mut tail)
                    .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;
                tails.push((index, full_count * block_size, tail));
            }
        }

        map.pack_tails(tails)?;
        if shared > 0 {
            debug!("{} full chunks share an existing block", shared);
        }
        debug!(
            "Mapped {} files into {} blocks ({} slices)",
            map.files.len(),
            map.blocks.len(),
            map.slices.len()
        );
        Ok(map)
    }

    fn pack_tails(&mut self, tails: Vec<(FileIndex, u64, Vec<u8>)>) -> Result<()> {
        let first_tail = self.blocks.len() as u64;
        let block_bytes = self.block_size as usize;
        // contents of every tail block, the last one still open
        let mut packed: Vec<Vec<u8>> = Vec::new();
        // (crc, len) -> (block, tail_offset) of tails already placed
        let mut placed: FxHashMap<(u64, usize), SmallVec<[(u64, u64); 1]>> = FxHashMap::default();

        for (file, offset, tail) in tails {
            let key = (crc64(&tail), tail.len());
            let duplicate = placed.get(&key).and_then(|spots| {
                spots.iter().copied().find(|&(block, tail_offset)| {
                    let start = tail_offset as usize;
                    packed[(block - first_tail) as usize].get(start..start + tail.len())
                        == Some(&tail[..])
                })
            });
            if let Some((block, tail_offset)) = duplicate {
                self.attach_slice(block, file, offset, tail.len() as u64, tail_offset)?;
                continue;
            }

            let fits = packed
                .last()
                .is_some_and(|data| data.len() + tail.len() <= block_bytes);
            if !fits {
                self.push_block(0, 0, BlockKind::Tail);
                packed.push(alloc_capacity(block_bytes)?);
            }

            // `packed` is never empty here
            let open = packed.len() - 1;
            let block = first_tail + open as u64;
            let data = &mut packed[open];
            let tail_offset = data.len() as u64;
            data.extend_from_slice(&tail);
            self.attach_slice(block, file, offset, tail.len() as u64, tail_offset)?;
            placed.entry(key).or_default().push((block, tail_offset));
        }

        for (i, data) in packed.iter().enumerate() {
            self.close_tail_block(first_tail + i as u64, data);
        }
        Ok(())
    }

    fn close_tail_block(&mut self, block: u64, data: &[u8]) {
        let entry = &mut self.blocks[block as usize];
        entry.size = data.len() as u64;
        entry.crc = crc64(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path
    }

    #[test]
    fn test_chain_order_and_lookup() {
        let mut map = BlockMap::new(8);
        let a = map.add_file("a", 3);
        let b = map.add_file("b", 5);
        let block = map.push_block(8, 0, BlockKind::Tail);
        let s0 = map.attach_slice(block, a, 0, 3, 0).unwrap();
        let s1 = map.attach_slice(block, b, 0, 5, 3).unwrap();

        assert_eq!(map.chain(block).unwrap().as_slice(), &[s0, s1]);
        assert_eq!(map.tail_slice_at(block, 2).unwrap().file, a);
        assert_eq!(map.tail_slice_at(block, 3).unwrap().file, b);
        assert!(map.tail_slice_at(block, 8).is_err());
        assert!(map.full_slice(block).is_err());
    }

    #[test]
    fn test_cyclic_chain_is_mapping_error() {
        let mut map = BlockMap::new(8);
        let a = map.add_file("a", 16);
        let block = map.push_block(8, 0, BlockKind::Full);
        let s0 = map.attach_slice(block, a, 0, 8, 0).unwrap();
        map.slices[s0.as_usize()].next = Some(s0);
        assert!(matches!(
            map.chain(block),
            Err(Par3Error::Mapping { block: 0 })
        ));
    }

    #[test]
    fn test_from_files_full_and_tail_blocks() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one", &[1u8; 20]);
        let two = write_file(&dir, "two", &[2u8; 3]);
        let map = BlockMap::from_files(&[one, two], 8).unwrap();

        // two full blocks from "one", then one tail block holding 4 + 3 bytes
        assert_eq!(map.block_count(), 3);
        assert_eq!(map.blocks()[0].kind, BlockKind::Full);
        assert_eq!(map.blocks()[1].kind, BlockKind::Full);
        let tail = &map.blocks()[2];
        assert_eq!(tail.kind, BlockKind::Tail);
        assert_eq!(tail.size, 7);
        let mut expected = vec![1u8; 4];
        expected.extend_from_slice(&[2u8; 3]);
        assert_eq!(tail.crc, crc64(&expected));
        assert_eq!(map.tail_slice_at(2, 5).unwrap().tail_offset, 4);
    }

    #[test]
    fn test_identical_tails_share_bytes() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one", b"abc");
        let two = write_file(&dir, "two", b"xyz");
        let three = write_file(&dir, "three", b"abc");
        let map = BlockMap::from_files(&[one, two, three], 8).unwrap();

        assert_eq!(map.block_count(), 1);
        assert_eq!(map.blocks()[0].size, 6);
        let chain = map.chain(0).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(map.slice(chain[2]).tail_offset, 0);
        assert_eq!(map.slice(chain[2]).file, FileIndex::new(2));
    }

    #[test]
    fn test_tails_that_do_not_fit_open_new_block() {
        let dir = TempDir::new().unwrap();
        let one = write_file(&dir, "one", &[1u8; 6]);
        let two = write_file(&dir, "two", &[2u8; 6]);
        let map = BlockMap::from_files(&[one, two], 8).unwrap();
        assert_eq!(map.block_count(), 2);
        assert_eq!(map.blocks()[0].size, 6);
        assert_eq!(map.blocks()[1].size, 6);
    }

    #[test]
    fn test_simple_dedup_shares_full_blocks() {
        let dir = TempDir::new().unwrap();
        let mut data = vec![7u8; 16];
        data.extend_from_slice(&[9u8; 8]);
        data.extend_from_slice(&[7u8; 8]);
        let one = write_file(&dir, "one", &data);
        let two = write_file(&dir, "two", &[7u8; 8]);

        let plain = BlockMap::from_files(&[&one, &two], 8).unwrap();
        assert_eq!(plain.block_count(), 5);

        let map = BlockMap::from_files_with(&[&one, &two], 8, Deduplication::Simple).unwrap();
        // blocks: [7; 8] and [9; 8]; every other chunk points at them
        assert_eq!(map.block_count(), 2);
        assert_eq!(map.chain(0).unwrap().len(), 4);
        assert_eq!(map.chain(1).unwrap().len(), 1);
        let last = map.slice(map.chain(0).unwrap()[3]);
        assert_eq!(last.file, FileIndex::new(1));
        assert_eq!(last.offset, 0);
        assert_eq!(map.full_slice(0).unwrap().offset, 0);
    }

    #[test]
    fn test_calculate_block_count() {
        assert_eq!(calculate_block_count(&[1000], 100), 10);
        // tails of 40 bytes or more count as a block
        assert_eq!(calculate_block_count(&[1040, 1039], 100), 21);
        assert_eq!(calculate_block_count(&[0, 39], 100), 0);
        assert_eq!(calculate_block_count(&[1000], 0), 0);
    }

    #[test]
    fn test_suggest_block_size() {
        assert_eq!(suggest_block_size(&[]), 40);
        assert_eq!(suggest_block_size(&[10, 39]), 40);
        // sqrt(1 MiB) * 10 = 10240, rounded down to a power of two
        assert_eq!(suggest_block_size(&[1 << 20]), 8192);
        // 256 blocks of 16 KiB are too few for 16-bit codes, so halve
        assert_eq!(suggest_block_size(&[1 << 22]), 8192);
        // capped by the largest file
        assert_eq!(suggest_block_size(&[100; 100]), 64);

        // 51200 blocks of 4 MiB, doubled until at most 32768
        assert_eq!(suggest_block_size(&[1 << 30; 200]), 1 << 23);
        // growing stops once a block holds the largest file
        assert_eq!(suggest_block_size(&[100; 50000]), 128);
    }
}
