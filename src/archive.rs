//! Archive files: input blocks stored verbatim as Data Packets
//!
//! An archive file holds a run of consecutive input blocks, one Data Packet
//! each. How the blocks are spread over files is an [`ArchiveLayout`]; the
//! files are named after the recovery file with the block range appended,
//! `name.part<first>+<count>.par3`.
//!
//! A lost block that still has a good Data Packet somewhere is copied back
//! by [`restore_blocks`] without solving anything.

use crate::checksum::crc64;
use crate::config::EngineConfig;
use crate::error::{FileOp, Par3Error, Result};
use crate::file_ops::OutputHandle;
use crate::mapping::BlockMap;
use crate::packets::data_packet::{DataPacket, DATA_PACKET_HEADER_SIZE, TYPE_OF_PACKET};
use crate::reader::BlockReader;
use crate::recovery_loader::scan_packets;
use crate::region::alloc_zeroed;
use crate::repair::BlockSink;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How input blocks are spread over archive files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLayout {
    /// Every block in one file
    Single,
    /// This many files with nearly equal block counts
    Uniform(u64),
    /// Up to this many files whose block counts double from file to file
    Variable(u64),
    /// Files of 1, 2, 4, ... blocks
    PowerOfTwo,
    /// Files of 1, 2, 4, ... blocks, none larger than the largest input file
    LimitSize,
}

impl ArchiveLayout {
    /// Layout for a scheme name and an optional file count
    ///
    /// Without a file count, `uniform` puts every block in one file and
    /// `variable` doubles without limit.
    pub fn from_scheme(scheme: &str, file_count: Option<u64>) -> Result<Self> {
        let scheme: ArchiveScheme = scheme.parse()?;
        Ok(match (scheme, file_count.filter(|&n| n > 0)) {
            (ArchiveScheme::Uniform, Some(n)) => ArchiveLayout::Uniform(n),
            (ArchiveScheme::Uniform, None) => ArchiveLayout::Single,
            (ArchiveScheme::Variable, Some(n)) => ArchiveLayout::Variable(n),
            (ArchiveScheme::Variable, None) | (ArchiveScheme::PowerOfTwo, _) => {
                ArchiveLayout::PowerOfTwo
            }
            (ArchiveScheme::LimitSize, _) => ArchiveLayout::LimitSize,
        })
    }

    /// Number of blocks in each file, in order
    ///
    /// `size_limit` is the block count of the largest input file and only
    /// matters for [`ArchiveLayout::LimitSize`].
    pub fn block_counts(self, block_count: u64, size_limit: u64) -> Vec<u64> {
        if block_count == 0 {
            return Vec::new();
        }
        match self {
            ArchiveLayout::Single => vec![block_count],
            ArchiveLayout::Uniform(files) => {
                let files = files.clamp(1, block_count);
                let (each, extra) = (block_count / files, block_count % files);
                (0..files).map(|i| each + u64::from(i < extra)).collect()
            }
            ArchiveLayout::Variable(files) => {
                let files = files.clamp(1, block_count);
                // blocks held by `files` files of 1, 2, 4, ...
                let mut capacity = 1u64;
                for _ in 1..files {
                    capacity = capacity.saturating_mul(2).saturating_add(1);
                    if capacity >= block_count {
                        break;
                    }
                }
                let first = if capacity < block_count {
                    block_count.div_ceil(capacity)
                } else {
                    1
                };
                doubling(block_count, first, u64::MAX)
            }
            ArchiveLayout::PowerOfTwo => doubling(block_count, 1, u64::MAX),
            ArchiveLayout::LimitSize => doubling(block_count, 1, size_limit.max(1)),
        }
    }
}

fn doubling(block_count: u64, first: u64, cap: u64) -> Vec<u64> {
    let mut counts = Vec::new();
    let mut remaining = block_count;
    let mut next = first;
    while remaining > 0 {
        let count = next.min(cap).min(remaining);
        counts.push(count);
        remaining -= count;
        next = next.saturating_mul(2);
    }
    counts
}

/// Scheme names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveScheme {
    Uniform,
    Variable,
    PowerOfTwo,
    LimitSize,
}

impl FromStr for ArchiveScheme {
    type Err = Par3Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" | "u" => Ok(ArchiveScheme::Uniform),
            "variable" | "v" => Ok(ArchiveScheme::Variable),
            "power" | "p" => Ok(ArchiveScheme::PowerOfTwo),
            "limit" | "l" => Ok(ArchiveScheme::LimitSize),
            _ => Err(Par3Error::InvalidConfig(format!(
                "unknown archive scheme '{}' (uniform, variable, power, limit)",
                s
            ))),
        }
    }
}

/// One planned archive file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub first_block: u64,
    pub block_count: u64,
}

impl ArchiveFile {
    pub fn blocks(&self) -> std::ops::Range<u64> {
        self.first_block..self.first_block + self.block_count
    }

    /// Size of the file once written
    pub fn file_size(&self, map: &BlockMap) -> u64 {
        map.blocks()[self.blocks().start as usize..self.blocks().end as usize]
            .iter()
            .map(|b| DATA_PACKET_HEADER_SIZE as u64 + b.size)
            .sum()
    }
}

/// Archive files for the blocks of `map`, named after `recovery_file`
pub fn plan_archive_files(
    recovery_file: &Path,
    layout: ArchiveLayout,
    map: &BlockMap,
) -> Vec<ArchiveFile> {
    let block_size = map.block_size().max(1);
    let largest = map.files().iter().map(|f| f.size).max().unwrap_or(0);
    let counts = layout.block_counts(map.block_count(), largest.div_ceil(block_size));

    let mut first = 0u64;
    let ranges: Vec<(u64, u64)> = counts
        .into_iter()
        .map(|count| {
            let range = (first, count);
            first += count;
            range
        })
        .collect();

    let start_digits = ranges.last().map_or(1, |&(start, _)| digits(start));
    let count_digits = ranges.iter().map(|&(_, count)| digits(count)).max().unwrap_or(1);

    let file_name = recovery_file.to_string_lossy();
    let base = file_name.strip_suffix(".par3").unwrap_or(&*file_name);
    ranges
        .into_iter()
        .map(|(start, count)| ArchiveFile {
            path: PathBuf::from(format!(
                "{}.part{:0sw$}+{:0cw$}.par3",
                base,
                start,
                count,
                sw = start_digits,
                cw = count_digits
            )),
            first_block: start,
            block_count: count,
        })
        .collect()
}

fn digits(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Write every planned archive file, one Data Packet per block
///
/// Block bytes are checked against their CRC-64 before they are stored.
pub fn write_archive_files(
    config: &EngineConfig,
    map: &BlockMap,
    files: &[ArchiveFile],
) -> Result<()> {
    let mut reader = BlockReader::new(map);
    let mut buf = alloc_zeroed(map.block_size() as usize)?;

    for archive in files {
        let path = &archive.path;
        let file = File::create(path).map_err(|e| Par3Error::file_io(path, FileOp::Create, e))?;
        let mut writer = BufWriter::new(file);

        for block in archive.blocks() {
            reader.read_block(block, &mut buf)?;
            let size = map.block(block)?.size as usize;
            let bytes = DataPacket::new(config.set_id, block, buf[..size].to_vec())
                .to_bytes()
                .map_err(|e| {
                    Par3Error::InvalidConfig(format!("cannot encode data packet: {}", e))
                })?;
            writer
                .write_all(&bytes)
                .map_err(|e| Par3Error::file_io(path, FileOp::Write, e))?;
        }
        writer
            .flush()
            .map_err(|e| Par3Error::file_io(path, FileOp::Write, e))?;
        info!(
            "Wrote {} data packets to {}",
            archive.block_count,
            path.display()
        );
    }
    Ok(())
}

/// A stored copy of an input block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub index: u64,
    pub path: PathBuf,
    /// Offset of the packet's first byte
    pub offset: u64,
    /// Number of block bytes in the packet
    pub size: u64,
}

/// Find every valid Data Packet of the configured set
pub fn scan_data_files<P: AsRef<Path>>(
    paths: &[P],
    config: &EngineConfig,
) -> Result<Vec<DataSource>> {
    let mut sources = Vec::new();
    for path in paths {
        let path = path.as_ref();
        for packet in scan_packets(path)? {
            let header = &packet.header;
            if &header.packet_type != TYPE_OF_PACKET
                || header.set_id != config.set_id
                || packet.head.len() < DATA_PACKET_HEADER_SIZE
            {
                continue;
            }
            let mut index = [0u8; 8];
            index.copy_from_slice(&packet.head[48..DATA_PACKET_HEADER_SIZE]);
            let index = u64::from_le_bytes(index);
            if index >= config.block_count {
                continue;
            }
            sources.push(DataSource {
                index,
                path: path.to_path_buf(),
                offset: packet.offset,
                size: header.length - DATA_PACKET_HEADER_SIZE as u64,
            });
        }
    }
    sources.sort_by_key(|s| s.index);
    debug!("Found {} data packets", sources.len());
    Ok(sources)
}

/// Copy lost blocks back from their Data Packets
///
/// A packet is used only when its size and CRC-64 match the block. Returns
/// the blocks that are still lost, ascending.
pub fn restore_blocks(
    map: &BlockMap,
    lost: &[u64],
    sources: &[DataSource],
    sink: &mut dyn BlockSink,
) -> Result<Vec<u64>> {
    let mut lost = lost.to_vec();
    lost.sort_unstable();
    lost.dedup();

    let mut handle = OutputHandle::new();
    let mut remaining = Vec::new();
    for block in lost {
        let expected = map.block(block)?;
        let mut restored = false;
        for source in sources
            .iter()
            .filter(|s| s.index == block && s.size == expected.size)
        {
            let mut data = alloc_zeroed(expected.size as usize)?;
            handle.read_at(
                &source.path,
                source.offset + DATA_PACKET_HEADER_SIZE as u64,
                &mut data,
            )?;
            if crc64(&data) != expected.crc {
                warn!(
                    "Data packet of block[{}] in {} does not match",
                    block,
                    source.path.display()
                );
                continue;
            }
            sink.write_block(block, 0, &data)?;
            restored = true;
            break;
        }
        if !restored {
            remaining.push(block);
        }
    }
    handle.close()?;
    sink.finish()?;
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_counts() {
        assert_eq!(ArchiveLayout::Uniform(3).block_counts(10, 0), vec![4, 3, 3]);
        assert_eq!(ArchiveLayout::Uniform(5).block_counts(10, 0), vec![2; 5]);
        // never more files than blocks
        assert_eq!(ArchiveLayout::Uniform(9).block_counts(4, 0), vec![1; 4]);
        assert_eq!(ArchiveLayout::Single.block_counts(10, 0), vec![10]);
    }

    #[test]
    fn test_variable_counts() {
        assert_eq!(ArchiveLayout::Variable(2).block_counts(10, 0), vec![4, 6]);
        assert_eq!(ArchiveLayout::Variable(3).block_counts(10, 0), vec![2, 4, 4]);
        // four files would hold 15 blocks; three are enough for 6
        assert_eq!(ArchiveLayout::Variable(4).block_counts(6, 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_doubling_counts() {
        assert_eq!(
            ArchiveLayout::PowerOfTwo.block_counts(10, 0),
            vec![1, 2, 4, 3]
        );
        assert_eq!(
            ArchiveLayout::LimitSize.block_counts(10, 3),
            vec![1, 2, 3, 3, 1]
        );
        assert!(ArchiveLayout::PowerOfTwo.block_counts(0, 0).is_empty());
    }

    #[test]
    fn test_layout_from_scheme() {
        assert_eq!(
            ArchiveLayout::from_scheme("uniform", None).unwrap(),
            ArchiveLayout::Single
        );
        assert_eq!(
            ArchiveLayout::from_scheme("u", Some(4)).unwrap(),
            ArchiveLayout::Uniform(4)
        );
        assert_eq!(
            ArchiveLayout::from_scheme("variable", Some(0)).unwrap(),
            ArchiveLayout::PowerOfTwo
        );
        assert_eq!(
            ArchiveLayout::from_scheme("limit", Some(2)).unwrap(),
            ArchiveLayout::LimitSize
        );
        assert!(ArchiveLayout::from_scheme("zip", None).is_err());
    }

    #[test]
    fn test_file_names_pad_ranges() {
        let mut map = BlockMap::new(10);
        let file = map.add_file("input", 200);
        for i in 0..20 {
            let block = map.push_block(10, 0, crate::mapping::BlockKind::Full);
            map.attach_slice(block, file, i * 10, 10, 0).unwrap();
        }
        let files = plan_archive_files(Path::new("dir/set.par3"), ArchiveLayout::PowerOfTwo, &map);
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "dir/set.part00+1.par3",
                "dir/set.part01+2.par3",
                "dir/set.part03+4.par3",
                "dir/set.part07+8.par3",
                "dir/set.part15+5.par3",
            ]
        );
        assert_eq!(files[4].file_size(&map), 5 * (56 + 10));
    }
}
