//! Recovery data loading
//!
//! Recovery blocks are read back from the payload of their Recovery Data
//! Packets. [`scan_recovery_files`] finds every valid packet of a recovery
//! set; each found block is wrapped in a [`RecoverySource`] whose loader reads
//! payload chunks on demand.

use crate::checksum::packet_digest_reader;
use crate::config::EngineConfig;
use crate::error::{FileOp, Par3Error, Result};
use crate::packets::recovery_data_packet::{RecoveryDataHeader, RECOVERY_DATA_HEADER_SIZE};
use crate::packets::{PacketHeader, DIGEST_START, MAGIC_BYTES, PACKET_HEADER_SIZE};
use binrw::BinRead;
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Location of a Recovery Data Packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPosition {
    pub path: PathBuf,
    /// Offset of the packet's first byte (the magic)
    pub offset: u64,
}

impl RecoveryPosition {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        RecoveryPosition {
            path: path.into(),
            offset,
        }
    }

    /// Offset of the recovery block payload
    pub fn payload_offset(&self) -> u64 {
        self.offset + RECOVERY_DATA_HEADER_SIZE as u64
    }
}

/// Trait for loading recovery block bytes
///
/// Implementations can use different strategies:
/// - FileSystemLoader: reads the packet payload from disk per chunk
/// - MemoryLoader: recovery block already resident
pub trait RecoveryDataLoader {
    /// Fill `buf` with payload bytes starting at `chunk_offset`
    fn load_chunk(&self, chunk_offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Size of the recovery block payload
    fn data_size(&self) -> u64;
}

/// Filesystem-based loader for one Recovery Data Packet
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    pub position: RecoveryPosition,
    pub data_size: u64,
}

impl RecoveryDataLoader for FileSystemLoader {
    fn load_chunk(&self, chunk_offset: u64, buf: &mut [u8]) -> Result<()> {
        let path = &self.position.path;
        if chunk_offset + buf.len() as u64 > self.data_size {
            return Err(Par3Error::file_io(
                path,
                FileOp::Read,
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            ));
        }

        let mut file = File::open(path).map_err(|e| Par3Error::file_io(path, FileOp::Open, e))?;
        file.seek(SeekFrom::Start(self.position.payload_offset() + chunk_offset))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.read_exact(buf)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))
    }

    fn data_size(&self) -> u64 {
        self.data_size
    }
}

/// Loader over a recovery block held in memory
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    pub data: Vec<u8>,
}

impl RecoveryDataLoader for MemoryLoader {
    fn load_chunk(&self, chunk_offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = chunk_offset as usize;
        let chunk = self.data.get(start..start + buf.len()).ok_or_else(|| {
            Par3Error::file_io(
                "<memory>",
                FileOp::Read,
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            )
        })?;
        buf.copy_from_slice(chunk);
        Ok(())
    }

    fn data_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A recovery block available for reconstruction
pub struct RecoverySource {
    pub index: u64,
    pub loader: Box<dyn RecoveryDataLoader>,
}

impl std::fmt::Debug for RecoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverySource")
            .field("index", &self.index)
            .field("data_size", &self.loader.data_size())
            .finish()
    }
}

impl RecoverySource {
    pub fn from_file(index: u64, position: RecoveryPosition, data_size: u64) -> Self {
        RecoverySource {
            index,
            loader: Box::new(FileSystemLoader {
                position,
                data_size,
            }),
        }
    }

    pub fn from_memory(index: u64, data: Vec<u8>) -> Self {
        RecoverySource {
            index,
            loader: Box::new(MemoryLoader { data }),
        }
    }
}

/// Find every valid Recovery Data Packet of the configured set
///
/// Packets whose digest does not verify are skipped, so a block written by an
/// interrupted run never takes part in a repair. Sources come back sorted by
/// recovery index; a duplicate index keeps the first copy found.
pub fn scan_recovery_files<P: AsRef<Path>>(
    paths: &[P],
    config: &EngineConfig,
) -> Result<Vec<RecoverySource>> {
    let mut found: FxHashMap<u64, RecoverySource> = FxHashMap::default();

    for path in paths {
        let path = path.as_ref();
        for packet in scan_packets(path)? {
            let Ok(header) = RecoveryDataHeader::from_bytes(&packet.head) else {
                continue;
            };
            if !header.is_recovery_data() {
                continue;
            }
            if header.header.set_id != config.set_id
                || header.block_size() != config.block_size
                || header.index >= config.recovery_block_count
            {
                debug!(
                    "Skipping recovery data packet[{}] at {} of {}",
                    header.index,
                    packet.offset,
                    path.display()
                );
                continue;
            }
            found.entry(header.index).or_insert_with(|| {
                RecoverySource::from_file(
                    header.index,
                    RecoveryPosition::new(path, packet.offset),
                    config.block_size,
                )
            });
        }
    }

    let mut sources: Vec<RecoverySource> = found.into_values().collect();
    sources.sort_by_key(|s| s.index);
    debug!("Found {} recovery blocks", sources.len());
    Ok(sources)
}

/// A packet whose digest verified
#[derive(Debug, Clone)]
pub(crate) struct FoundPacket {
    pub header: PacketHeader,
    /// Offset of the magic in the file
    pub offset: u64,
    /// First bytes of the packet, up to the Recovery Data header size
    pub head: Vec<u8>,
}

/// Every packet of one file that passes its digest check
///
/// A header whose length runs past the end of the file, or whose digest
/// does not match, is skipped and the search resumes after its magic.
pub(crate) fn scan_packets(path: &Path) -> Result<Vec<FoundPacket>> {
    let mut file = File::open(path).map_err(|e| Par3Error::file_io(path, FileOp::Open, e))?;
    let file_size = file
        .metadata()
        .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?
        .len();

    let mut packets = Vec::new();
    let mut offset = 0u64;
    let mut header_bytes = [0u8; PACKET_HEADER_SIZE];

    while let Some(start) = find_magic(&mut file, path, offset, file_size)? {
        offset = start;
        let remaining = file_size.saturating_sub(start);
        if remaining < PACKET_HEADER_SIZE as u64 {
            break;
        }
        file.seek(SeekFrom::Start(start))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.read_exact(&mut header_bytes)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;

        let header = match PacketHeader::read(&mut Cursor::new(&header_bytes[..])) {
            Ok(header) => header,
            Err(_) => {
                offset += MAGIC_BYTES.len() as u64;
                continue;
            }
        };
        let length = header.length;
        if length < PACKET_HEADER_SIZE as u64 || length > remaining {
            debug!(
                "Packet at {} of {} claims {} bytes, {} left",
                start,
                path.display(),
                length,
                remaining
            );
            offset += MAGIC_BYTES.len() as u64;
            continue;
        }

        file.seek(SeekFrom::Start(start + DIGEST_START as u64))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        let digest = packet_digest_reader(&mut file, length - DIGEST_START as u64)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;
        if digest != header.digest {
            warn!("Packet at {} of {} is damaged", start, path.display());
            offset += MAGIC_BYTES.len() as u64;
            continue;
        }

        let mut head = vec![0u8; length.min(RECOVERY_DATA_HEADER_SIZE as u64) as usize];
        file.seek(SeekFrom::Start(start))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.read_exact(&mut head)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;

        packets.push(FoundPacket {
            header,
            offset: start,
            head,
        });
        offset = start + length;
    }

    Ok(packets)
}

/// Offset of the next packet magic at or after `from`
fn find_magic(file: &mut File, path: &Path, from: u64, file_size: u64) -> Result<Option<u64>> {
    const WINDOW: usize = 64 * 1024;
    let magic_len = MAGIC_BYTES.len();
    let mut buffer = vec![0u8; WINDOW];
    let mut position = from;

    while position + magic_len as u64 <= file_size {
        let len = (file_size - position).min(WINDOW as u64) as usize;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.read_exact(&mut buffer[..len])
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))?;

        if let Some(found) = buffer[..len]
            .windows(magic_len)
            .position(|w| w == MAGIC_BYTES)
        {
            return Ok(Some(position + found as u64));
        }
        if len < WINDOW {
            break;
        }
        // keep an overlap so a magic split across windows is still found
        position += (len - magic_len + 1) as u64;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::compute_digest;
    use std::io::Write;
    use tempfile::TempDir;

    fn packet(index: u64, payload: &[u8], config: &EngineConfig) -> Vec<u8> {
        let header = RecoveryDataHeader::new(
            config.set_id,
            config.root_checksum,
            config.matrix_checksum,
            index,
            payload.len() as u64,
        );
        let mut bytes = header.to_bytes().unwrap();
        bytes.extend_from_slice(payload);
        let digest = compute_digest(&bytes);
        bytes[8..24].copy_from_slice(&digest);
        bytes
    }

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .block_size(16)
            .block_count(4)
            .recovery_block_count(3)
            .set_id(*b"testset!")
            .build()
            .unwrap()
    }

    #[test]
    fn test_scan_finds_packets_and_skips_damaged() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let path = dir.path().join("set.par3");

        let mut contents = b"garbage before".to_vec();
        contents.extend(packet(2, &[2u8; 16], &config));
        let damaged_at = contents.len();
        contents.extend(packet(0, &[0u8; 16], &config));
        contents.extend(packet(1, &[1u8; 16], &config));
        contents[damaged_at + 100] ^= 0xFF;
        File::create(&path).unwrap().write_all(&contents).unwrap();

        let sources = scan_recovery_files(&[&path], &config).unwrap();
        let indices: Vec<u64> = sources.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2]);

        let mut buf = [0u8; 4];
        sources[1].loader.load_chunk(12, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 4]);
        assert!(sources[1].loader.load_chunk(14, &mut buf).is_err());
    }

    #[test]
    fn test_scan_filters_other_sets() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut other = config.clone();
        other.set_id = *b"otherset";
        let path = dir.path().join("mixed.par3");

        let mut contents = packet(0, &[9u8; 16], &other);
        contents.extend(packet(0, &[7u8; 16], &config));
        File::create(&path).unwrap().write_all(&contents).unwrap();

        let sources = scan_recovery_files(&[&path], &config).unwrap();
        assert_eq!(sources.len(), 1);
        let mut buf = [0u8; 16];
        sources[0].loader.load_chunk(0, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 16]);
    }

    #[test]
    fn test_memory_loader_bounds() {
        let source = RecoverySource::from_memory(0, vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        source.loader.load_chunk(2, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        assert!(source.loader.load_chunk(3, &mut buf).is_err());
        assert_eq!(source.loader.data_size(), 4);
    }
}
