//! Recovery block construction
//!
//! Every input block is multiplied into every recovery block
//! ("one-to-all"): `recovery[j] ^= coefficient(i, j) · input[i]`.
//!
//! ## Memory modes
//!
//! - **Whole**: one input region is resident at a time next to all recovery
//!   regions; packets are written complete at the end.
//! - **Split**: when the regions of all blocks do not fit the memory ceiling,
//!   each block is processed in `split_size` pieces. Packet headers go out
//!   first with a zero digest, each pass appends a piece of every recovery
//!   payload, and the final pass reads every packet back to check it and
//!   write its digest.

use crate::archive::ArchiveFile;
use crate::checksum::{crc64_value, new_crc64, packet_digest};
use crate::config::{EngineConfig, SplitPlan};
use crate::error::{Par3Error, RegionKind, Result};
use crate::file_ops::OutputHandle;
use crate::galois::Field;
use crate::mapping::BlockMap;
use crate::packets::recovery_data_packet::{RecoveryDataHeader, RECOVERY_DATA_HEADER_SIZE};
use crate::packets::DIGEST_START;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::reader::BlockReader;
use crate::recovery_loader::RecoveryPosition;
use crate::reed_solomon::{check_capacity, coefficient};
use crate::region::{alloc_zeroed, region_size, RegionCodec, RegionTable};
use log::{debug, info};
use std::path::PathBuf;

const OPERATION: &str = "Creating";

/// What a creation run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateReport {
    pub whole_memory: bool,
    pub split_count: u64,
    /// Number of passes over the input blocks
    pub passes: u64,
}

/// Creates the recovery blocks of a recovery set
pub struct RecoveryCreator<'a> {
    config: &'a EngineConfig,
    map: &'a BlockMap,
    field: Field,
    codec: RegionCodec,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> RecoveryCreator<'a> {
    pub fn new(
        config: &'a EngineConfig,
        map: &'a BlockMap,
        reporter: &'a dyn ProgressReporter,
    ) -> Result<Self> {
        config.validate()?;
        if map.block_count() != config.block_count || map.block_size() != config.block_size {
            return Err(Par3Error::InvalidConfig(format!(
                "mapping has {} blocks of {} bytes, configuration expects {} of {}",
                map.block_count(),
                map.block_size(),
                config.block_count,
                config.block_size
            )));
        }
        let field = config.field()?;
        check_capacity(&field, config.block_count, config.recovery_block_count)?;
        let codec = RegionCodec::for_gf_size(config.gf_size);
        Ok(RecoveryCreator {
            config,
            map,
            field,
            codec,
            reporter,
        })
    }

    /// Create every recovery block, choosing the memory mode
    ///
    /// Falls back to split mode when the whole-mode buffers cannot be
    /// allocated.
    pub fn create(&self, positions: &[RecoveryPosition]) -> Result<CreateReport> {
        self.check_positions(positions)?;
        let plan = self.config.create_plan();

        if plan.is_whole() {
            match self.create_recovery_block(positions) {
                Err(Par3Error::Memory { bytes }) => {
                    info!("Failed to allocate {} bytes, splitting blocks", bytes);
                }
                result => return result,
            }
            return self.create_recovery_block_split(positions, plan.fallback());
        }
        self.create_recovery_block_split(positions, plan)
    }

    fn check_positions(&self, positions: &[RecoveryPosition]) -> Result<()> {
        if positions.len() as u64 != self.config.recovery_block_count {
            return Err(Par3Error::InvalidConfig(format!(
                "{} packet positions for {} recovery blocks",
                positions.len(),
                self.config.recovery_block_count
            )));
        }
        Ok(())
    }

    fn header(&self, index: u64) -> Result<Vec<u8>> {
        RecoveryDataHeader::new(
            self.config.set_id,
            self.config.root_checksum,
            self.config.matrix_checksum,
            index,
            self.config.block_size,
        )
        .to_bytes()
        .map_err(|e| Par3Error::InvalidConfig(format!("cannot encode packet header: {}", e)))
    }

    /// Multiply one input region into every recovery region
    fn scatter(&self, input: u64, region: &[u8], recovery: &mut RegionTable) {
        for (j, target) in recovery.iter_mut().enumerate() {
            let factor = coefficient(&self.field, input, j as u64);
            self.field.region_multiply_add(region, target, factor);
        }
    }

    /// Whole-block mode: all recovery regions resident, one input at a time
    pub fn create_recovery_block(&self, positions: &[RecoveryPosition]) -> Result<CreateReport> {
        self.check_positions(positions)?;
        let block_size = self.config.block_size as usize;
        let block_count = self.config.block_count;
        let size = region_size(block_size);

        let mut recovery = RegionTable::new(self.config.recovery_block_count as usize, size)?;
        let mut work = alloc_zeroed(size)?;
        self.reporter.report_mode(OPERATION, 1, block_size as u64);
        debug!(
            "Creating {} recovery blocks from {} input blocks in memory",
            recovery.len(),
            block_count
        );

        let mut reader = BlockReader::new(self.map);
        for block in 0..block_count {
            reader.read_block(block, &mut work)?;
            self.codec
                .create_parity(&mut work, block_size)
                .map_err(|e| Par3Error::parity(RegionKind::Input, block, e))?;
            self.scatter(block, &work, &mut recovery);
            self.reporter.report_progress(OPERATION, block + 1, block_count);
        }
        drop(reader);

        for (j, region) in recovery.iter().enumerate() {
            self.codec
                .check_parity(region, block_size)
                .map_err(|e| Par3Error::parity(RegionKind::Recovery, j as u64, e))?;
        }

        let mut output = OutputHandle::new();
        for (j, (region, position)) in recovery.iter().zip(positions).enumerate() {
            let mut header = self.header(j as u64)?;
            let body = &region[..block_size];
            let digest = packet_digest(&[&header[DIGEST_START..], body]);
            header[8..DIGEST_START].copy_from_slice(&digest);
            output.write_at(&position.path, position.offset, &header)?;
            output.write_at(&position.path, position.payload_offset(), body)?;
        }
        output.close()?;

        self.reporter.report_complete(OPERATION);
        Ok(CreateReport {
            whole_memory: true,
            split_count: 1,
            passes: 1,
        })
    }

    /// Split mode: every block handled in `plan.split_size` pieces
    pub fn create_recovery_block_split(
        &self,
        positions: &[RecoveryPosition],
        plan: SplitPlan,
    ) -> Result<CreateReport> {
        self.check_positions(positions)?;
        let block_count = self.config.block_count;
        let sub_size = plan.sub_region_size();

        let mut inputs = RegionTable::new(block_count as usize, sub_size)?;
        let mut recovery = RegionTable::new(self.config.recovery_block_count as usize, sub_size)?;
        self.reporter
            .report_mode(OPERATION, plan.split_count, plan.split_size);
        debug!(
            "Splitting {} byte blocks into {} byte pieces ({} passes)",
            plan.block_size,
            plan.split_size,
            plan.pass_count()
        );

        let mut output = OutputHandle::new();

        // headers first, digest zero until the payload is complete
        let mut packet_crcs = Vec::with_capacity(positions.len());
        for (j, position) in positions.iter().enumerate() {
            let header = self.header(j as u64)?;
            output.write_at(&position.path, position.offset, &header)?;
            let mut crc = new_crc64();
            crc.update(&header[DIGEST_START..]);
            packet_crcs.push(crc);
        }

        let mut block_crcs: Vec<_> = (0..block_count).map(|_| new_crc64()).collect();
        let mut reader = BlockReader::new(self.map);
        let pass_count = plan.pass_count();

        for (pass, (split_offset, len)) in plan.passes().enumerate() {
            let len_usize = len as usize;
            let final_pass = split_offset + len == plan.block_size;

            for block in 0..block_count {
                let region = inputs.get_mut(block as usize);
                reader.read_range(block, split_offset, &mut region[..len_usize])?;

                let info = self.map.block(block)?;
                let crc = &mut block_crcs[block as usize];
                if split_offset < info.size {
                    let logical = len.min(info.size - split_offset) as usize;
                    crc.update(&region[..logical]);
                }
                if final_pass && crc64_value(crc) != info.crc {
                    return Err(Par3Error::DataIntegrity { block });
                }

                self.codec
                    .create_parity(region, len_usize)
                    .map_err(|e| Par3Error::parity(RegionKind::Input, block, e))?;
            }

            recovery.clear();
            for block in 0..block_count {
                self.scatter(block, inputs.get(block as usize), &mut recovery);
            }

            for (j, (region, position)) in recovery.iter().zip(positions).enumerate() {
                self.codec
                    .check_parity(region, len_usize)
                    .map_err(|e| Par3Error::parity(RegionKind::Recovery, j as u64, e))?;
                let piece = &region[..len_usize];
                output.write_at(
                    &position.path,
                    position.payload_offset() + split_offset,
                    piece,
                )?;
                packet_crcs[j].update(piece);
            }

            self.reporter
                .report_progress(OPERATION, pass as u64 + 1, pass_count);
        }
        drop(reader);

        for (j, position) in positions.iter().enumerate() {
            let expected = crc64_value(&packet_crcs[j]);
            let digest = self.read_back(&mut output, position, j as u64, expected, sub_size)?;
            output.write_at(&position.path, position.offset + 8, &digest)?;
        }
        output.close()?;

        self.reporter.report_complete(OPERATION);
        Ok(CreateReport {
            whole_memory: false,
            split_count: plan.split_count,
            passes: pass_count,
        })
    }

    /// Re-read a written packet, compare it to the running CRC and return
    /// its digest
    fn read_back(
        &self,
        output: &mut OutputHandle,
        position: &RecoveryPosition,
        index: u64,
        expected_crc: u64,
        chunk_size: usize,
    ) -> Result<[u8; 16]> {
        let end = position.offset + RECOVERY_DATA_HEADER_SIZE as u64 + self.config.block_size;
        let mut cursor = position.offset + DIGEST_START as u64;
        let mut buffer = alloc_zeroed(chunk_size.max(RECOVERY_DATA_HEADER_SIZE))?;
        let mut crc = new_crc64();
        let mut hasher = blake3::Hasher::new();

        while cursor < end {
            let len = ((end - cursor) as usize).min(buffer.len());
            output.read_at(&position.path, cursor, &mut buffer[..len])?;
            crc.update(&buffer[..len]);
            hasher.update(&buffer[..len]);
            cursor += len as u64;
        }

        if crc64_value(&crc) != expected_crc {
            return Err(Par3Error::PacketChecksum { index });
        }
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
        Ok(digest)
    }
}

/// Create the recovery blocks and record the memory mode in `ecc_method`
pub fn create_recovery(
    config: &mut EngineConfig,
    map: &BlockMap,
    positions: &[RecoveryPosition],
    reporter: &dyn ProgressReporter,
) -> Result<CreateReport> {
    let report = RecoveryCreator::new(config, map, reporter)?.create(positions)?;
    config.set_whole_memory(report.whole_memory);
    Ok(report)
}

/// What a creation run would do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialReport {
    pub plan: SplitPlan,
    /// Bytes of Recovery Data Packets that would be written
    pub recovery_bytes: u64,
    /// Planned archive files with their sizes
    pub archive: Vec<(PathBuf, u64)>,
}

/// Validate a creation run and size its output without touching any file
pub fn trial(config: &EngineConfig, map: &BlockMap, archive: &[ArchiveFile]) -> Result<TrialReport> {
    RecoveryCreator::new(config, map, &SilentReporter)?;
    let packet_size = RECOVERY_DATA_HEADER_SIZE as u64 + config.block_size;
    Ok(TrialReport {
        plan: config.create_plan(),
        recovery_bytes: packet_size * config.recovery_block_count,
        archive: archive
            .iter()
            .map(|file| (file.path.clone(), file.file_size(map)))
            .collect(),
    })
}

/// Packet positions for `count` recovery blocks written back to back
pub fn sequential_positions(
    path: impl AsRef<std::path::Path>,
    start: u64,
    count: u64,
    block_size: u64,
) -> Vec<RecoveryPosition> {
    let packet_size = RECOVERY_DATA_HEADER_SIZE as u64 + block_size;
    (0..count)
        .map(|j| RecoveryPosition::new(path.as_ref(), start + j * packet_size))
        .collect()
}
