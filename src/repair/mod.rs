//! Lost block reconstruction
//!
//! Rebuilds lost input blocks from the surviving input blocks and as many
//! recovery blocks as there are lost blocks. Every available input block and
//! every used recovery block is read exactly once per pass and multiplied
//! into all lost regions with the factors of a [`RecoveryMatrix`].
//!
//! ## Memory modes
//!
//! - **Whole**: one region per lost block plus one work region, each input
//!   read in full.
//! - **Split**: the same computation over `split_size` pieces; block CRCs
//!   accumulate across passes and are checked after the last one.

mod sink;

pub use sink::{BlockSink, FileBlockSink, MemorySink};

use crate::checksum::{crc64, crc64_value, new_crc64};
use crate::config::{EngineConfig, SplitPlan};
use crate::error::{Par3Error, RegionKind, Result};
use crate::galois::Field;
use crate::mapping::BlockMap;
use crate::progress::ProgressReporter;
use crate::reader::BlockReader;
use crate::recovery_loader::RecoverySource;
use crate::reed_solomon::RecoveryMatrix;
use crate::region::{alloc_zeroed, region_size, RegionCodec, RegionTable};
use log::{debug, info};

const OPERATION: &str = "Repairing";

/// Whether `lost` blocks can be rebuilt with `recovery_available` recovery blocks
pub fn can_repair(block_count: u64, lost: usize, recovery_available: usize) -> bool {
    let block_available = block_count.saturating_sub(lost as u64);
    block_available + recovery_available as u64 >= block_count
}

/// What a repair run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub whole_memory: bool,
    pub split_count: u64,
    pub passes: u64,
    /// Reconstructed block indices, ascending
    pub repaired: Vec<u64>,
    /// Recovery block indices used
    pub recovery_used: Vec<u64>,
}

/// Reconstructs lost blocks of a recovery set
pub struct LostBlockRecovery<'a> {
    config: &'a EngineConfig,
    map: &'a BlockMap,
    field: Field,
    codec: RegionCodec,
    reporter: &'a dyn ProgressReporter,
}

/// Lost blocks and the recovery sources chosen for them
struct Solution<'s> {
    matrix: RecoveryMatrix,
    sources: Vec<&'s RecoverySource>,
    is_lost: Vec<bool>,
}

impl<'a> LostBlockRecovery<'a> {
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
        Ok(LostBlockRecovery {
            config,
            map,
            field: config.field()?,
            codec: RegionCodec::for_gf_size(config.gf_size),
            reporter,
        })
    }

    /// Rebuild `lost`, choosing the memory mode
    pub fn repair(
        &self,
        lost: &[u64],
        sources: &[RecoverySource],
        sink: &mut dyn BlockSink,
    ) -> Result<RepairReport> {
        let lost = Self::normalize(lost);
        let plan = self.config.repair_plan(lost.len());
        if plan.is_whole() {
            match self.recover_lost_block(&lost, sources, sink) {
                Err(Par3Error::Memory { bytes }) => {
                    info!("Failed to allocate {} bytes, splitting blocks", bytes);
                }
                result => return result,
            }
            return self.recover_lost_block_split(&lost, sources, sink, plan.fallback());
        }
        self.recover_lost_block_split(&lost, sources, sink, plan)
    }

    fn solve<'s>(&self, lost: &[u64], sources: &'s [RecoverySource]) -> Result<Solution<'s>> {
        let block_count = self.config.block_count;
        if let Some(&bad) = lost.iter().find(|&&b| b >= block_count) {
            return Err(Par3Error::Mapping { block: bad });
        }
        if !can_repair(block_count, lost.len(), sources.len()) {
            return Err(Par3Error::InsufficientRecoveryBlocks {
                missing: lost.len(),
                available: sources.len(),
            });
        }

        let mut is_lost = vec![false; block_count as usize];
        for &block in lost {
            is_lost[block as usize] = true;
        }

        let mut sorted: Vec<&RecoverySource> = sources.iter().collect();
        sorted.sort_by_key(|s| s.index);
        sorted.dedup_by_key(|s| s.index);
        let indices: Vec<u64> = sorted.iter().map(|s| s.index).collect();

        let matrix = RecoveryMatrix::compute(&self.field, block_count, lost, &indices)?;
        sorted.truncate(lost.len());
        debug!(
            "Using recovery blocks {:?} for lost blocks {:?}",
            matrix.recovery(),
            matrix.lost()
        );
        Ok(Solution {
            matrix,
            sources: sorted,
            is_lost,
        })
    }

    fn normalize(lost: &[u64]) -> Vec<u64> {
        let mut lost = lost.to_vec();
        lost.sort_unstable();
        lost.dedup();
        lost
    }

    fn report(&self, whole: bool, plan: &SplitPlan, solution: &Solution) -> RepairReport {
        RepairReport {
            whole_memory: whole,
            split_count: plan.split_count,
            passes: if whole { 1 } else { plan.pass_count() },
            repaired: solution.matrix.lost().to_vec(),
            recovery_used: solution.matrix.recovery().to_vec(),
        }
    }

    /// Multiply `region` into every lost region with the factor `factor(k)`
    fn accumulate(&self, region: &[u8], lost: &mut RegionTable, factor: impl Fn(usize) -> u16) {
        for (k, target) in lost.iter_mut().enumerate() {
            self.field.region_multiply_add(region, target, factor(k));
        }
    }

    /// Whole-memory mode
    pub fn recover_lost_block(
        &self,
        lost: &[u64],
        sources: &[RecoverySource],
        sink: &mut dyn BlockSink,
    ) -> Result<RepairReport> {
        let lost = Self::normalize(lost);
        let plan = SplitPlan::with_count(self.config.block_size, 1);
        if lost.is_empty() {
            return Ok(RepairReport {
                whole_memory: true,
                split_count: 1,
                passes: 0,
                repaired: Vec::new(),
                recovery_used: Vec::new(),
            });
        }
        let solution = self.solve(&lost, sources)?;
        let block_size = self.config.block_size as usize;
        let size = region_size(block_size);

        let mut regions = RegionTable::new(lost.len(), size)?;
        let mut work = alloc_zeroed(size)?;
        self.reporter.report_mode(OPERATION, 1, block_size as u64);

        // every available input plus one recovery block per lost block
        let total = self.config.block_count;
        let mut done = 0u64;

        let mut reader = BlockReader::new(self.map);
        for block in (0..self.config.block_count).filter(|&b| !solution.is_lost[b as usize]) {
            reader.read_block(block, &mut work)?;
            self.codec
                .create_parity(&mut work, block_size)
                .map_err(|e| Par3Error::parity(RegionKind::Input, block, e))?;
            self.accumulate(&work, &mut regions, |k| solution.matrix.input_factor(k, block));
            done += 1;
            self.reporter.report_progress(OPERATION, done, total);
        }
        drop(reader);

        for (r, source) in solution.sources.iter().enumerate() {
            source.loader.load_chunk(0, &mut work[..block_size])?;
            self.codec
                .create_parity(&mut work, block_size)
                .map_err(|e| Par3Error::parity(RegionKind::Recovery, source.index, e))?;
            self.accumulate(&work, &mut regions, |k| solution.matrix.recovery_factor(k, r));
            done += 1;
            self.reporter.report_progress(OPERATION, done, total);
        }

        for (k, &block) in lost.iter().enumerate() {
            let region = regions.get(k);
            self.codec
                .check_parity(region, block_size)
                .map_err(|e| Par3Error::parity(RegionKind::Reconstructed, block, e))?;
            let expected = self.map.block(block)?;
            let logical = &region[..expected.size as usize];
            if crc64(logical) != expected.crc {
                return Err(Par3Error::DataIntegrity { block });
            }
            sink.write_block(block, 0, logical)?;
        }
        sink.finish()?;

        self.reporter.report_complete(OPERATION);
        Ok(self.report(true, &plan, &solution))
    }

    /// Split mode: lost regions of `plan.split_size` bytes, one pass per piece
    pub fn recover_lost_block_split(
        &self,
        lost: &[u64],
        sources: &[RecoverySource],
        sink: &mut dyn BlockSink,
        plan: SplitPlan,
    ) -> Result<RepairReport> {
        let lost = Self::normalize(lost);
        if lost.is_empty() {
            return Ok(RepairReport {
                whole_memory: false,
                split_count: plan.split_count,
                passes: 0,
                repaired: Vec::new(),
                recovery_used: Vec::new(),
            });
        }
        let solution = self.solve(&lost, sources)?;
        let block_count = self.config.block_count;
        let sub_size = plan.sub_region_size();

        let mut regions = RegionTable::new(lost.len(), sub_size)?;
        let mut work = alloc_zeroed(sub_size)?;
        self.reporter
            .report_mode(OPERATION, plan.split_count, plan.split_size);
        debug!(
            "Splitting {} byte blocks into {} byte pieces ({} passes)",
            plan.block_size,
            plan.split_size,
            plan.pass_count()
        );

        let mut input_crcs: Vec<_> = (0..block_count).map(|_| new_crc64()).collect();
        let mut lost_crcs: Vec<_> = lost.iter().map(|_| new_crc64()).collect();
        let mut reader = BlockReader::new(self.map);
        let pass_count = plan.pass_count();

        for (pass, (split_offset, len)) in plan.passes().enumerate() {
            let len_usize = len as usize;
            let final_pass = split_offset + len == plan.block_size;
            regions.clear();

            for block in (0..block_count).filter(|&b| !solution.is_lost[b as usize]) {
                reader.read_range(block, split_offset, &mut work[..len_usize])?;
                let info = self.map.block(block)?;
                let crc = &mut input_crcs[block as usize];
                if split_offset < info.size {
                    crc.update(&work[..len.min(info.size - split_offset) as usize]);
                }
                if final_pass && crc64_value(crc) != info.crc {
                    return Err(Par3Error::DataIntegrity { block });
                }
                self.codec
                    .create_parity(&mut work, len_usize)
                    .map_err(|e| Par3Error::parity(RegionKind::Input, block, e))?;
                self.accumulate(&work, &mut regions, |k| solution.matrix.input_factor(k, block));
            }

            for (r, source) in solution.sources.iter().enumerate() {
                source.loader.load_chunk(split_offset, &mut work[..len_usize])?;
                self.codec
                    .create_parity(&mut work, len_usize)
                    .map_err(|e| Par3Error::parity(RegionKind::Recovery, source.index, e))?;
                self.accumulate(&work, &mut regions, |k| solution.matrix.recovery_factor(k, r));
            }

            for (k, &block) in lost.iter().enumerate() {
                let region = regions.get(k);
                self.codec
                    .check_parity(region, len_usize)
                    .map_err(|e| Par3Error::parity(RegionKind::Reconstructed, block, e))?;
                let info = self.map.block(block)?;
                if split_offset < info.size {
                    let logical = &region[..len.min(info.size - split_offset) as usize];
                    lost_crcs[k].update(logical);
                    sink.write_block(block, split_offset, logical)?;
                }
            }

            self.reporter
                .report_progress(OPERATION, pass as u64 + 1, pass_count);
        }
        drop(reader);

        for (k, &block) in lost.iter().enumerate() {
            if crc64_value(&lost_crcs[k]) != self.map.block(block)?.crc {
                return Err(Par3Error::DataIntegrity { block });
            }
        }
        sink.finish()?;

        self.reporter.report_complete(OPERATION);
        Ok(self.report(false, &plan, &solution))
    }
}

/// Rebuild `lost` and record the memory mode in `ecc_method`
pub fn repair_blocks(
    config: &mut EngineConfig,
    map: &BlockMap,
    lost: &[u64],
    sources: &[RecoverySource],
    sink: &mut dyn BlockSink,
    reporter: &dyn ProgressReporter,
) -> Result<RepairReport> {
    let report = LostBlockRecovery::new(config, map, reporter)?.repair(lost, sources, sink)?;
    config.set_whole_memory(report.whole_memory);
    Ok(report)
}
