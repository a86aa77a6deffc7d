//! Configuration for recovery creation and repair

use crate::error::{Par3Error, Result};
use crate::galois::{Field, FieldWidth, GF16_POLY, GF8_POLY};
use crate::mapping::{suggest_block_size, BlockMap};
use crate::region::region_size;

/// ECC method bit: Cauchy Reed-Solomon
pub const ECC_REED_SOLOMON: u32 = 0x1;
/// ECC method bit: the last operation kept every block resident
pub const ECC_WHOLE_MEMORY: u32 = 0x1000;

/// Parameters of a recovery set plus the engine's resource limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes per block
    pub block_size: u64,
    /// Number of input blocks
    pub block_count: u64,
    /// Number of recovery blocks
    pub recovery_block_count: u64,
    /// Memory ceiling in bytes for resident regions (0 = unlimited)
    pub memory_limit: u64,
    pub galois_poly: u32,
    /// Bytes per field element (1 or 2)
    pub gf_size: u8,
    pub ecc_method: u32,
    /// -1 quiet, 0 normal, 1 verbose, 2+ debug
    pub noise_level: i32,
    /// Recovery set identifier stored in every packet envelope
    pub set_id: [u8; 8],
    pub root_checksum: [u8; 16],
    pub matrix_checksum: [u8; 16],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 0,
            block_count: 0,
            recovery_block_count: 0,
            memory_limit: 0,
            galois_poly: GF16_POLY,
            gf_size: 2,
            ecc_method: ECC_REED_SOLOMON,
            noise_level: 0,
            set_id: [0; 8],
            root_checksum: [0; 16],
            matrix_checksum: [0; 16],
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Configuration for a creation run from command-line arguments
    ///
    /// Block size and count come from the mapping of the input files. The
    /// field is the one given with `--field-bits`, or the narrowest one that
    /// fits the set.
    pub fn from_args(matches: &clap::ArgMatches, map: &BlockMap) -> Result<Self> {
        let noise_level = if matches.get_flag("quiet") {
            -1
        } else {
            matches.get_count("verbose") as i32
        };

        let recovery_block_count = number_arg(matches, "recovery-count")?.unwrap_or(1);
        let mut builder = EngineConfigBuilder::new()
            .block_size(map.block_size())
            .block_count(map.block_count())
            .recovery_block_count(recovery_block_count)
            .noise_level(noise_level);
        if let Some(megabytes) = number_arg(matches, "memory")? {
            let bytes = megabytes.checked_mul(1 << 20).ok_or_else(|| {
                Par3Error::InvalidConfig(format!("memory limit of {} MB is too large", megabytes))
            })?;
            builder = builder.memory_limit(bytes);
        }
        let width = match number_arg(matches, "field-bits")? {
            Some(bits) => u32::try_from(bits)
                .ok()
                .and_then(FieldWidth::from_bits)
                .ok_or_else(|| {
                    Par3Error::InvalidConfig(format!("field-bits must be 8 or 16, got {}", bits))
                })?,
            None => FieldWidth::for_block_count(map.block_count(), recovery_block_count),
        };
        builder.field(width).build()
    }

    /// Block size from `--block-size`, or one suggested for files of `sizes`
    pub fn block_size_from_args(matches: &clap::ArgMatches, sizes: &[u64]) -> Result<u64> {
        Ok(number_arg(matches, "block-size")?.unwrap_or_else(|| suggest_block_size(sizes)))
    }

    /// Build the Galois Field named by `galois_poly` / `gf_size`
    pub fn field(&self) -> Result<Field> {
        Ok(Field::build(self.galois_poly, self.gf_size as u32 * 8)?)
    }

    /// Size of one full block region
    pub fn region_size(&self) -> usize {
        region_size(self.block_size as usize)
    }

    pub fn whole_memory(&self) -> bool {
        self.ecc_method & ECC_WHOLE_MEMORY != 0
    }

    pub(crate) fn set_whole_memory(&mut self, whole: bool) {
        if whole {
            self.ecc_method |= ECC_WHOLE_MEMORY;
        } else {
            self.ecc_method &= !ECC_WHOLE_MEMORY;
        }
    }

    /// Memory plan for creating every recovery block
    pub fn create_plan(&self) -> SplitPlan {
        SplitPlan::new(
            self.block_size,
            self.block_count + self.recovery_block_count,
            self.memory_limit,
        )
    }

    /// Memory plan for reconstructing `lost` distinct blocks (plus one work
    /// region)
    pub fn repair_plan(&self, lost: usize) -> SplitPlan {
        SplitPlan::new(self.block_size, lost as u64 + 1, self.memory_limit)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Par3Error::InvalidConfig("block size must not be zero".into()));
        }
        if self.block_count == 0 {
            return Err(Par3Error::InvalidConfig("no input blocks".into()));
        }
        if self.ecc_method & ECC_REED_SOLOMON == 0 {
            return Err(Par3Error::InvalidConfig(format!(
                "unsupported ECC method 0x{:X}",
                self.ecc_method
            )));
        }
        let field = self.field()?;
        if self.block_size % field.width().bytes() as u64 != 0 {
            return Err(Par3Error::InvalidConfig(format!(
                "block size {} is not a multiple of the field word ({} bytes)",
                self.block_size,
                field.width().bytes()
            )));
        }
        Ok(())
    }
}

fn number_arg(matches: &clap::ArgMatches, name: &str) -> Result<Option<u64>> {
    matches
        .get_one::<String>(name)
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| Par3Error::InvalidConfig(format!("{}: not a number: {}", name, s)))
        })
        .transpose()
}

/// How a block is cut into passes to stay under the memory ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    /// Number of pieces the memory requirement was divided into (1 = whole)
    pub split_count: u64,
    /// Bytes of each block handled per pass (even)
    pub split_size: u64,
    pub block_size: u64,
}

impl SplitPlan {
    /// Plan for `regions` resident regions of `block_size` bytes
    pub fn new(block_size: u64, regions: u64, memory_limit: u64) -> Self {
        let whole = region_size(block_size as usize) as u64 * regions;
        if memory_limit == 0 || whole <= memory_limit {
            return SplitPlan {
                split_count: 1,
                split_size: block_size,
                block_size,
            };
        }

        Self::with_count(block_size, whole.div_ceil(memory_limit))
    }

    /// Plan that cuts each block into `split_count` pieces
    pub fn with_count(block_size: u64, split_count: u64) -> Self {
        let split_count = split_count.max(1);
        let split_size = block_size.div_ceil(split_count).max(1);
        let split_size = (split_size + 1) & !1;
        SplitPlan {
            split_count,
            split_size,
            block_size,
        }
    }

    /// Plan used when a whole-block allocation failed
    pub fn fallback(&self) -> Self {
        Self::with_count(self.block_size, self.split_count.max(1) * 2)
    }

    pub fn is_whole(&self) -> bool {
        self.split_count == 1
    }

    /// Region size of one pass
    pub fn sub_region_size(&self) -> usize {
        region_size(self.split_size.min(self.block_size) as usize)
    }

    /// `(split_offset, length)` of every pass
    pub fn passes(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let step = self.split_size.max(1);
        (0..self.block_size)
            .step_by(step as usize)
            .map(move |offset| (offset, step.min(self.block_size - offset)))
    }

    pub fn pass_count(&self) -> u64 {
        self.block_size.div_ceil(self.split_size.max(1))
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_size(mut self, size: u64) -> Self {
        self.config.block_size = size;
        self
    }

    pub fn block_count(mut self, count: u64) -> Self {
        self.config.block_count = count;
        self
    }

    pub fn recovery_block_count(mut self, count: u64) -> Self {
        self.config.recovery_block_count = count;
        self
    }

    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Select the field by width; sets both `galois_poly` and `gf_size`
    pub fn field(mut self, width: FieldWidth) -> Self {
        self.config.galois_poly = match width {
            FieldWidth::Gf8 => GF8_POLY,
            FieldWidth::Gf16 => GF16_POLY,
        };
        self.config.gf_size = width.bytes() as u8;
        self
    }

    pub fn galois_poly(mut self, poly: u32, gf_size: u8) -> Self {
        self.config.galois_poly = poly;
        self.config.gf_size = gf_size;
        self
    }

    pub fn noise_level(mut self, level: i32) -> Self {
        self.config.noise_level = level;
        self
    }

    pub fn set_id(mut self, id: [u8; 8]) -> Self {
        self.config.set_id = id;
        self
    }

    pub fn root_checksum(mut self, checksum: [u8; 16]) -> Self {
        self.config.root_checksum = checksum;
        self
    }

    pub fn matrix_checksum(mut self, checksum: [u8; 16]) -> Self {
        self.config.matrix_checksum = checksum;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_plan_when_unlimited_or_fits() {
        let plan = SplitPlan::new(4096, 13, 0);
        assert!(plan.is_whole());
        assert_eq!(plan.passes().collect::<Vec<_>>(), vec![(0, 4096)]);

        let plan = SplitPlan::new(4096, 13, 4100 * 13);
        assert!(plan.is_whole());
    }

    #[test]
    fn test_half_ceiling_gives_two_passes() {
        let n = 13;
        let limit = (4096u64 + 4).div_ceil(2) * n;
        let plan = SplitPlan::new(4096, n, limit);
        assert_eq!(plan.split_count, 2);
        assert_eq!(plan.split_size, 2048);
        assert_eq!(plan.pass_count(), 2);
        assert_eq!(
            plan.passes().collect::<Vec<_>>(),
            vec![(0, 2048), (2048, 2048)]
        );
    }

    #[test]
    fn test_split_size_is_even() {
        let plan = SplitPlan::new(1000, 10, 3000);
        assert_eq!(plan.split_size % 2, 0);
        let covered: u64 = plan.passes().map(|(_, len)| len).sum();
        assert_eq!(covered, 1000);
    }

    #[test]
    fn test_builder_validation() {
        assert!(EngineConfig::builder().block_count(1).build().is_err());
        assert!(EngineConfig::builder()
            .block_size(1001)
            .block_count(1)
            .field(FieldWidth::Gf16)
            .build()
            .is_err());
        let config = EngineConfig::builder()
            .block_size(1001)
            .block_count(1)
            .field(FieldWidth::Gf8)
            .build()
            .unwrap();
        assert_eq!(config.gf_size, 1);
        assert_eq!(config.galois_poly, GF8_POLY);
    }

    fn matches(args: &[&str]) -> clap::ArgMatches {
        let mut argv = vec!["par3create", "-o", "out.par3"];
        argv.extend_from_slice(args);
        argv.push("input.bin");
        crate::args::create_command()
            .try_get_matches_from(argv)
            .unwrap()
    }

    fn map(block_size: u64, blocks: u64) -> BlockMap {
        let mut map = BlockMap::new(block_size);
        for _ in 0..blocks {
            map.push_block(block_size, 0, crate::mapping::BlockKind::Full);
        }
        map
    }

    #[test]
    fn test_from_args_picks_field_from_block_count() {
        let config = EngineConfig::from_args(&matches(&["-r", "4"]), &map(64, 128)).unwrap();
        assert_eq!(config.gf_size, 1);
        assert_eq!(config.recovery_block_count, 4);
        assert_eq!(config.block_size, 64);

        let config = EngineConfig::from_args(&matches(&[]), &map(64, 129)).unwrap();
        assert_eq!(config.gf_size, 2);
        assert_eq!(config.galois_poly, GF16_POLY);

        let config =
            EngineConfig::from_args(&matches(&["--field-bits", "16"]), &map(64, 3)).unwrap();
        assert_eq!(config.gf_size, 2);
        assert!(EngineConfig::from_args(&matches(&["--field-bits", "12"]), &map(64, 3)).is_err());
    }

    #[test]
    fn test_memory_limit_overflow_is_config_error() {
        let config = EngineConfig::from_args(&matches(&["-m", "3"]), &map(64, 3)).unwrap();
        assert_eq!(config.memory_limit, 3 << 20);

        let huge = (u64::MAX >> 19).to_string();
        let err = EngineConfig::from_args(&matches(&["-m", &huge]), &map(64, 3)).unwrap_err();
        assert!(matches!(err, Par3Error::InvalidConfig(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_block_size_from_args() {
        assert_eq!(
            EngineConfig::block_size_from_args(&matches(&["-b", "512"]), &[1 << 20]).unwrap(),
            512
        );
        assert_eq!(
            EngineConfig::block_size_from_args(&matches(&[]), &[1 << 20]).unwrap(),
            8192
        );
        assert!(EngineConfig::block_size_from_args(&matches(&["-b", "x"]), &[1]).is_err());
    }

    #[test]
    fn test_whole_memory_flag() {
        let mut config = EngineConfig::default();
        config.set_whole_memory(true);
        assert!(config.whole_memory());
        assert_eq!(config.ecc_method, ECC_REED_SOLOMON | ECC_WHOLE_MEMORY);
        config.set_whole_memory(false);
        assert_eq!(config.ecc_method, ECC_REED_SOLOMON);
    }
}
