//! PAR3 erasure coding and recovery engine
//!
//! Input files are mapped into fixed-size blocks ([`mapping`]), Cauchy
//! Reed-Solomon recovery blocks are computed over GF(2^8) or GF(2^16)
//! ([`create`]), and lost blocks are rebuilt from the survivors plus recovery
//! blocks ([`repair`]). Both directions respect a memory ceiling by splitting
//! blocks into pieces when all regions do not fit at once. Input blocks can
//! also be stored verbatim in archive files ([`archive`]).

pub mod archive;
pub mod args;
pub mod checksum;
pub mod config;
pub mod create;
pub mod domain;
pub mod error;
pub mod file_ops;
pub mod galois;
pub mod mapping;
pub mod packets;
pub mod progress;
pub mod reader;
pub mod recovery_loader;
pub mod reed_solomon;
pub mod region;
pub mod repair;

pub use archive::{
    plan_archive_files, restore_blocks, scan_data_files, write_archive_files, ArchiveFile,
    ArchiveLayout, DataSource,
};
pub use config::{EngineConfig, EngineConfigBuilder, SplitPlan};
pub use create::{create_recovery, trial, CreateReport, RecoveryCreator, TrialReport};
pub use error::{Par3Error, Result};
pub use galois::{Field, FieldWidth};
pub use mapping::{BlockKind, BlockMap, Deduplication};
pub use progress::{ConsoleReporter, ProgressReporter, SilentReporter};
pub use recovery_loader::{scan_recovery_files, RecoveryPosition, RecoverySource};
pub use repair::{repair_blocks, BlockSink, FileBlockSink, LostBlockRecovery, MemorySink, RepairReport};
