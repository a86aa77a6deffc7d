//! Error types for PAR3 recovery operations

use crate::galois::FieldError;
use crate::reed_solomon::MatrixError;
use crate::region::ParityError;
use std::path::PathBuf;
use thiserror::Error;

/// File operation that failed, kept for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Open,
    Create,
    Seek,
    Read,
    Write,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileOp::Open => "open",
            FileOp::Create => "create",
            FileOp::Seek => "seek",
            FileOp::Read => "read",
            FileOp::Write => "write",
        };
        f.write_str(name)
    }
}

/// Which kind of region failed its parity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Input,
    Recovery,
    Reconstructed,
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RegionKind::Input => "input block",
            RegionKind::Recovery => "recovery block",
            RegionKind::Reconstructed => "reconstructed block",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the recovery engine
#[derive(Debug, Error)]
pub enum Par3Error {
    /// Galois Field polynomial / width combination is not supported
    #[error(transparent)]
    UnsupportedField(#[from] FieldError),

    /// A buffer could not be allocated within the process limits
    #[error("Failed to allocate {bytes} bytes")]
    Memory { bytes: usize },

    /// I/O failure on an input, recovery or output file
    #[error("Failed to {op} {path}: {source}")]
    FileIo {
        path: PathBuf,
        op: FileOp,
        source: std::io::Error,
    },

    /// Slice chain of a block is broken, cyclic, or does not cover the block
    #[error("Mapping information for block[{block}] is wrong")]
    Mapping { block: u64 },

    /// Block bytes do not match the recorded CRC-64
    #[error("Checksum of block[{block}] is different")]
    DataIntegrity { block: u64 },

    /// Embedded parity tag of a region does not match its contents
    #[error("Parity of {kind}[{index}] is different: {source}")]
    ParityMismatch {
        kind: RegionKind,
        index: u64,
        source: ParityError,
    },

    /// Bytes read back from a written packet do not match the running CRC
    #[error("Checksum of recovery data packet[{index}] is different")]
    PacketChecksum { index: u64 },

    /// Not enough recovery blocks to cover the erasure pattern
    #[error(
        "Cannot repair: {missing} missing blocks but only {available} recovery blocks available"
    )]
    InsufficientRecoveryBlocks { missing: usize, available: usize },

    /// Sub-matrix inversion hit a zero pivot
    #[error("Recovery matrix is singular")]
    SingularMatrix,

    /// block_count + recovery_block_count exceeds the field order
    #[error("Too many blocks ({total}) for a field of order {order}")]
    TooManyBlocks { total: u64, order: u64 },

    /// Configuration does not describe a usable recovery set
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<MatrixError> for Par3Error {
    fn from(err: MatrixError) -> Self {
        match err {
            MatrixError::Singular => Par3Error::SingularMatrix,
            MatrixError::TooManyBlocks { total, order } => Par3Error::TooManyBlocks { total, order },
            MatrixError::InsufficientRecoveryBlocks { missing, available } => {
                Par3Error::InsufficientRecoveryBlocks { missing, available }
            }
        }
    }
}

impl Par3Error {
    pub(crate) fn file_io(path: impl Into<PathBuf>, op: FileOp, source: std::io::Error) -> Self {
        Par3Error::FileIo {
            path: path.into(),
            op,
            source,
        }
    }

    pub(crate) fn parity(kind: RegionKind, index: u64, source: ParityError) -> Self {
        Par3Error::ParityMismatch {
            kind,
            index,
            source,
        }
    }

    /// Process exit code for this error (par2cmdline conventions)
    pub fn exit_code(&self) -> i32 {
        match self {
            Par3Error::InvalidConfig(_) => 3,
            Par3Error::InsufficientRecoveryBlocks { .. } => 2,
            Par3Error::DataIntegrity { .. }
            | Par3Error::ParityMismatch { .. }
            | Par3Error::PacketChecksum { .. } => 5,
            Par3Error::FileIo { .. } => 6,
            Par3Error::UnsupportedField(_)
            | Par3Error::Mapping { .. }
            | Par3Error::SingularMatrix
            | Par3Error::TooManyBlocks { .. } => 7,
            Par3Error::Memory { .. } => 8,
        }
    }
}

/// Type alias for Result with Par3Error
pub type Result<T> = std::result::Result<T, Par3Error>;
