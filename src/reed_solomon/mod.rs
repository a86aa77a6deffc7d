//! Reed-Solomon Error Correction Module
//!
//! Recovery blocks are Cauchy combinations of the input blocks:
//! `recovery[j] = Σ coefficient(i, j) · input[i]` over the configured field.
//! Reconstruction inverts the square Cauchy sub-matrix formed by the lost
//! blocks and an equal number of available recovery blocks.

pub mod cauchy;
pub mod matrix;

pub use cauchy::{check_capacity, coefficient};
pub use matrix::RecoveryMatrix;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("matrix is singular")]
    Singular,
    #[error("{total} blocks exceed field order {order}")]
    TooManyBlocks { total: u64, order: u64 },
    #[error("{missing} missing blocks but only {available} recovery blocks")]
    InsufficientRecoveryBlocks { missing: usize, available: usize },
}
