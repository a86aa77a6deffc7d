//! Cauchy matrix coefficients
//!
//! Input block `i` is assigned `x_i = i` and recovery block `j` is assigned
//! `y_j = (2^w - 1) - j`. The two ranges are disjoint as long as
//! `block_count + recovery_count <= 2^w`, so `x_i ^ y_j` is never zero and
//! every square sub-matrix of `1 / (x_i ^ y_j)` is invertible.

use super::MatrixError;
use crate::galois::Field;

/// Fail when the blocks do not fit in the field
pub fn check_capacity(field: &Field, block_count: u64, recovery_count: u64) -> Result<(), MatrixError> {
    let order = field.width().order() as u64;
    let total = block_count + recovery_count;
    if total > order {
        return Err(MatrixError::TooManyBlocks { total, order });
    }
    Ok(())
}

/// Factor of input block `input` in recovery block `recovery`
///
/// Returns zero when the pair falls outside the field (see [`check_capacity`]).
#[inline]
pub fn coefficient(field: &Field, input: u64, recovery: u64) -> u16 {
    let limit = field.limit() as u64;
    if input > limit || recovery > limit {
        return 0;
    }
    let x = input as u16;
    let y = (limit - recovery) as u16;
    field.inverse(x ^ y).unwrap_or(0)
}
