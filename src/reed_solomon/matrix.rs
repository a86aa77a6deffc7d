//! Reconstruction matrix
//!
//! With `L` the lost blocks and `J` the first `|L|` available recovery
//! blocks, each recovery block satisfies
//!
//! ```text
//! R_j ^ Σ_{i ∉ L} c(i, j) · D_i = Σ_{l ∈ L} c(l, j) · D_l
//! ```
//!
//! so `D_L = A⁻¹ · (R_J ^ Σ c(i, J) · D_i)` where `A[r][k] = c(L_k, J_r)`.
//! [`RecoveryMatrix`] folds `A⁻¹` into one factor per (lost block, input
//! block) and one per (lost block, recovery block).

use super::cauchy::{check_capacity, coefficient};
use super::MatrixError;
use crate::galois::Field;

#[derive(Debug, Clone)]
pub struct RecoveryMatrix {
    block_count: u64,
    lost: Vec<u64>,
    recovery: Vec<u64>,
    /// lost.len() × block_count, zero in lost columns
    input_factors: Vec<u16>,
    /// lost.len() × lost.len()
    recovery_factors: Vec<u16>,
}

impl RecoveryMatrix {
    /// Solve for `lost` using the first `lost.len()` entries of `recovery`
    pub fn compute(
        field: &Field,
        block_count: u64,
        lost: &[u64],
        recovery: &[u64],
    ) -> Result<Self, MatrixError> {
        let m = lost.len();
        if recovery.len() < m {
            return Err(MatrixError::InsufficientRecoveryBlocks {
                missing: m,
                available: recovery.len(),
            });
        }
        let recovery = &recovery[..m];
        let highest = recovery.iter().copied().max().map_or(0, |r| r + 1);
        check_capacity(field, block_count, highest)?;

        // A[r][k] = c(lost[k], recovery[r])
        let mut a = vec![0u16; m * m];
        for (r, &j) in recovery.iter().enumerate() {
            for (k, &l) in lost.iter().enumerate() {
                a[r * m + k] = coefficient(field, l, j);
            }
        }
        let inverse = invert(field, &mut a, m)?;

        let mut is_lost = vec![false; block_count as usize];
        for &l in lost {
            if let Some(flag) = is_lost.get_mut(l as usize) {
                *flag = true;
            }
        }

        let bc = block_count as usize;
        let mut input_factors = vec![0u16; m * bc];
        for k in 0..m {
            for i in (0..bc).filter(|&i| !is_lost[i]) {
                input_factors[k * bc + i] = recovery.iter().enumerate().fold(0u16, |acc, (r, &j)| {
                    acc ^ field.multiply(inverse[k * m + r], coefficient(field, i as u64, j))
                });
            }
        }

        Ok(RecoveryMatrix {
            block_count,
            lost: lost.to_vec(),
            recovery: recovery.to_vec(),
            input_factors,
            recovery_factors: inverse,
        })
    }

    pub fn lost(&self) -> &[u64] {
        &self.lost
    }

    /// Recovery block indices the solution uses
    pub fn recovery(&self) -> &[u64] {
        &self.recovery
    }

    /// Factor of input `block` in lost block number `lost_pos`
    #[inline]
    pub fn input_factor(&self, lost_pos: usize, block: u64) -> u16 {
        self.input_factors[lost_pos * self.block_count as usize + block as usize]
    }

    /// Factor of used recovery block number `recovery_pos` in lost block `lost_pos`
    #[inline]
    pub fn recovery_factor(&self, lost_pos: usize, recovery_pos: usize) -> u16 {
        self.recovery_factors[lost_pos * self.lost.len() + recovery_pos]
    }
}

/// Gauss-Jordan inversion of the `n × n` row-major matrix in `a`
///
/// `a` is reduced to the identity; the inverse is returned.
pub fn invert(field: &Field, a: &mut [u16], n: usize) -> Result<Vec<u16>, MatrixError> {
    let mut inv = vec![0u16; n * n];
    for i in 0..n {
        inv[i * n + i] = 1;
    }

    for col in 0..n {
        let pivot = (col..n)
            .find(|&row| a[row * n + col] != 0)
            .ok_or(MatrixError::Singular)?;
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
                inv.swap(pivot * n + k, col * n + k);
            }
        }

        let scale = field.inverse(a[col * n + col]).ok_or(MatrixError::Singular)?;
        for k in 0..n {
            a[col * n + k] = field.multiply(a[col * n + k], scale);
            inv[col * n + k] = field.multiply(inv[col * n + k], scale);
        }

        for row in (0..n).filter(|&row| row != col) {
            let factor = a[row * n + col];
            if factor == 0 {
                continue;
            }
            for k in 0..n {
                a[row * n + k] ^= field.multiply(factor, a[col * n + k]);
                inv[row * n + k] ^= field.multiply(factor, inv[col * n + k]);
            }
        }
    }

    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiply_matrices(field: &Field, a: &[u16], b: &[u16], n: usize) -> Vec<u16> {
        let mut out = vec![0u16; n * n];
        for r in 0..n {
            for c in 0..n {
                out[r * n + c] = (0..n).fold(0, |acc, k| acc ^ field.multiply(a[r * n + k], b[k * n + c]));
            }
        }
        out
    }

    #[test]
    fn test_invert_identity_product() {
        let gf = Field::gf16();
        let n = 4;
        let original: Vec<u16> = (0..n * n)
            .map(|i| coefficient(&gf, (i / n) as u64, (i % n) as u64))
            .collect();
        let mut work = original.clone();
        let inverse = invert(&gf, &mut work, n).unwrap();
        let product = multiply_matrices(&gf, &original, &inverse, n);
        for r in 0..n {
            for c in 0..n {
                assert_eq!(product[r * n + c], (r == c) as u16);
            }
        }
    }

    #[test]
    fn test_singular_matrix_detected() {
        let gf = Field::gf8();
        let mut a = vec![1, 2, 1, 2];
        assert_eq!(invert(&gf, &mut a, 2), Err(MatrixError::Singular));
    }

    #[test]
    fn test_insufficient_recovery_blocks() {
        let gf = Field::gf8();
        assert_eq!(
            RecoveryMatrix::compute(&gf, 10, &[1, 2, 3], &[0, 1]).unwrap_err(),
            MatrixError::InsufficientRecoveryBlocks {
                missing: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_reconstructs_scalar_symbols() {
        // one byte per block is enough to check the algebra
        let gf = Field::gf8();
        let data: Vec<u16> = vec![10, 20, 30, 40, 50, 60];
        let recovery: Vec<u16> = (0..4u64)
            .map(|j| {
                data.iter().enumerate().fold(0, |acc, (i, &d)| {
                    acc ^ gf.multiply(coefficient(&gf, i as u64, j), d)
                })
            })
            .collect();

        let lost = [1u64, 4];
        let available_recovery = [1u64, 3];
        let matrix = RecoveryMatrix::compute(&gf, 6, &lost, &available_recovery).unwrap();

        for (k, &l) in lost.iter().enumerate() {
            let mut value = 0u16;
            for (i, &d) in data.iter().enumerate() {
                value ^= gf.multiply(matrix.input_factor(k, i as u64), d);
            }
            for (r, &j) in matrix.recovery().iter().enumerate() {
                value ^= gf.multiply(matrix.recovery_factor(k, r), recovery[j as usize]);
            }
            assert_eq!(value, data[l as usize]);
        }
        assert_eq!(matrix.input_factor(0, 1), 0);
    }
}
