//! Galois Field arithmetic for PAR3 Reed-Solomon operations
//!
//! ## Primitive polynomials
//!
//! Two field configurations are supported, chosen at runtime from the
//! recovery set's `galois_poly`:
//!
//! - **GF(2^8)**: 0x11D (x⁸ + x⁴ + x³ + x² + 1)
//! - **GF(2^16)**: 0x1100B (x¹⁶ + x¹² + x³ + x + 1)
//!
//! A [`Field`] owns the log/antilog tables and is built once per run. Bulk
//! operations go through a per-coefficient [`MulTable`]: a single 256-entry
//! table for GF(2^8), or a pair of 256-entry low/high byte tables for
//! GF(2^16) (`table.low[w & 0xFF] ^ table.high[w >> 8]`), which keeps the
//! per-coefficient table at 1KB instead of 128KB.

use thiserror::Error;

/// GF(2^8) primitive polynomial: 0x11D
pub const GF8_POLY: u32 = 0x11D;

/// GF(2^16) primitive polynomial: 0x1100B
pub const GF16_POLY: u32 = 0x1100B;

/// Errors raised while building a field
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Galois Field (0x{poly:X}) isn't supported for {bits}-bit width")]
    UnsupportedPolynomial { poly: u32, bits: u32 },
}

/// Width of a field element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldWidth {
    Gf8,
    Gf16,
}

impl FieldWidth {
    /// Number of bits in one element
    pub const fn bits(self) -> u32 {
        match self {
            FieldWidth::Gf8 => 8,
            FieldWidth::Gf16 => 16,
        }
    }

    /// Number of bytes in one element (the `gf_size` of the recovery set)
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::Gf8 => 1,
            FieldWidth::Gf16 => 2,
        }
    }

    /// Number of elements in the field
    pub const fn order(self) -> usize {
        1 << self.bits()
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(FieldWidth::Gf8),
            16 => Some(FieldWidth::Gf16),
            _ => None,
        }
    }

    /// Narrowest field for a recovery set
    ///
    /// 8-bit codes serve up to 128 input blocks as long as every recovery
    /// block still gets its own coefficient.
    pub fn for_block_count(block_count: u64, recovery_block_count: u64) -> Self {
        let total = block_count.saturating_add(recovery_block_count);
        if block_count <= 128 && total <= FieldWidth::Gf8.order() as u64 {
            FieldWidth::Gf8
        } else {
            FieldWidth::Gf16
        }
    }
}

/// Galois Field lookup tables
///
/// Immutable after construction; share it by reference.
#[derive(Clone)]
pub struct Field {
    width: FieldWidth,
    poly: u32,
    log: Box<[u16]>,
    antilog: Box<[u16]>,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("width", &self.width)
            .field("poly", &format_args!("0x{:X}", self.poly))
            .finish()
    }
}

impl Field {
    /// Build the tables for `poly` at the given bit width
    pub fn build(poly: u32, bits: u32) -> Result<Self, FieldError> {
        let width = match (poly, bits) {
            (GF8_POLY, 8) => FieldWidth::Gf8,
            (GF16_POLY, 16) => FieldWidth::Gf16,
            _ => return Err(FieldError::UnsupportedPolynomial { poly, bits }),
        };
        Ok(Self::with_width(width, poly))
    }

    /// Build the field matching a primitive polynomial (width is implied)
    pub fn from_poly(poly: u32) -> Result<Self, FieldError> {
        match poly {
            GF8_POLY => Ok(Self::with_width(FieldWidth::Gf8, poly)),
            GF16_POLY => Ok(Self::with_width(FieldWidth::Gf16, poly)),
            _ => Err(FieldError::UnsupportedPolynomial { poly, bits: 0 }),
        }
    }

    pub fn gf8() -> Self {
        Self::with_width(FieldWidth::Gf8, GF8_POLY)
    }

    pub fn gf16() -> Self {
        Self::with_width(FieldWidth::Gf16, GF16_POLY)
    }

    fn with_width(width: FieldWidth, poly: u32) -> Self {
        let count = width.order();
        let limit = count - 1;
        let mut log = vec![0u16; count].into_boxed_slice();
        let mut antilog = vec![0u16; count].into_boxed_slice();

        let mut b = 1u32;
        for l in 0..limit {
            log[b as usize] = l as u16;
            antilog[l] = b as u16;

            b <<= 1;
            if b & count as u32 != 0 {
                b ^= poly;
            }
        }

        log[0] = limit as u16;
        antilog[limit] = 0;

        Field {
            width,
            poly,
            log,
            antilog,
        }
    }

    #[inline]
    pub fn width(&self) -> FieldWidth {
        self.width
    }

    #[inline]
    pub fn poly(&self) -> u32 {
        self.poly
    }

    /// Largest element value; also the multiplicative group order
    #[inline]
    pub fn limit(&self) -> u32 {
        (self.width.order() - 1) as u32
    }

    /// Addition and subtraction are both XOR
    #[inline]
    pub fn add(&self, a: u16, b: u16) -> u16 {
        a ^ b
    }

    #[inline]
    pub fn multiply(&self, a: u16, b: u16) -> u16 {
        if a == 0 || b == 0 {
            return 0;
        }
        let limit = self.limit() as usize;
        let sum = self.log[a as usize] as usize + self.log[b as usize] as usize;
        self.antilog[sum % limit]
    }

    /// `a / b`, `None` when `b` is zero
    #[inline]
    pub fn divide(&self, a: u16, b: u16) -> Option<u16> {
        if b == 0 {
            return None;
        }
        if a == 0 {
            return Some(0);
        }
        let limit = self.limit() as usize;
        let diff = self.log[a as usize] as usize + limit - self.log[b as usize] as usize;
        Some(self.antilog[diff % limit])
    }

    /// Multiplicative inverse, `None` for zero
    #[inline]
    pub fn inverse(&self, a: u16) -> Option<u16> {
        self.divide(1, a)
    }

    pub fn pow(&self, base: u16, exponent: u32) -> u16 {
        if exponent == 0 {
            return 1;
        }
        if base == 0 {
            return 0;
        }
        let limit = self.limit() as u64;
        let l = (self.log[base as usize] as u64 * exponent as u64) % limit;
        self.antilog[l as usize]
    }

    /// Antilogarithm of `exponent` (the generator raised to that power)
    #[inline]
    pub fn exp(&self, exponent: u32) -> u16 {
        self.antilog[(exponent % self.limit()) as usize]
    }

    /// Build the lookup table for repeated multiplication by `factor`
    pub fn mul_table(&self, factor: u16) -> MulTable {
        match self.width {
            FieldWidth::Gf8 => {
                let mut table = Box::new([0u8; 256]);
                for (i, slot) in table.iter_mut().enumerate() {
                    *slot = self.multiply(i as u16, factor) as u8;
                }
                MulTable::Gf8(table)
            }
            FieldWidth::Gf16 => {
                let mut low = Box::new([0u16; 256]);
                let mut high = Box::new([0u16; 256]);
                for i in 0..256u16 {
                    low[i as usize] = self.multiply(i, factor);
                    high[i as usize] = self.multiply(i << 8, factor);
                }
                MulTable::Gf16 { low, high }
            }
        }
    }

    /// `output = factor * input` over the whole region
    pub fn region_multiply(&self, input: &[u8], output: &mut [u8], factor: u16) {
        self.mul_table(factor).process(input, output, WriteOp::Direct);
    }

    /// `output ^= factor * input` over the whole region
    pub fn region_multiply_add(&self, input: &[u8], output: &mut [u8], factor: u16) {
        match factor {
            0 => {}
            1 => xor_region(input, output),
            _ => self.mul_table(factor).process(input, output, WriteOp::Add),
        }
    }
}

/// Specifies how to combine the multiplication result with the output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// output = coefficient * input
    Direct,
    /// output = output XOR (coefficient * input)
    Add,
}

/// Multiplication table for one coefficient
pub enum MulTable {
    Gf8(Box<[u8; 256]>),
    Gf16 {
        low: Box<[u16; 256]>,  // table[input & 0xFF]
        high: Box<[u16; 256]>, // table[input >> 8]
    },
}

impl MulTable {
    /// Multiply `input` into `output` word by word (little-endian words)
    ///
    /// Processes `min(input.len(), output.len())` bytes. An odd trailing byte
    /// in GF(2^16) is treated as the low half of a word.
    pub fn process(&self, input: &[u8], output: &mut [u8], op: WriteOp) {
        let len = input.len().min(output.len());
        let (input, output) = (&input[..len], &mut output[..len]);

        match self {
            MulTable::Gf8(table) => match op {
                WriteOp::Direct => {
                    for (o, &i) in output.iter_mut().zip(input) {
                        *o = table[i as usize];
                    }
                }
                WriteOp::Add => {
                    for (o, &i) in output.iter_mut().zip(input) {
                        *o ^= table[i as usize];
                    }
                }
            },
            MulTable::Gf16 { low, high } => {
                let mut in_words = input.chunks_exact(2);
                let mut out_words = output.chunks_exact_mut(2);
                for (o, i) in (&mut out_words).zip(&mut in_words) {
                    let w = u16::from_le_bytes([i[0], i[1]]);
                    let mut r = low[(w & 0xFF) as usize] ^ high[(w >> 8) as usize];
                    if op == WriteOp::Add {
                        r ^= u16::from_le_bytes([o[0], o[1]]);
                    }
                    o.copy_from_slice(&r.to_le_bytes());
                }

                // Handle odd trailing byte
                if let (Some(&i), Some(o)) = (
                    in_words.remainder().first(),
                    out_words.into_remainder().first_mut(),
                ) {
                    let r = low[i as usize].to_le_bytes()[0];
                    *o = match op {
                        WriteOp::Direct => r,
                        WriteOp::Add => *o ^ r,
                    };
                }
            }
        }
    }
}

/// `output ^= input`, the factor-1 fast path
#[inline]
pub fn xor_region(input: &[u8], output: &mut [u8]) {
    for (o, &i) in output.iter_mut().zip(input) {
        *o ^= i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_unknown_polynomial() {
        assert!(Field::build(GF8_POLY, 8).is_ok());
        assert!(Field::build(GF16_POLY, 16).is_ok());
        assert_eq!(
            Field::build(GF8_POLY, 16).unwrap_err(),
            FieldError::UnsupportedPolynomial {
                poly: GF8_POLY,
                bits: 16
            }
        );
        assert!(Field::build(0x11B, 8).is_err());
        assert!(Field::from_poly(0x1234).is_err());
    }

    #[test]
    fn test_field_for_block_count() {
        assert_eq!(FieldWidth::for_block_count(1, 1), FieldWidth::Gf8);
        assert_eq!(FieldWidth::for_block_count(128, 128), FieldWidth::Gf8);
        assert_eq!(FieldWidth::for_block_count(129, 1), FieldWidth::Gf16);
        // too many recovery blocks for 256 coefficients
        assert_eq!(FieldWidth::for_block_count(100, 157), FieldWidth::Gf16);
    }

    #[test]
    fn test_gf8_known_products() {
        let gf = Field::gf8();
        // 0x11D field: 2 * 0x80 wraps through the polynomial
        assert_eq!(gf.multiply(2, 0x80), 0x1D);
        assert_eq!(gf.multiply(1, 0xAB), 0xAB);
        assert_eq!(gf.multiply(0, 0xAB), 0);
    }

    #[test]
    fn test_gf16_multiplication_inverse() {
        let gf = Field::gf16();
        for a in [1u16, 2, 3, 0x1234, 0xFFFF] {
            let inv = gf.inverse(a).unwrap();
            assert_eq!(gf.multiply(a, inv), 1, "Failed for a = {}", a);
        }
        assert_eq!(gf.inverse(0), None);
    }

    #[test]
    fn test_division() {
        let gf = Field::gf16();
        for a in 1..10u16 {
            for b in 1..10u16 {
                let quotient = gf.divide(a, b).unwrap();
                assert_eq!(gf.multiply(quotient, b), a);
            }
        }
        assert_eq!(gf.divide(5, 0), None);
    }

    #[test]
    fn test_power() {
        let gf = Field::gf8();
        assert_eq!(gf.pow(2, 0), 1);
        assert_eq!(gf.pow(2, 1), 2);
        assert_eq!(gf.pow(0, 5), 0);
        assert_eq!(gf.pow(3, 2), gf.multiply(3, 3));
        assert_eq!(gf.exp(1), 2);
    }

    #[test]
    fn test_region_multiply_matches_scalar() {
        for gf in [Field::gf8(), Field::gf16()] {
            let input: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
            let mut output = vec![0u8; 64];
            gf.region_multiply(&input, &mut output, 0x53);

            match gf.width() {
                FieldWidth::Gf8 => {
                    for (o, &i) in output.iter().zip(&input) {
                        assert_eq!(*o as u16, gf.multiply(i as u16, 0x53));
                    }
                }
                FieldWidth::Gf16 => {
                    for (o, i) in output.chunks_exact(2).zip(input.chunks_exact(2)) {
                        let w = u16::from_le_bytes([i[0], i[1]]);
                        assert_eq!(u16::from_le_bytes([o[0], o[1]]), gf.multiply(w, 0x53));
                    }
                }
            }
        }
    }

    #[test]
    fn test_region_multiply_add_accumulates() {
        let gf = Field::gf16();
        let input = vec![0x11u8; 32];
        let mut output = vec![0u8; 32];
        gf.region_multiply_add(&input, &mut output, 7);
        gf.region_multiply_add(&input, &mut output, 7);
        // x + x == 0 in characteristic 2
        assert!(output.iter().all(|&b| b == 0));

        gf.region_multiply_add(&input, &mut output, 1);
        assert_eq!(output, input);
    }
}
