//! Region buffers and the embedded parity tag
//!
//! Every block or recovery buffer handled by the engine is a *region*: the
//! block bytes followed by at least four bytes of padding, rounded up to a
//! multiple of four. A tag computed over the region contents is stored in the
//! padding so that a damaged buffer is noticed before it is written out.
//!
//! For the Galois codecs the tag is a Horner sum over field words,
//! `tag = Σ w_k · x^(n-1-k)`, stored as one field word right after the data.
//! Because the tag is linear in the region contents, multiplying a region by a
//! coefficient or XOR-accumulating regions of the same length keeps the tag
//! valid, so recovery and reconstructed regions can be checked the same way
//! as input regions.

use crate::error::{Par3Error, Result};
use crate::galois::{FieldWidth, GF16_POLY, GF8_POLY};
use thiserror::Error;

/// Bytes of padding guaranteed after the data in every region
pub const REGION_PADDING: usize = 4;

/// Size of the region that holds `len` bytes of data
#[inline]
pub const fn region_size(len: usize) -> usize {
    (len + REGION_PADDING + 3) & !3
}

/// Parity check failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParityError {
    #[error("tag mismatch (expected {expected:#x}, found {found:#x})")]
    TagMismatch { expected: u32, found: u32 },
    #[error("padding byte at offset {offset} is not zero")]
    PaddingNotZero { offset: usize },
    #[error("region of {region} bytes cannot hold {logical} bytes and a tag")]
    RegionTooSmall { region: usize, logical: usize },
}

/// Tag algorithm, selected from the recovery set's `gf_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionCodec {
    Gf8,
    Gf16,
    /// XOR of 32-bit words, independent of any field
    Plain,
}

impl RegionCodec {
    pub fn for_gf_size(gf_size: u8) -> Self {
        match gf_size {
            1 => RegionCodec::Gf8,
            2 => RegionCodec::Gf16,
            _ => RegionCodec::Plain,
        }
    }

    pub fn for_width(width: FieldWidth) -> Self {
        match width {
            FieldWidth::Gf8 => RegionCodec::Gf8,
            FieldWidth::Gf16 => RegionCodec::Gf16,
        }
    }

    /// Size in bytes of one tag word
    #[inline]
    pub const fn word_size(self) -> usize {
        match self {
            RegionCodec::Gf8 => 1,
            RegionCodec::Gf16 => 2,
            RegionCodec::Plain => 4,
        }
    }

    #[inline]
    fn tag_pos(self, logical_len: usize) -> usize {
        let word = self.word_size();
        logical_len.div_ceil(word) * word
    }

    fn compute_tag(self, data: &[u8]) -> u32 {
        match self {
            RegionCodec::Gf8 => data.iter().fold(0u32, |tag, &w| mul_x(tag, GF8_POLY, 8) ^ w as u32),
            RegionCodec::Gf16 => data.chunks_exact(2).fold(0u32, |tag, w| {
                mul_x(tag, GF16_POLY, 16) ^ u16::from_le_bytes([w[0], w[1]]) as u32
            }),
            RegionCodec::Plain => data.chunks_exact(4).fold(0u32, |tag, w| {
                tag ^ u32::from_le_bytes([w[0], w[1], w[2], w[3]])
            }),
        }
    }

    fn read_tag(self, bytes: &[u8]) -> u32 {
        match self {
            RegionCodec::Gf8 => bytes[0] as u32,
            RegionCodec::Gf16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            RegionCodec::Plain => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    fn write_tag(self, bytes: &mut [u8], tag: u32) {
        let word = self.word_size();
        bytes[..word].copy_from_slice(&tag.to_le_bytes()[..word]);
    }

    fn check_fits(self, region: &[u8], logical_len: usize) -> std::result::Result<usize, ParityError> {
        let tag_pos = self.tag_pos(logical_len);
        if tag_pos + self.word_size() > region.len() {
            return Err(ParityError::RegionTooSmall {
                region: region.len(),
                logical: logical_len,
            });
        }
        Ok(tag_pos)
    }

    /// Zero the padding of `region` and store the tag of its first
    /// `logical_len` bytes
    pub fn create_parity(
        self,
        region: &mut [u8],
        logical_len: usize,
    ) -> std::result::Result<(), ParityError> {
        let tag_pos = self.check_fits(region, logical_len)?;
        region[logical_len..].fill(0);
        let tag = self.compute_tag(&region[..tag_pos]);
        self.write_tag(&mut region[tag_pos..], tag);
        Ok(())
    }

    /// Verify the tag and that the padding after it is zero
    ///
    /// Bytes between `logical_len` and the tag belong to the last data word
    /// and are covered by the tag itself.
    pub fn check_parity(self, region: &[u8], logical_len: usize) -> std::result::Result<(), ParityError> {
        let tag_pos = self.check_fits(region, logical_len)?;
        let tail = tag_pos + self.word_size();

        if let Some(i) = region[tail..].iter().position(|&b| b != 0) {
            return Err(ParityError::PaddingNotZero { offset: tail + i });
        }

        let expected = self.compute_tag(&region[..tag_pos]);
        let found = self.read_tag(&region[tag_pos..]);
        if expected != found {
            return Err(ParityError::TagMismatch { expected, found });
        }
        Ok(())
    }
}

/// Multiply a field element by x, reducing by `poly`
#[inline]
fn mul_x(value: u32, poly: u32, bits: u32) -> u32 {
    let shifted = value << 1;
    if shifted & (1 << bits) != 0 {
        shifted ^ poly
    } else {
        shifted
    }
}

/// Allocate a zeroed buffer, reporting failure instead of aborting
pub fn alloc_zeroed(bytes: usize) -> Result<Vec<u8>> {
    let mut buf = alloc_capacity(bytes)?;
    buf.resize(bytes, 0);
    Ok(buf)
}

/// Empty buffer with room for `bytes`
pub fn alloc_capacity(bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| Par3Error::Memory { bytes })?;
    Ok(buf)
}

/// A run of equally sized regions in one allocation
pub struct RegionTable {
    data: Vec<u8>,
    region_size: usize,
    count: usize,
}

impl RegionTable {
    pub fn new(count: usize, region_size: usize) -> Result<Self> {
        let bytes = count
            .checked_mul(region_size)
            .ok_or(Par3Error::Memory { bytes: usize::MAX })?;
        Ok(RegionTable {
            data: alloc_zeroed(bytes)?,
            region_size,
            count,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    #[inline]
    pub fn get(&self, index: usize) -> &[u8] {
        let start = index * self.region_size;
        &self.data[start..start + self.region_size]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.region_size;
        &mut self.data[start..start + self.region_size]
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn iter(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.region_size)
    }

    pub fn iter_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        self.data.chunks_exact_mut(self.region_size)
    }
}
