//! PAR3 packet layouts used by the recovery engine
//!
//! Every packet starts with the same 48-byte envelope (little-endian):
//!
//! | bytes    | field                                    |
//! |----------|------------------------------------------|
//! | [0, 8)   | magic `PAR3\0PKT`                        |
//! | [8, 24)  | digest: BLAKE3 of bytes [24, end), first 16 bytes |
//! | [24, 32) | packet length                            |
//! | [32, 40) | recovery set id                          |
//! | [40, 48) | packet type                              |

use crate::checksum::{packet_digest, DIGEST_LEN};
use binrw::{BinRead, BinWrite};

pub mod data_packet;
pub mod recovery_data_packet;

pub use data_packet::DataPacket;
pub use recovery_data_packet::RecoveryDataHeader;

pub const MAGIC_BYTES: &[u8; 8] = b"PAR3\0PKT";

/// Size of the common envelope
pub const PACKET_HEADER_SIZE: usize = 48;

/// Offset of the first byte covered by the digest
pub const DIGEST_START: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PAR3\0PKT")]
pub struct PacketHeader {
    pub digest: [u8; DIGEST_LEN],
    pub length: u64,
    pub set_id: [u8; 8],
    pub packet_type: [u8; 8],
}

impl PacketHeader {
    /// Envelope with a zero digest, filled in once the body is known
    pub fn new(length: u64, set_id: [u8; 8], packet_type: [u8; 8]) -> Self {
        PacketHeader {
            digest: [0; DIGEST_LEN],
            length,
            set_id,
            packet_type,
        }
    }
}

/// Digest of a serialized packet, `bytes` starting at the magic
pub fn compute_digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    packet_digest(&[&bytes[DIGEST_START..]])
}

/// Check the digest stored in a serialized packet
pub fn verify_digest(bytes: &[u8]) -> bool {
    bytes.len() >= PACKET_HEADER_SIZE
        && bytes.starts_with(MAGIC_BYTES)
        && compute_digest(bytes)[..] == bytes[8..DIGEST_START]
}
