use super::{PacketHeader, PACKET_HEADER_SIZE};
use binrw::{BinRead, BinResult, BinWrite};
use std::io::Cursor;

pub const TYPE_OF_PACKET: &[u8; 8] = b"PAR REC\0";

/// Header bytes before the recovery block payload
pub const RECOVERY_DATA_HEADER_SIZE: usize = PACKET_HEADER_SIZE + 16 + 16 + 8;

/// Header of a Recovery Data Packet; `block_size` payload bytes follow it
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RecoveryDataHeader {
    pub header: PacketHeader,
    pub root_checksum: [u8; 16],
    pub matrix_checksum: [u8; 16],
    pub index: u64,
}

impl RecoveryDataHeader {
    pub fn new(
        set_id: [u8; 8],
        root_checksum: [u8; 16],
        matrix_checksum: [u8; 16],
        index: u64,
        block_size: u64,
    ) -> Self {
        RecoveryDataHeader {
            header: PacketHeader::new(
                RECOVERY_DATA_HEADER_SIZE as u64 + block_size,
                set_id,
                *TYPE_OF_PACKET,
            ),
            root_checksum,
            matrix_checksum,
            index,
        }
    }

    /// Payload length announced by the envelope
    pub fn block_size(&self) -> u64 {
        self.header
            .length
            .saturating_sub(RECOVERY_DATA_HEADER_SIZE as u64)
    }

    pub fn is_recovery_data(&self) -> bool {
        &self.header.packet_type == TYPE_OF_PACKET
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::with_capacity(RECOVERY_DATA_HEADER_SIZE));
        self.write(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> BinResult<Self> {
        Self::read(&mut Cursor::new(bytes))
    }
}
