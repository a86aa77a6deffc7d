use super::{compute_digest, verify_digest, PacketHeader, PACKET_HEADER_SIZE};
use binrw::{BinRead, BinResult, BinWrite};
use std::io::Cursor;

pub const TYPE_OF_PACKET: &[u8; 8] = b"PAR DAT\0";

/// Header bytes before the block bytes
pub const DATA_PACKET_HEADER_SIZE: usize = PACKET_HEADER_SIZE + 8;

/// A Data Packet: one input block stored verbatim
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct DataPacket {
    pub header: PacketHeader,
    pub index: u64,
    #[br(count = header.length.saturating_sub(DATA_PACKET_HEADER_SIZE as u64))]
    pub data: Vec<u8>,
}

impl DataPacket {
    pub fn new(set_id: [u8; 8], index: u64, data: Vec<u8>) -> Self {
        DataPacket {
            header: PacketHeader::new(
                (DATA_PACKET_HEADER_SIZE + data.len()) as u64,
                set_id,
                *TYPE_OF_PACKET,
            ),
            index,
            data,
        }
    }

    /// Serialize with the digest filled in
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.header.length as usize));
        self.write(&mut buffer)?;
        let mut bytes = buffer.into_inner();
        let digest = compute_digest(&bytes);
        bytes[8..24].copy_from_slice(&digest);
        Ok(bytes)
    }

    /// Parse a packet, rejecting it when the type or digest is wrong
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if !verify_digest(bytes) {
            return None;
        }
        let packet = Self::read(&mut Cursor::new(bytes)).ok()?;
        (&packet.header.packet_type == TYPE_OF_PACKET).then_some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packet_layout() {
        let packet = DataPacket::new(*b"set-id-1", 3, b"block bytes".to_vec());
        let bytes = packet.to_bytes().unwrap();

        assert_eq!(bytes.len(), 56 + 11);
        assert_eq!(&bytes[40..48], b"PAR DAT\0");
        assert_eq!(&bytes[48..56], &3u64.to_le_bytes());
        assert_eq!(&bytes[56..], b"block bytes");

        let parsed = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.index, 3);
        assert_eq!(parsed.data, b"block bytes");
    }

    #[test]
    fn test_damaged_data_packet_rejected() {
        let mut bytes = DataPacket::new([0; 8], 0, vec![1, 2, 3]).to_bytes().unwrap();
        bytes[57] ^= 0x40;
        assert!(DataPacket::from_bytes(&bytes).is_none());
    }
}
