use anyhow::bail;
use bytes::{Buf, BufMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

/// Payload bytes per data packet. The last packet of a message may be short.
pub const MAX_DATA_PER_PACKET: usize = 1400;

/// Longest message the transport accepts.
pub const MAX_MESSAGE_LENGTH: usize = 1_000_000;

/// Control packets are zero-padded to this length so all control frames have
///  a uniform, minimum-sized wire footprint.
pub const MAX_HEADER: usize = 48;

/// Number of packet types, for per-type metrics.
pub const NUM_PACKET_TYPES: usize = 4;

/// Wire discriminants for packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// A fragment of message payload.
    Data = 20,
    /// Receiver extends the sender's granted window.
    Grant = 21,
    /// Receiver requests retransmission of a byte range.
    Resend = 22,
    /// Receiver acknowledges completion.
    Ack = 23,
}

impl PacketType {
    pub fn from_wire(value: u8) -> anyhow::Result<PacketType> {
        match value {
            20 => Ok(PacketType::Data),
            21 => Ok(PacketType::Grant),
            22 => Ok(PacketType::Resend),
            23 => Ok(PacketType::Ack),
            _ => bail!("unknown packet type {}", value),
        }
    }

    /// Index into per-type metric arrays.
    pub fn metric_index(&self) -> usize {
        (*self as u8 - PacketType::Data as u8) as usize
    }
}

/// Header fields common to all packet types. All integers big-endian on the
///  wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonHeader {
    pub sport: u16,
    pub dport: u16,
    pub id: u64,
    pub kind: PacketType,
}

impl CommonHeader {
    pub const SERIALIZED_LEN: usize = 13;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.sport);
        buf.put_u16(self.dport);
        buf.put_u64(self.id);
        buf.put_u8(self.kind as u8);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<CommonHeader> {
        Ok(CommonHeader {
            sport: buf.try_get_u16()?,
            dport: buf.try_get_u16()?,
            id: buf.try_get_u64()?,
            kind: PacketType::from_wire(buf.try_get_u8()?)?,
        })
    }
}

/// Header of a data packet: the common header followed by the message
///  geometry and scheduling fields.
///
/// `cutoff_version` and `retransmit` are rewritten in place on serialized
///  frames between transmissions (see the patch functions), so their offsets
///  within the serialized form are part of this type's contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
    pub common: CommonHeader,
    /// Total length of the message this packet belongs to.
    pub message_length: u32,
    /// Offset of this packet's payload within the message.
    pub offset: u32,
    /// The sender's unscheduled budget, announced so the receiver knows from
    ///  which offset on it must issue grants.
    pub unscheduled: u32,
    /// Generation of the peer's priority cutoff table this packet was sent
    ///  under.
    pub cutoff_version: u16,
    pub retransmit: bool,
}

const CUTOFF_VERSION_AT: usize = CommonHeader::SERIALIZED_LEN + 12;
const RETRANSMIT_AT: usize = CommonHeader::SERIALIZED_LEN + 14;

impl DataHeader {
    pub const SERIALIZED_LEN: usize = CommonHeader::SERIALIZED_LEN + 15;

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.common.ser(buf);
        buf.put_u32(self.message_length);
        buf.put_u32(self.offset);
        buf.put_u32(self.unscheduled);
        buf.put_u16(self.cutoff_version);
        buf.put_u8(self.retransmit as u8);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DataHeader> {
        let common = CommonHeader::deser(buf)?;
        if common.kind != PacketType::Data {
            bail!("not a data packet: {:?}", common.kind);
        }
        Ok(DataHeader {
            common,
            message_length: buf.try_get_u32()?,
            offset: buf.try_get_u32()?,
            unscheduled: buf.try_get_u32()?,
            cutoff_version: buf.try_get_u16()?,
            retransmit: buf.try_get_u8()? != 0,
        })
    }

    /// Rewrite the cutoff version in a serialized data frame.
    pub fn patch_cutoff_version(frame: &mut [u8], version: u16) {
        frame[CUTOFF_VERSION_AT..CUTOFF_VERSION_AT + 2].copy_from_slice(&version.to_be_bytes());
    }

    /// Rewrite the retransmit flag in a serialized data frame.
    pub fn patch_retransmit(frame: &mut [u8], retransmit: bool) {
        frame[RETRANSMIT_AT] = retransmit as u8;
    }
}
