use bytes::{Buf, BufMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

use crate::packet_header::PacketType;

/// Extends the receiver's permission for the sender to transmit up to
///  `offset` (exclusive), using `priority` for the scheduled packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantMessage {
    pub offset: u32,
    pub priority: u8,
}

impl GrantMessage {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.offset);
        buf.put_u8(self.priority);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<GrantMessage> {
        Ok(GrantMessage {
            offset: buf.try_get_u32()?,
            priority: buf.try_get_u8()?,
        })
    }
}

/// Requests retransmission of `length` bytes starting at `offset`, to be sent
///  at `priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendMessage {
    pub offset: u32,
    pub length: u32,
    pub priority: u8,
}

impl ResendMessage {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.offset);
        buf.put_u32(self.length);
        buf.put_u8(self.priority);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ResendMessage> {
        Ok(ResendMessage {
            offset: buf.try_get_u32()?,
            length: buf.try_get_u32()?,
            priority: buf.try_get_u8()?,
        })
    }
}

/// Acknowledges completion of an RPC. Carries no payload beyond the common
///  header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckMessage;

/// A control packet payload together with its packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Grant(GrantMessage),
    Resend(ResendMessage),
    Ack(AckMessage),
}

impl ControlMessage {
    pub fn kind(&self) -> PacketType {
        match self {
            ControlMessage::Grant(_) => PacketType::Grant,
            ControlMessage::Resend(_) => PacketType::Resend,
            ControlMessage::Ack(_) => PacketType::Ack,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self {
            ControlMessage::Grant(msg) => msg.ser(buf),
            ControlMessage::Resend(msg) => msg.ser(buf),
            ControlMessage::Ack(AckMessage) => {}
        }
    }
}
