use std::net::SocketAddr;
use std::sync::Arc;

use crate::buffers::fixed_buffer::FixedBuf;
use crate::packet_header::MAX_DATA_PER_PACKET;
use crate::priority::VlanTag;

/// Space reserved in front of the transport header for link and IP headers
///  prepended by the transmit primitive.
pub const PACKET_HEADROOM: usize = 128;

/// Witness that a frame is in flight through the transmit primitive.
///
/// The primitive receives one guard per submission and drops it when it is
///  done with the frame; while any guard is alive the packet counts as shared
///  and the send paths will neither re-tag nor re-submit it.
#[derive(Debug)]
pub struct FrameGuard(#[allow(dead_code)] Arc<()>);

/// A fully built packet: a pooled buffer holding `[headroom | transport
///  header | payload]`, plus the transmit metadata that is rewritten between
///  (re)transmissions.
///
/// `frame_start` tracks the first byte the transmit primitive will read. A
///  primitive that prepends lower-layer headers moves it into the headroom;
///  the next transmission strips back to the transport header.
pub struct PacketBuf {
    buf: FixedBuf,
    frame_start: usize,
    transport_at: usize,
    offset: u32,
    route: Option<SocketAddr>,
    tag: VlanTag,
    inflight: Arc<()>,
}

impl PacketBuf {
    /// Wrap a filled buffer. `transport_at` is the offset of the transport
    ///  header within `buf`; `offset` is the packet's byte offset within its
    ///  message (zero for control packets).
    pub fn new(buf: FixedBuf, transport_at: usize, offset: u32) -> PacketBuf {
        assert!(transport_at <= buf.len());
        PacketBuf {
            buf,
            frame_start: transport_at,
            transport_at,
            offset,
            route: None,
            tag: VlanTag::default(),
            inflight: Arc::new(()),
        }
    }

    /// Byte offset of this packet's payload within its message.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Offset just past the message range this packet covers (a full packet's
    ///  worth, even for the short final packet).
    pub fn end_offset(&self) -> u32 {
        self.offset + MAX_DATA_PER_PACKET as u32
    }

    /// The bytes the transmit primitive will put on the wire.
    pub fn frame(&self) -> &[u8] {
        &self.buf.as_ref()[self.frame_start..]
    }

    /// The frame starting at the transport header, regardless of any
    ///  lower-layer bytes currently in front of it.
    pub fn transport_frame(&self) -> &[u8] {
        &self.buf.as_ref()[self.transport_at..]
    }

    pub fn transport_frame_mut(&mut self) -> &mut [u8] {
        let transport_at = self.transport_at;
        &mut self.buf.as_mut()[transport_at..]
    }

    /// Extend the frame into the headroom, as a transmit primitive does when
    ///  it prepends lower-layer headers.
    pub fn prepend(&mut self, bytes: usize) {
        assert!(bytes <= self.frame_start);
        self.frame_start -= bytes;
    }

    /// Drop any bytes in front of the transport header, left over from a
    ///  previous transmit run.
    pub fn strip_to_transport(&mut self) {
        self.frame_start = self.transport_at;
    }

    /// True when some other holder (an in-flight transmission, typically)
    ///  still references this packet.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inflight) > 1
    }

    /// Take a guard that marks this packet as shared until dropped.
    pub fn hold(&self) -> FrameGuard {
        FrameGuard(self.inflight.clone())
    }

    pub fn set_priority(&mut self, tag: VlanTag) {
        self.tag = tag;
    }

    pub fn priority(&self) -> VlanTag {
        self.tag
    }

    pub fn set_route(&mut self, route: SocketAddr) {
        self.route = Some(route);
    }

    pub fn route(&self) -> Option<SocketAddr> {
        self.route
    }

    /// Unwrap the backing buffer, e.g. to return it to the pool.
    pub fn into_buf(self) -> FixedBuf {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn packet_with_frame(frame: &[u8]) -> PacketBuf {
        let mut buf = FixedBuf::new(PACKET_HEADROOM + 100);
        buf.put_bytes(0, PACKET_HEADROOM);
        buf.put_slice(frame);
        PacketBuf::new(buf, PACKET_HEADROOM, 0)
    }

    #[test]
    fn test_frame_windows() {
        let packet = packet_with_frame(b"abcdef");
        assert_eq!(packet.frame(), b"abcdef");
        assert_eq!(packet.transport_frame(), b"abcdef");
    }

    #[test]
    fn test_prepend_and_strip() {
        let mut packet = packet_with_frame(b"abcdef");

        packet.prepend(10);
        assert_eq!(packet.frame().len(), 16);
        assert_eq!(packet.transport_frame(), b"abcdef");

        packet.strip_to_transport();
        assert_eq!(packet.frame(), b"abcdef");
    }

    #[test]
    fn test_shared_tracks_guards() {
        let packet = packet_with_frame(b"x");
        assert!(!packet.is_shared());

        let guard = packet.hold();
        assert!(packet.is_shared());
        let second = packet.hold();
        drop(guard);
        assert!(packet.is_shared());
        drop(second);
        assert!(!packet.is_shared());
    }

    #[test]
    fn test_route_and_priority() {
        let mut packet = packet_with_frame(b"x");
        assert_eq!(packet.route(), None);

        let route = SocketAddr::from(([10, 0, 0, 1], 4000));
        packet.set_route(route);
        assert_eq!(packet.route(), Some(route));

        packet.set_priority(VlanTag::for_priority(6));
        assert_eq!(packet.priority().pcp(), 6);
    }
}
