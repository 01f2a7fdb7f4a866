use std::cmp::min;
use std::io;
use std::sync::Arc;

use bytes::BufMut;
use tracing::debug;

use crate::buffers::buffer_pool::PacketPool;
use crate::buffers::packet_buf::{PacketBuf, PACKET_HEADROOM};
use crate::error::SendError;
use crate::packet_header::{
    CommonHeader, DataHeader, PacketType, MAX_DATA_PER_PACKET, MAX_MESSAGE_LENGTH,
};
use crate::peer::Peer;

/// Size of a pooled packet buffer: headroom for lower-layer headers plus a
///  full data frame.
pub(crate) const PACKET_BUF_SIZE: usize =
    PACKET_HEADROOM + DataHeader::SERIALIZED_LEN + MAX_DATA_PER_PACKET;

/// Supplies the payload of an outbound message, in order, in chunks of the
///  caller's choosing. This is the seam where copying from foreign memory can
///  fail; the plain in-memory case is the blanket `&[u8]` impl.
pub trait PayloadSource {
    /// Copy exactly `dst.len()` bytes into `dst`, consuming them from the
    ///  source.
    fn fill(&mut self, dst: &mut [u8]) -> io::Result<()>;
}

impl PayloadSource for &[u8] {
    fn fill(&mut self, dst: &mut [u8]) -> io::Result<()> {
        if self.len() < dst.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "payload source shorter than announced message length",
            ));
        }
        let (chunk, rest) = self.split_at(dst.len());
        dst.copy_from_slice(chunk);
        *self = rest;
        Ok(())
    }
}

/// The outbound half of one RPC's message: the packet list and the send
///  window state that the data sender, the retransmitter and incoming grants
///  mutate. All mutation happens under the owning RPC's lock.
pub struct OutboundMessage {
    /// Total payload bytes.
    length: u32,
    packets: Vec<PacketBuf>,
    /// Index of the packet covering `next_offset`; `packets.len()` once the
    ///  message is drained.
    next_index: usize,
    /// Offset of the next unsent byte. Advances in whole packets, so after
    ///  the final short packet it overshoots `length` - that is the drained
    ///  sentinel, not a bug.
    next_offset: u32,
    /// Bytes that may be sent without a grant.
    unscheduled: u32,
    /// End of the granted window (exclusive).
    granted: u32,
    /// Priority for packets beyond `unscheduled`, from the latest grant.
    sched_priority: u8,
    pool: Arc<PacketPool>,
}

impl OutboundMessage {
    /// Build the packet list for a message of `len` bytes: one buffer per
    ///  `MAX_DATA_PER_PACKET` chunk (a single empty packet for `len == 0`),
    ///  each pre-filled with its data header and payload.
    ///
    /// On any failure all buffers built so far go back to the pool and the
    ///  first error is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        mut source: impl PayloadSource,
        len: usize,
        peer: &Peer,
        dport: u16,
        sport: u16,
        id: u64,
        rtt_bytes: u32,
        pool: Arc<PacketPool>,
    ) -> Result<OutboundMessage, SendError> {
        if len > MAX_MESSAGE_LENGTH {
            return Err(SendError::MessageTooLong(len));
        }
        let length = len as u32;
        let num_packets = (len.div_ceil(MAX_DATA_PER_PACKET)).max(1);

        let release = |packets: Vec<PacketBuf>, pool: &PacketPool| {
            for packet in packets {
                pool.put(packet.into_buf());
            }
        };

        let mut packets = Vec::with_capacity(num_packets);
        for index in 0..num_packets {
            let offset = index * MAX_DATA_PER_PACKET;
            let cur_size = min(MAX_DATA_PER_PACKET, len - offset);

            let Some(mut buf) = pool.get() else {
                release(packets, &pool);
                return Err(SendError::NoMemory);
            };
            buf.put_bytes(0, PACKET_HEADROOM);
            DataHeader {
                common: CommonHeader {
                    sport,
                    dport,
                    id,
                    kind: PacketType::Data,
                },
                message_length: length,
                offset: offset as u32,
                // the unscheduled budget is announced uncapped so the
                // receiver sees the sender's actual grant-free allowance
                unscheduled: rtt_bytes,
                cutoff_version: peer.cutoff_version(),
                retransmit: false,
            }
            .ser(&mut buf);

            let payload_at = buf.len();
            buf.put_bytes(0, cur_size);
            if let Err(e) = source.fill(&mut buf.as_mut()[payload_at..]) {
                pool.put(buf);
                release(packets, &pool);
                return Err(SendError::Fault(e));
            }

            packets.push(PacketBuf::new(buf, PACKET_HEADROOM, offset as u32));
        }

        let unscheduled = min(length, rtt_bytes);
        debug!(
            "initialized outbound message: id {}, {} bytes in {} packets",
            id,
            len,
            packets.len()
        );
        Ok(OutboundMessage {
            length,
            packets,
            next_index: 0,
            next_offset: 0,
            unscheduled,
            granted: min(length, unscheduled),
            sched_priority: 0,
            pool,
        })
    }

    /// Rewind to the just-initialized state, as if nothing had been sent.
    ///  Packet buffers and payloads are preserved; used after the peer
    ///  signals lost state.
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.next_offset = 0;
        self.granted = min(self.length, self.unscheduled);
    }

    /// Apply an incoming grant: extend the window to `end` (clamped to the
    ///  message length, never shrinking) and adopt the scheduled priority.
    pub fn grant(&mut self, end: u32, priority: u8) {
        self.granted = self.granted.max(min(end, self.length));
        self.sched_priority = priority;
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    pub fn granted(&self) -> u32 {
        self.granted
    }

    pub fn unscheduled(&self) -> u32 {
        self.unscheduled
    }

    pub fn sched_priority(&self) -> u8 {
        self.sched_priority
    }

    /// Bytes not yet covered by an original transmission.
    pub fn unsent_bytes(&self) -> u32 {
        self.length.saturating_sub(self.next_offset)
    }

    /// True once every packet has been consumed by the send loop.
    pub fn is_drained(&self) -> bool {
        self.next_index >= self.packets.len()
    }

    pub fn packets(&self) -> &[PacketBuf] {
        &self.packets
    }

    pub(crate) fn packet_mut(&mut self, index: usize) -> &mut PacketBuf {
        &mut self.packets[index]
    }

    /// Consume the next packet position: returns its index and advances
    ///  `next_offset` by a full packet, deliberately overshooting `length` on
    ///  the final short packet.
    pub(crate) fn advance(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.next_offset += MAX_DATA_PER_PACKET as u32;
        index
    }

    #[cfg(test)]
    pub(crate) fn set_unscheduled(&mut self, unscheduled: u32) {
        self.unscheduled = unscheduled;
    }

    #[cfg(test)]
    pub(crate) fn set_granted(&mut self, granted: u32) {
        self.granted = granted;
    }
}

impl Drop for OutboundMessage {
    fn drop(&mut self) {
        for packet in self.packets.drain(..) {
            self.pool.put(packet.into_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_header::MAX_HEADER;
    use rstest::rstest;
    use std::net::SocketAddr;

    fn test_pool() -> Arc<PacketPool> {
        Arc::new(PacketPool::new(PACKET_BUF_SIZE, 16, usize::MAX))
    }

    fn test_peer() -> Peer {
        Peer::new(SocketAddr::from(([1, 2, 3, 4], 99)))
    }

    fn init_message(len: usize, pool: Arc<PacketPool>) -> Result<OutboundMessage, SendError> {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        OutboundMessage::init(&payload[..], len, &test_peer(), 99, 40_000, 12_345, 10_000, pool)
    }

    #[test]
    fn test_init_basics() {
        let msgout = init_message(3_000, test_pool()).unwrap();

        assert_eq!(msgout.length(), 3_000);
        assert_eq!(msgout.next_offset(), 0);
        assert_eq!(msgout.granted(), 3_000);
        assert_eq!(msgout.unscheduled(), 3_000);
        assert_eq!(msgout.sched_priority(), 0);
        assert_eq!(msgout.packets().len(), 3);

        for (index, expected_payload) in [(0usize, 1400usize), (1, 1400), (2, 200)] {
            let packet = &msgout.packets()[index];
            assert_eq!(packet.offset(), (index * 1400) as u32);
            let frame = packet.frame();
            assert_eq!(frame.len(), DataHeader::SERIALIZED_LEN + expected_payload);

            let mut b: &[u8] = frame;
            let header = DataHeader::deser(&mut b).unwrap();
            assert_eq!(header.common.sport, 40_000);
            assert_eq!(header.common.dport, 99);
            assert_eq!(header.common.id, 12_345);
            assert_eq!(header.message_length, 3_000);
            assert_eq!(header.offset, (index * 1400) as u32);
            assert_eq!(header.unscheduled, 10_000);
            assert_eq!(header.cutoff_version, 0);
            assert!(!header.retransmit);
        }
    }

    #[test]
    fn test_init_copies_payload_in_order() {
        let msgout = init_message(3_000, test_pool()).unwrap();

        let payload_of = |index: usize| {
            &msgout.packets()[index].frame()[DataHeader::SERIALIZED_LEN..]
        };
        assert_eq!(payload_of(0)[0], 0);
        assert_eq!(payload_of(0)[1399], (1399 % 256) as u8);
        assert_eq!(payload_of(1)[0], (1400 % 256) as u8);
        assert_eq!(payload_of(2)[199], ((3_000 - 1) % 256) as u8);
    }

    #[rstest]
    #[case::empty(0, 1)]
    #[case::one_byte(1, 1)]
    #[case::exactly_one_packet(1400, 1)]
    #[case::one_byte_over(1401, 2)]
    #[case::maximum(MAX_MESSAGE_LENGTH, 715)]
    fn test_packet_count(#[case] len: usize, #[case] expected_packets: usize) {
        let pool = Arc::new(PacketPool::new(PACKET_BUF_SIZE, 0, usize::MAX));
        let msgout = init_message(len, pool).unwrap();
        assert_eq!(msgout.packets().len(), expected_packets);

        let last = msgout.packets().last().unwrap();
        let expected_last_payload = if len == 0 {
            0
        } else if len % MAX_DATA_PER_PACKET == 0 {
            MAX_DATA_PER_PACKET
        } else {
            len % MAX_DATA_PER_PACKET
        };
        assert_eq!(
            last.frame().len(),
            DataHeader::SERIALIZED_LEN + expected_last_payload
        );
    }

    #[test]
    fn test_init_rejects_oversized_message() {
        let pool = test_pool();
        let result = init_message(MAX_MESSAGE_LENGTH + 1, pool.clone());
        assert!(matches!(result, Err(SendError::MessageTooLong(_))));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_init_unwinds_on_pool_exhaustion() {
        let pool = Arc::new(PacketPool::new(PACKET_BUF_SIZE, 16, 2));
        let result = init_message(3_000, pool.clone());
        assert!(matches!(result, Err(SendError::NoMemory)));
        assert_eq!(pool.outstanding(), 0);
    }

    struct FailingSource {
        bytes_until_fault: usize,
    }

    impl PayloadSource for FailingSource {
        fn fill(&mut self, dst: &mut [u8]) -> io::Result<()> {
            if dst.len() > self.bytes_until_fault {
                return Err(io::Error::new(io::ErrorKind::Other, "bad address"));
            }
            self.bytes_until_fault -= dst.len();
            dst.fill(0);
            Ok(())
        }
    }

    #[test]
    fn test_init_unwinds_on_payload_fault() {
        let pool = test_pool();
        let source = FailingSource {
            bytes_until_fault: 1400,
        };
        let result = OutboundMessage::init(
            source, 3_000, &test_peer(), 99, 40_000, 1, 10_000, pool.clone(),
        );
        assert!(matches!(result, Err(SendError::Fault(_))));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_init_stamps_current_cutoff_version() {
        let peer = test_peer();
        peer.set_cutoffs(77, [u32::MAX; 8]);
        let payload = vec![0u8; 100];
        let msgout = OutboundMessage::init(
            &payload[..], 100, &peer, 99, 40_000, 1, 10_000, test_pool(),
        )
        .unwrap();

        let mut b: &[u8] = msgout.packets()[0].frame();
        assert_eq!(DataHeader::deser(&mut b).unwrap().cutoff_version, 77);
    }

    #[test]
    fn test_advance_overshoots_on_short_final_packet() {
        let mut msgout = init_message(3_000, test_pool()).unwrap();

        assert_eq!(msgout.advance(), 0);
        assert_eq!(msgout.advance(), 1);
        assert_eq!(msgout.advance(), 2);
        assert_eq!(msgout.next_offset(), 4_200);
        assert!(msgout.is_drained());
        assert_eq!(msgout.unsent_bytes(), 0);
    }

    #[test]
    fn test_reset() {
        let mut msgout = init_message(3_000, test_pool()).unwrap();
        msgout.advance();
        msgout.advance();
        msgout.advance();
        msgout.set_granted(0);

        msgout.reset();
        assert_eq!(msgout.next_offset(), 0);
        assert_eq!(msgout.granted(), 3_000);
        assert!(!msgout.is_drained());

        // idempotent
        msgout.reset();
        assert_eq!(msgout.next_offset(), 0);
        assert_eq!(msgout.granted(), 3_000);
    }

    #[test]
    fn test_grant_extends_window_monotonically() {
        let payload = vec![0u8; 20_000];
        let mut msgout = OutboundMessage::init(
            &payload[..], 20_000, &test_peer(), 99, 40_000, 1, 10_000, test_pool(),
        )
        .unwrap();
        assert_eq!(msgout.granted(), 10_000);

        msgout.grant(15_000, 3);
        assert_eq!(msgout.granted(), 15_000);
        assert_eq!(msgout.sched_priority(), 3);

        // stale grant does not shrink the window
        msgout.grant(12_000, 2);
        assert_eq!(msgout.granted(), 15_000);

        // grants beyond the message clamp to its length
        msgout.grant(1_000_000, 2);
        assert_eq!(msgout.granted(), 20_000);
    }

    #[test]
    fn test_drop_returns_buffers_to_pool() {
        let pool = test_pool();
        let msgout = init_message(3_000, pool.clone()).unwrap();
        assert_eq!(pool.outstanding(), 3);
        drop(msgout);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_control_padding_fits_in_packet_buffer() {
        // a padded control frame must fit the pooled buffer layout
        assert!(PACKET_BUF_SIZE >= PACKET_HEADROOM + MAX_HEADER);
    }
}
