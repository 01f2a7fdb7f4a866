use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use bytes::BufMut;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::buffers::buffer_pool::PacketPool;
use crate::buffers::packet_buf::{PacketBuf, PACKET_HEADROOM};
use crate::clock::{CycleClock, LinkIdleClock, MonotonicClock};
use crate::config::{LinkTiming, TransportConfig};
use crate::control_messages::ControlMessage;
use crate::error::SendError;
use crate::message_out::{OutboundMessage, PayloadSource, PACKET_BUF_SIZE};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::packet_header::{CommonHeader, DataHeader, PacketType, MAX_HEADER};
use crate::peer::Peer;
use crate::priority::VlanTag;
use crate::rpc::{OutboundRpc, RpcRole};
use crate::send_pipeline::XmitSocket;
use crate::throttle::ThrottledList;

/// Process-wide root of the outbound transport: owns the NIC-queue model, the
///  packet pool, the throttled list and the pacer, and implements the three
///  transmission paths (control, data, retransmit).
///
/// Shared by reference between user-context send calls and the pacer task;
///  per-RPC state is protected by each RPC's own lock, everything in here is
///  atomics or internally locked.
pub struct Transport {
    pub(crate) config: TransportConfig,
    pub(crate) timing: LinkTiming,
    pub(crate) clock: Arc<dyn CycleClock>,
    pub(crate) link_idle: LinkIdleClock,
    pub(crate) pool: Arc<PacketPool>,
    pub(crate) metrics: Metrics,
    pub(crate) xmit: Arc<dyn XmitSocket>,
    pub(crate) throttled: ThrottledList,
    pub(crate) pacer_exit: AtomicBool,
    pub(crate) pacer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        xmit: Arc<dyn XmitSocket>,
    ) -> anyhow::Result<Arc<Transport>> {
        Transport::with_clock(config, xmit, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: TransportConfig,
        xmit: Arc<dyn XmitSocket>,
        clock: Arc<dyn CycleClock>,
    ) -> anyhow::Result<Arc<Transport>> {
        config.validate()?;

        let timing = LinkTiming::new(config.link_mbps, config.max_nic_queue_ns, clock.khz());
        let pool = Arc::new(PacketPool::new(
            PACKET_BUF_SIZE,
            config.pool_size,
            config.max_outstanding_buffers,
        ));
        Ok(Arc::new(Transport {
            config,
            timing,
            link_idle: LinkIdleClock::new(clock.clone()),
            clock,
            pool,
            metrics: Metrics::new(),
            xmit,
            throttled: ThrottledList::new(),
            pacer_exit: AtomicBool::new(false),
            pacer_task: Mutex::new(None),
        }))
    }

    /// Recompute the cycle-denominated link parameters after a configuration
    ///  change; takes effect on the next packet.
    pub fn set_link_params(&self, link_mbps: u64, max_nic_queue_ns: u64) {
        self.timing
            .recompute(link_mbps, max_nic_queue_ns, self.clock.khz());
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn link_idle(&self) -> &LinkIdleClock {
        &self.link_idle
    }

    /// Create the outbound side of a new RPC: fragments the payload into
    ///  packet buffers and wraps them with the RPC's addressing state.
    #[allow(clippy::too_many_arguments)]
    pub fn new_rpc(
        &self,
        payload: impl PayloadSource,
        len: usize,
        id: u64,
        role: RpcRole,
        client_port: u16,
        server_port: u16,
        dport: u16,
        peer: Arc<Peer>,
    ) -> Result<Arc<OutboundRpc>, SendError> {
        let sport = match role {
            RpcRole::Client => client_port,
            RpcRole::Server => server_port,
        };
        let msgout = OutboundMessage::init(
            payload,
            len,
            &peer,
            dport,
            sport,
            id,
            self.config.rtt_bytes,
            self.pool.clone(),
        )?;
        Ok(OutboundRpc::new(
            id,
            role,
            client_port,
            server_port,
            dport,
            peer,
            msgout,
        ))
    }

    /// Send a control packet to the peer of `rpc`, at the highest priority,
    ///  bypassing the pacer. The frame is zero-padded to [`MAX_HEADER`] bytes.
    ///
    /// Control packets do not advance the link-idle clock; they are small and
    ///  latency-critical, so the queue model ignores them.
    pub async fn xmit_control(
        &self,
        rpc: &OutboundRpc,
        msg: &ControlMessage,
    ) -> Result<(), SendError> {
        let Some(mut buf) = self.pool.get() else {
            return Err(SendError::NoBuffers);
        };
        buf.put_bytes(0, PACKET_HEADROOM);
        CommonHeader {
            sport: rpc.sport(),
            dport: rpc.dport,
            id: rpc.id,
            kind: msg.kind(),
        }
        .ser(&mut buf);
        msg.ser(&mut buf);
        let frame_len = buf.len() - PACKET_HEADROOM;
        if frame_len < MAX_HEADER {
            buf.put_bytes(0, MAX_HEADER - frame_len);
        }

        let mut packet = PacketBuf::new(buf, PACKET_HEADROOM, 0);
        packet.set_priority(VlanTag::for_priority(self.config.max_prio));
        packet.set_route(rpc.peer.dst());

        trace!("sending {:?} control packet for rpc {}", msg.kind(), rpc.id);
        let guard = packet.hold();
        let result = self
            .xmit
            .queue_xmit(rpc.peer.dst(), packet.priority(), packet.frame(), guard)
            .await;
        if let Err(e) = &result {
            self.metrics.count_control_xmit_error();
            error!("transmit primitive rejected {:?} packet for rpc {}: {}", msg.kind(), rpc.id, e);
            if packet.is_shared() {
                warn!("transmit primitive returned an error without releasing the control frame");
            }
        }
        self.metrics.count_packet_sent(msg.kind());
        self.pool.put(packet.into_buf());

        result.map_err(SendError::Transmit)
    }

    /// Transmit the packets of `rpc` that the granted window permits, in
    ///  offset order. Stops early and parks the RPC on the throttled list if
    ///  the message is above the small-message threshold while the NIC queue
    ///  is over its limit.
    ///
    /// Per-packet transmit failures are counted, not returned: `next_offset`
    ///  has already moved on, and recovery belongs to the retransmission
    ///  machinery.
    ///
    /// The caller holds the RPC's lock (`msgout` is borrowed out of it).
    pub async fn xmit_data(&self, rpc: &Arc<OutboundRpc>, msgout: &mut OutboundMessage) {
        while msgout.next_offset() < msgout.granted() && !msgout.is_drained() {
            if msgout.unsent_bytes() > self.config.throttle_min_bytes
                && self.link_idle.is_backlogged(self.timing.max_nic_queue_cycles())
                && !self.config.dont_throttle
            {
                trace!("NIC queue over limit: throttling rpc {} at offset {}", rpc.id, msgout.next_offset());
                self.throttled.add(rpc);
                return;
            }

            let index = msgout.advance();
            rpc.note_unsent(msgout.unsent_bytes());

            let offset = msgout.packets()[index].offset();
            let priority = if offset < msgout.unscheduled() {
                rpc.peer.unsched_priority(self.config.max_prio, msgout.length())
            } else {
                msgout.sched_priority()
            };

            let packet = msgout.packet_mut(index);
            if packet.is_shared() {
                // still being transmitted by a previous call; the offsets
                // have already moved past it, so just leave it alone
                trace!("skipping in-flight packet at offset {} of rpc {}", offset, rpc.id);
                continue;
            }
            packet.set_priority(VlanTag::for_priority(priority));

            // the packet may carry the flag from an earlier retransmission
            // if the message was reset since
            DataHeader::patch_retransmit(packet.transport_frame_mut(), false);

            self.xmit_packet(rpc, index, msgout).await;
        }
    }

    /// Retransmit the packets of `msgout` overlapping `[start, end)` at the
    ///  given priority. Not paced, and does not move `next_offset`: original
    ///  transmission order is unaffected.
    pub async fn resend_data(
        &self,
        rpc: &OutboundRpc,
        msgout: &mut OutboundMessage,
        start: u32,
        end: u32,
        priority: u8,
    ) {
        for index in 0..msgout.packets().len() {
            let packet = &msgout.packets()[index];
            if packet.end_offset() <= start {
                continue;
            }
            if packet.offset() >= end {
                break;
            }
            if packet.is_shared() {
                continue;
            }

            let packet = msgout.packet_mut(index);
            DataHeader::patch_retransmit(packet.transport_frame_mut(), true);
            packet.set_priority(VlanTag::for_priority(priority));

            self.xmit_packet(rpc, index, msgout).await;
            self.metrics.count_resent_packet();
        }
    }

    /// Transmission tail shared by the data and retransmit paths: refresh the
    ///  header's cutoff version, ensure the route, strip lower-layer bytes
    ///  from a previous run, submit, and account the wire time - on error
    ///  paths too, since the frame reached the NIC queue logic either way.
    async fn xmit_packet(&self, rpc: &OutboundRpc, index: usize, msgout: &mut OutboundMessage) {
        let packet = msgout.packet_mut(index);

        DataHeader::patch_cutoff_version(packet.transport_frame_mut(), rpc.peer.cutoff_version());
        if packet.route().is_none() {
            packet.set_route(rpc.peer.dst());
        }
        packet.strip_to_transport();
        let route = packet.route().unwrap_or_else(|| rpc.peer.dst());

        let guard = packet.hold();
        if let Err(e) = self
            .xmit
            .queue_xmit(route, packet.priority(), packet.frame(), guard)
            .await
        {
            self.metrics.count_data_xmit_error();
            error!("transmit primitive rejected data packet at offset {} of rpc {}: {}", packet.offset(), rpc.id, e);
            if packet.is_shared() {
                // the primitive's contract is to release the frame on error;
                // our own guard is scoped, so just flag the violation
                warn!("transmit primitive returned an error without releasing the data frame");
            }
        }

        self.link_idle
            .advance(packet.transport_frame().len(), self.timing.cycles_per_kbyte());
        self.metrics.count_packet_sent(PacketType::Data);
    }
}
