use std::sync::atomic::{AtomicU64, Ordering};

use crate::packet_header::{PacketType, NUM_PACKET_TYPES};

/// Counters accumulated by the send path and the pacer. All updates are
///  relaxed; readers get a point-in-time snapshot, not a consistent cut.
#[derive(Default)]
pub struct Metrics {
    /// Packets handed to the transmit primitive, indexed by packet type.
    packets_sent: [AtomicU64; NUM_PACKET_TYPES],
    /// Control packets the transmit primitive rejected.
    control_xmit_errors: AtomicU64,
    /// Data packets the transmit primitive rejected.
    data_xmit_errors: AtomicU64,
    /// Data packets emitted by the retransmit path.
    resent_packets: AtomicU64,
    /// Cycles spent in the pacer task, both parked and transmitting.
    pacer_cycles: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_sent: [u64; NUM_PACKET_TYPES],
    pub control_xmit_errors: u64,
    pub data_xmit_errors: u64,
    pub resent_packets: u64,
    pub pacer_cycles: u64,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics::default()
    }

    pub(crate) fn count_packet_sent(&self, kind: PacketType) {
        self.packets_sent[kind.metric_index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_control_xmit_error(&self) {
        self.control_xmit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_data_xmit_error(&self) {
        self.data_xmit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_resent_packet(&self) {
        self.resent_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_pacer_cycles(&self, cycles: u64) {
        self.pacer_cycles.fetch_add(cycles, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: std::array::from_fn(|i| self.packets_sent[i].load(Ordering::Relaxed)),
            control_xmit_errors: self.control_xmit_errors.load(Ordering::Relaxed),
            data_xmit_errors: self.data_xmit_errors.load(Ordering::Relaxed),
            resent_packets: self.resent_packets.load(Ordering::Relaxed),
            pacer_cycles: self.pacer_cycles.load(Ordering::Relaxed),
        }
    }
}
