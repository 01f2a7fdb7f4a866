use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;

use crate::priority::NUM_PRIORITIES;

/// Tunable knobs for the outbound side of the transport. These correspond to
///  what an administrator would adjust at runtime; everything derived from
///  them (cycle-denominated limits) lives in [`LinkTiming`] so the hot path
///  never recomputes.
pub struct TransportConfig {
    /// Link speed the NIC-queue model assumes. Choosing this higher than the
    ///  physical link makes the pacer optimistic and re-introduces queueing in
    ///  the NIC; choosing it lower wastes bandwidth.
    pub link_mbps: u64,

    /// How far into the future the NIC queue may extend before the send path
    ///  defers to the pacer. Small values improve preemption latency for short
    ///  messages at some throughput cost.
    pub max_nic_queue_ns: u64,

    /// The number of bytes a new message may send before the first grant
    ///  arrives. Also announced to the receiver in every data header.
    pub rtt_bytes: u32,

    /// Messages with at most this many unsent bytes bypass the pacer even when
    ///  the NIC queue is over threshold, to preserve tail latency for short
    ///  messages.
    pub throttle_min_bytes: u32,

    /// Highest priority level in use, `0..NUM_PRIORITIES`. Control packets are
    ///  always sent at this level.
    pub max_prio: u8,

    /// Disables the throttle check entirely; every granted packet is sent
    ///  inline. Intended for testing and for links where pacing is handled
    ///  below the transport.
    pub dont_throttle: bool,

    /// Number of free packet buffers the pool retains; buffers returned in
    ///  excess of this are discarded.
    pub pool_size: usize,

    /// Upper bound on packet buffers alive at any time. When reached, message
    ///  initialization and control sends fail with an allocation error.
    pub max_outstanding_buffers: usize,
}

impl Default for TransportConfig {
    fn default() -> TransportConfig {
        TransportConfig {
            link_mbps: 10_000,
            max_nic_queue_ns: 2_000,
            rtt_bytes: 10_000,
            throttle_min_bytes: 200,
            max_prio: 7,
            dont_throttle: false,
            pool_size: 4096,
            max_outstanding_buffers: usize::MAX,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.link_mbps == 0 {
            bail!("link_mbps must be non-zero");
        }
        if self.max_prio as usize >= NUM_PRIORITIES {
            bail!("max_prio must be below {}", NUM_PRIORITIES);
        }
        if self.max_outstanding_buffers == 0 {
            bail!("max_outstanding_buffers must be non-zero");
        }
        Ok(())
    }
}

/// Cycle-denominated parameters derived from [`TransportConfig`] and the tick
///  frequency. Stored in atomics so the send path and the pacer read them
///  without a lock, and so a runtime reconfiguration takes effect on the next
///  packet.
pub struct LinkTiming {
    cycles_per_kbyte: AtomicU64,
    max_nic_queue_cycles: AtomicU64,
}

impl LinkTiming {
    pub fn new(link_mbps: u64, max_nic_queue_ns: u64, cpu_khz: u64) -> LinkTiming {
        let timing = LinkTiming {
            cycles_per_kbyte: AtomicU64::new(0),
            max_nic_queue_cycles: AtomicU64::new(0),
        };
        timing.recompute(link_mbps, max_nic_queue_ns, cpu_khz);
        timing
    }

    /// Recompute the derived values after a configuration change.
    ///
    /// The order of operations is chosen so the intermediate products stay
    ///  within u64 range for realistic tick frequencies and link speeds; keep
    ///  it when modifying.
    pub fn recompute(&self, link_mbps: u64, max_nic_queue_ns: u64, cpu_khz: u64) {
        self.cycles_per_kbyte
            .store((8 * cpu_khz) / link_mbps, Ordering::Relaxed);
        self.max_nic_queue_cycles
            .store((max_nic_queue_ns * cpu_khz) / 1_000_000, Ordering::Relaxed);
    }

    /// Cycles the link needs to move one kilobyte.
    pub fn cycles_per_kbyte(&self) -> u64 {
        self.cycles_per_kbyte.load(Ordering::Relaxed)
    }

    /// The NIC queue length, in cycles, beyond which sends are deferred to the
    ///  pacer.
    pub fn max_nic_queue_cycles(&self) -> u64 {
        self.max_nic_queue_cycles.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fast_link(10_000, 1_000_000, 800)]
    #[case::slow_link(1_000, 1_000_000, 8_000)]
    #[case::faster_link(40_000, 1_000_000, 200)]
    fn test_cycles_per_kbyte(#[case] link_mbps: u64, #[case] cpu_khz: u64, #[case] expected: u64) {
        let timing = LinkTiming::new(link_mbps, 0, cpu_khz);
        assert_eq!(timing.cycles_per_kbyte(), expected);
    }

    #[rstest]
    #[case::two_ghz(200, 2_000_000, 400)]
    #[case::one_mhz_ticks(2_000, 1_000_000, 2_000)]
    #[case::zero(0, 2_000_000, 0)]
    fn test_max_nic_queue_cycles(
        #[case] max_nic_queue_ns: u64,
        #[case] cpu_khz: u64,
        #[case] expected: u64,
    ) {
        let timing = LinkTiming::new(10_000, max_nic_queue_ns, cpu_khz);
        assert_eq!(timing.max_nic_queue_cycles(), expected);
    }

    #[test]
    fn test_recompute_replaces_previous_values() {
        let timing = LinkTiming::new(10_000, 200, 2_000_000);
        assert_eq!(timing.cycles_per_kbyte(), 1_600);
        assert_eq!(timing.max_nic_queue_cycles(), 400);

        timing.recompute(1_000, 2_000, 1_000_000);
        assert_eq!(timing.cycles_per_kbyte(), 8_000);
        assert_eq!(timing.max_nic_queue_cycles(), 2_000);
    }

    #[test]
    fn test_validate() {
        assert!(TransportConfig::default().validate().is_ok());

        let mut config = TransportConfig::default();
        config.link_mbps = 0;
        assert!(config.validate().is_err());

        let mut config = TransportConfig::default();
        config.max_prio = 8;
        assert!(config.validate().is_err());

        let mut config = TransportConfig::default();
        config.max_outstanding_buffers = 0;
        assert!(config.validate().is_err());
    }
}
