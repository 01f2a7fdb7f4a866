use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(test)]
use mockall::automock;

/// Worst-case bytes of IP header accounted per frame on the wire.
pub const MAX_IPV4_HEADER: usize = 60;
/// Bytes of 802.1Q framing accounted per frame on the wire.
pub const VLAN_HEADER: usize = 20;
/// Ethernet preamble, CRC and inter-packet gap accounted per frame.
pub const ETH_OVERHEAD: usize = 24;

/// A monotonic tick counter, abstracted so tests can pin time.
#[cfg_attr(test, automock)]
pub trait CycleClock: Send + Sync + 'static {
    /// Current tick count. Must never decrease.
    fn now(&self) -> u64;

    /// Tick frequency in kHz, used to derive cycle-denominated limits.
    fn khz(&self) -> u64;
}

/// Default tick source: nanoseconds of process uptime, i.e. a 1 GHz tick.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleClock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn khz(&self) -> u64 {
        1_000_000
    }
}

/// Model of the NIC transmit queue: the tick instant at which the queue will
///  next be empty. When `now >= idle`, the NIC is idle; the distance between
///  the two is the modelled queue length in cycles.
///
/// Every path that physically emits a data packet advances this clock by the
///  packet's wire time; the send path and the pacer compare it against the
///  configured queue tolerance to decide between sending inline and pacing.
pub struct LinkIdleClock {
    idle_at: AtomicU64,
    clock: Arc<dyn CycleClock>,
}

impl LinkIdleClock {
    pub fn new(clock: Arc<dyn CycleClock>) -> LinkIdleClock {
        LinkIdleClock {
            idle_at: AtomicU64::new(0),
            clock,
        }
    }

    /// Current `(now, idle)` pair.
    pub fn peek(&self) -> (u64, u64) {
        (self.clock.now(), self.idle_at.load(Ordering::Relaxed))
    }

    /// True when the modelled NIC queue extends more than
    ///  `max_nic_queue_cycles` into the future.
    pub fn is_backlogged(&self, max_nic_queue_cycles: u64) -> bool {
        let (now, idle) = self.peek();
        now + max_nic_queue_cycles < idle
    }

    /// Account a frame of `transport_bytes` (transport header plus payload)
    ///  just handed to the transmit primitive. Lower-layer framing overhead is
    ///  added here.
    ///
    /// Lock-free: concurrent callers race on a compare-and-swap and retry.
    ///  Relaxed ordering is sufficient - nobody derives happens-before from
    ///  this value, and the max() in the update keeps it monotonic.
    pub fn advance(&self, transport_bytes: usize, cycles_per_kbyte: u64) {
        let wire_bytes = (transport_bytes + MAX_IPV4_HEADER + VLAN_HEADER + ETH_OVERHEAD) as u64;
        let cycles = (wire_bytes * cycles_per_kbyte) / 1000;
        loop {
            let old_idle = self.idle_at.load(Ordering::Relaxed);
            let now = self.clock.now();
            let new_idle = old_idle.max(now) + cycles;
            if self
                .idle_at
                .compare_exchange(old_idle, new_idle, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_idle_at(&self, value: u64) {
        self.idle_at.store(value, Ordering::Relaxed);
    }
}

/// Settable clock for tests; shared freely because all state is atomic.
#[cfg(test)]
pub(crate) struct TestClock {
    ticks: AtomicU64,
    khz: u64,
}

#[cfg(test)]
impl TestClock {
    pub(crate) fn at(ticks: u64) -> Arc<TestClock> {
        Arc::new(TestClock {
            ticks: AtomicU64::new(ticks),
            khz: 1_000_000,
        })
    }

    pub(crate) fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl CycleClock for TestClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn khz(&self) -> u64 {
        self.khz
    }
}
