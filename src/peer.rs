use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use crate::priority::NUM_PRIORITIES;

/// Sender-side view of a destination host: the route packets take and the
///  peer-advertised policy for unscheduled-packet priorities.
///
/// The cutoff table maps each priority level to the largest message length
///  that may use it for unscheduled packets; the receive path updates it from
///  incoming packets, the send path reads it on every transmission. The
///  version number is stamped into outgoing data headers so the receiver can
///  detect priority decisions made against a stale table.
pub struct Peer {
    dst: SocketAddr,
    cutoff_version: AtomicU16,
    unsched_cutoffs: Mutex<[u32; NUM_PRIORITIES]>,
}

impl Peer {
    pub fn new(dst: SocketAddr) -> Peer {
        // Until the peer advertises real cutoffs, every length maps to the
        // second-highest priority; the highest stays reserved.
        let mut cutoffs = [u32::MAX; NUM_PRIORITIES];
        cutoffs[NUM_PRIORITIES - 1] = 0;
        Peer {
            dst,
            cutoff_version: AtomicU16::new(0),
            unsched_cutoffs: Mutex::new(cutoffs),
        }
    }

    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    pub fn cutoff_version(&self) -> u16 {
        self.cutoff_version.load(Ordering::Relaxed)
    }

    /// Install a peer-advertised cutoff table.
    pub fn set_cutoffs(&self, version: u16, cutoffs: [u32; NUM_PRIORITIES]) {
        *self.unsched_cutoffs.lock().unwrap() = cutoffs;
        self.cutoff_version.store(version, Ordering::Relaxed);
    }

    /// Priority for an unscheduled packet of a message of `length` bytes: the
    ///  highest priority not above `max_prio` whose cutoff admits the length.
    pub fn unsched_priority(&self, max_prio: u8, length: u32) -> u8 {
        let cutoffs = self.unsched_cutoffs.lock().unwrap();
        for priority in (0..=max_prio).rev() {
            if cutoffs[priority as usize] >= length {
                return priority;
            }
        }
        0
    }
}
