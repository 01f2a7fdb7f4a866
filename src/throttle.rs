use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use crate::rpc::OutboundRpc;

/// RPCs with granted bytes they were not allowed to send inline, ordered by
///  ascending unsent bytes - shortest remaining message first, FIFO among
///  ties.
///
/// Send paths only ever insert; the pacer is the sole remover. The pacer
///  reads the head without keeping the lock across its transmission work, so
///  insertions ahead of the current head take effect on its next round.
pub struct ThrottledList {
    rpcs: Mutex<VecDeque<Arc<OutboundRpc>>>,
    wakeup: Notify,
}

impl ThrottledList {
    pub fn new() -> ThrottledList {
        ThrottledList {
            rpcs: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
        }
    }

    /// Link `rpc` into the list at its SRPT position and wake the pacer.
    ///  Idempotent: an RPC that is already linked stays where it is.
    pub fn add(&self, rpc: &Arc<OutboundRpc>) {
        {
            let mut rpcs = self.rpcs.lock().unwrap();
            if rpc.is_throttled() {
                return;
            }
            rpc.set_throttled(true);

            let unsent = rpc.unsent_hint();
            trace!("throttling rpc {} with {} unsent bytes", rpc.id, unsent);
            match rpcs.iter().position(|candidate| candidate.unsent_hint() > unsent) {
                Some(index) => rpcs.insert(index, rpc.clone()),
                None => rpcs.push_back(rpc.clone()),
            }
        }
        self.wakeup.notify_one();
    }

    /// Unlink `rpc`. Called only by the pacer, once it has determined the
    ///  RPC is fully drained.
    pub(crate) fn remove(&self, rpc: &Arc<OutboundRpc>) {
        let mut rpcs = self.rpcs.lock().unwrap();
        if let Some(index) = rpcs.iter().position(|candidate| Arc::ptr_eq(candidate, rpc)) {
            trace!("unthrottling rpc {}", rpc.id);
            let _ = rpcs.remove(index);
            rpc.set_throttled(false);
        }
    }

    /// The RPC with the fewest unsent bytes, if any.
    pub fn head(&self) -> Option<Arc<OutboundRpc>> {
        self.rpcs.lock().unwrap().front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.rpcs.lock().unwrap().is_empty()
    }

    /// Resolves once `add` (or `wake`) has signalled since the last wait.
    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }

    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<Arc<OutboundRpc>> {
        self.rpcs.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for ThrottledList {
    fn default() -> Self {
        Self::new()
    }
}
