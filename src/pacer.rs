use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::sender::Transport;

/// The pacer: a dedicated task that drains the throttled list whenever the
///  NIC queue model permits, shortest remaining message first. Send paths
///  park RPCs on the list when the queue is over its limit; the pacer is the
///  only thing that takes them off again.
impl Transport {
    /// Spawn the pacer task. Must be called from within a tokio runtime.
    pub fn start_pacer(self: &Arc<Self>) {
        let mut slot = self.pacer_task.lock().unwrap();
        if slot.is_some() {
            warn!("pacer task already running");
            return;
        }
        let transport = self.clone();
        *slot = Some(tokio::spawn(async move {
            transport.pacer_main().await;
        }));
    }

    /// Shut the pacer down: raise the exit flag, wake the task if it is
    ///  parked, and wait for it to actually exit before returning.
    pub async fn stop_pacer(&self) {
        self.pacer_exit.store(true, Ordering::Release);
        self.throttled.wake();

        let task = self.pacer_task.lock().unwrap().take();
        if let Some(task) = task {
            if task.await.is_err() {
                warn!("pacer task panicked before shutdown");
            }
        }
    }

    async fn pacer_main(&self) {
        debug!("pacer running");
        let mut start = self.clock.now();
        loop {
            if self.pacer_exit.load(Ordering::Acquire) {
                break;
            }
            if self.throttled.is_empty() {
                self.metrics.add_pacer_cycles(self.clock.now() - start);
                self.throttled.notified().await;
                start = self.clock.now();
                continue;
            }

            self.pacer_xmit().await;
            let now = self.clock.now();
            self.metrics.add_pacer_cycles(now - start);
            start = now;

            // stay cooperative so user tasks can run (and release RPC locks)
            // between rounds
            tokio::task::yield_now().await;
        }
        debug!("pacer exited");
    }

    /// One pacing round: wait for the NIC queue to drop below its limit, then
    ///  transmit from the shortest throttled RPC. Backs off without progress
    ///  when a user thread owns that RPC's lock - the user's own send call
    ///  will finish the job.
    pub(crate) async fn pacer_xmit(&self) {
        while self.link_idle.is_backlogged(self.timing.max_nic_queue_cycles()) {
            if self.pacer_exit.load(Ordering::Acquire) {
                return;
            }
            tokio::task::yield_now().await;
        }

        let Some(rpc) = self.throttled.head() else {
            return;
        };
        let Ok(mut msgout) = rpc.message().try_lock() else {
            return;
        };

        self.xmit_data(&rpc, &mut msgout).await;

        if msgout.next_offset() >= msgout.granted() || msgout.is_drained() {
            self.throttled.remove(&rpc);
        }
    }
}
