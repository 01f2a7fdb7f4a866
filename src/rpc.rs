use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::message_out::OutboundMessage;
use crate::peer::Peer;

/// Which side of the RPC this sender is; determines the source port stamped
///  into control packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcRole {
    Client,
    Server,
}

/// The sender-visible slice of an RPC: identity, addressing, and the
///  outbound message under its lock.
///
/// The mutex is the RPC's "socket lock": user-context send calls block on it,
///  while the pacer only ever try-locks and backs off, so a user thread can
///  never be stalled by pacing.
pub struct OutboundRpc {
    pub id: u64,
    pub role: RpcRole,
    pub client_port: u16,
    pub server_port: u16,
    pub dport: u16,
    pub peer: Arc<Peer>,
    msgout: Mutex<OutboundMessage>,
    /// Linked into the throttled list? Read and written only under the
    ///  throttle lock.
    throttled: AtomicBool,
    /// Unsent-byte count mirrored out of the message so the throttled list
    ///  can order RPCs without taking their message locks.
    unsent_hint: AtomicU32,
}

impl OutboundRpc {
    pub fn new(
        id: u64,
        role: RpcRole,
        client_port: u16,
        server_port: u16,
        dport: u16,
        peer: Arc<Peer>,
        msgout: OutboundMessage,
    ) -> Arc<OutboundRpc> {
        let unsent = msgout.unsent_bytes();
        Arc::new(OutboundRpc {
            id,
            role,
            client_port,
            server_port,
            dport,
            peer,
            msgout: Mutex::new(msgout),
            throttled: AtomicBool::new(false),
            unsent_hint: AtomicU32::new(unsent),
        })
    }

    /// Source port for packets of this RPC.
    pub fn sport(&self) -> u16 {
        match self.role {
            RpcRole::Client => self.client_port,
            RpcRole::Server => self.server_port,
        }
    }

    /// The outbound message, guarded by the RPC's socket lock.
    pub fn message(&self) -> &Mutex<OutboundMessage> {
        &self.msgout
    }

    pub(crate) fn note_unsent(&self, bytes: u32) {
        self.unsent_hint.store(bytes, Ordering::Relaxed);
    }

    /// Unsent bytes as of the last send-path update; the SRPT sort key.
    pub(crate) fn unsent_hint(&self) -> u32 {
        self.unsent_hint.load(Ordering::Relaxed)
    }

    pub(crate) fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::buffer_pool::PacketPool;
    use crate::message_out::PACKET_BUF_SIZE;
    use std::net::SocketAddr;

    fn rpc(role: RpcRole) -> Arc<OutboundRpc> {
        let pool = Arc::new(PacketPool::new(PACKET_BUF_SIZE, 4, usize::MAX));
        let peer = Arc::new(Peer::new(SocketAddr::from(([1, 2, 3, 4], 99))));
        let payload = vec![0u8; 500];
        let msgout = OutboundMessage::init(
            &payload[..], 500, &peer, 99, 40_000, 7, 10_000, pool,
        )
        .unwrap();
        OutboundRpc::new(7, role, 40_000, 99, 99, peer, msgout)
    }

    #[test]
    fn test_sport_follows_role() {
        assert_eq!(rpc(RpcRole::Client).sport(), 40_000);
        assert_eq!(rpc(RpcRole::Server).sport(), 99);
    }

    #[test]
    fn test_unsent_hint_initialized_from_message() {
        assert_eq!(rpc(RpcRole::Client).unsent_hint(), 500);
    }
}
