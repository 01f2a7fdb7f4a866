use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::buffers::packet_buf::FrameGuard;
use crate::priority::VlanTag;

/// The transmit primitive: hands a finished frame to the layer below.
///
/// This is a trait so the I/O half can be mocked away for testing. Contract:
///  the implementation reads `frame` only for the duration of the call and
///  drops `guard` once it no longer references the frame's bytes - on error
///  paths too. A guard surviving an error return is a contract violation the
///  sender detects and logs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait XmitSocket: Send + Sync + 'static {
    /// Queue one frame for transmission to `route`. `tag` carries the
    ///  link-layer priority for backends that can honor it.
    async fn queue_xmit(
        &self,
        route: SocketAddr,
        tag: VlanTag,
        frame: &[u8],
        guard: FrameGuard,
    ) -> io::Result<()>;
}

#[async_trait]
impl XmitSocket for Arc<UdpSocket> {
    async fn queue_xmit(
        &self,
        route: SocketAddr,
        tag: VlanTag,
        frame: &[u8],
        guard: FrameGuard,
    ) -> io::Result<()> {
        trace!("UDP socket: sending {} byte frame to {:?} at pcp {}", frame.len(), route, tag.pcp());

        // send_to copies the datagram into the kernel, so the frame is free
        // again as soon as the call returns
        let result = self.send_to(frame, route).await.map(|_| ());
        drop(guard);
        result
    }
}
