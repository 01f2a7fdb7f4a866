use std::io;

use crate::packet_header::MAX_MESSAGE_LENGTH;

/// Errors surfaced by the send path.
///
/// Per-packet transmit failures inside the granted-window loop are *not*
/// reported through this type - they are counted in the metrics and recovery
/// is left to the (external) retransmission timer. This enum covers the
/// operations that have a caller to report to: message initialization and
/// control packet transmission.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message exceeds the maximum size the transport accepts.
    #[error("message of {0} bytes exceeds the maximum of {MAX_MESSAGE_LENGTH}")]
    MessageTooLong(usize),

    /// The packet pool could not provide buffers for a new message.
    #[error("no buffers available for message packets")]
    NoMemory,

    /// The packet pool could not provide a buffer for a control packet.
    #[error("no buffer available for control packet")]
    NoBuffers,

    /// The payload source failed while its bytes were being copied into
    /// packet buffers.
    #[error("payload copy failed")]
    Fault(#[source] io::Error),

    /// The transmit primitive rejected the packet; the underlying error is
    /// passed through to the caller.
    #[error("transmit failed")]
    Transmit(#[source] io::Error),
}
