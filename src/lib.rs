//! Outbound side of a low-latency datagram RPC transport. This crate owns
//!  everything between "the application has a request/response message" and
//!  "frames are handed to the IP layer": fragmentation into packet buffers,
//!  priority tagging, paced transmission against a model of the NIC queue,
//!  and retransmission of byte ranges on request.
//!
//! ## Design goals
//!
//! * Minimise tail latency for short messages on fast, mostly-reliable
//!   networks (i.e. inside a data center)
//!   * short messages are never queued behind long ones: transmission across
//!     competing RPCs is serialised shortest-remaining-bytes-first
//!   * short messages bypass pacing entirely - the added latency of a trip
//!     through the pacer costs more than the queue space they occupy
//! * Keep the NIC queue short without starving it
//!   * rather than tracking queue depth in hardware, the sender maintains a
//!     [`clock::LinkIdleClock`]: the future instant at which the queue will
//!     have drained, advanced on every transmission by the frame's wire time
//!   * while the projected queue exceeds a configured bound, granted data
//!     parks on the [`throttle::ThrottledList`] and a dedicated pacer task
//!     drains it as the queue empties
//! * Receiver-driven flow control
//!   * a message's first `rtt_bytes` are *unscheduled*: sent immediately,
//!     keeping the wire full for one round trip
//!   * everything beyond that waits for grants, which extend the permitted
//!     window and assign the *scheduled* priority
//! * Per-packet priorities, applied at the link layer
//!   * unscheduled packets choose their priority from cutoff tables the peer
//!     advertises (generation-stamped so stale decisions are detectable);
//!     scheduled packets use the priority of the latest grant
//!   * control packets always use the highest priority and are never paced
//! * Retransmission is cheap and policy-free
//!   * the receiver decides *when*; this side only re-emits the packets
//!     overlapping a byte range, at a caller-chosen priority, without
//!     touching the primary send position
//!
//! ## Wire format
//!
//! All integers big-endian. Every packet starts with the common header:
//!
//! ```ascii
//!  0: sport (u16)
//!  2: dport (u16)
//!  4: id (u64) - RPC identifier, unique relative to (peer, sport)
//! 12: type (u8)
//! ```
//!
//! Data packets continue with:
//!
//! ```ascii
//! 13: message_length (u32)
//! 17: offset (u32)        - of this packet's payload within the message
//! 21: unscheduled (u32)   - the sender's grant-free budget
//! 25: cutoff_version (u16)
//! 27: retransmit (u8)
//! 28: payload, up to MAX_DATA_PER_PACKET bytes
//! ```
//!
//! Control packets (grant, resend, ack) carry a small type-specific payload
//!  and are zero-padded to a fixed [`packet_header::MAX_HEADER`] bytes.
//!
//! Frames carry an 802.1Q priority tag. Note that the PCP encoding is not
//!  ordered: see [`priority`] for the mapping.
//!
//! ## Threading model
//!
//! Two kinds of actors share a [`sender::Transport`]: user tasks running send
//!  calls, and the single pacer task. Per-RPC state is guarded by the RPC's
//!  own lock, which the pacer only ever try-locks - pacing can never block a
//!  user thread. The link-idle clock is a lock-free atomic; the throttled
//!  list is a mutex-guarded ordered list with a notify-based wakeup.

pub mod buffers;
pub mod clock;
pub mod config;
pub mod control_messages;
pub mod error;
pub mod message_out;
pub mod metrics;
pub mod pacer;
pub mod packet_header;
pub mod peer;
pub mod priority;
pub mod rpc;
pub mod send_pipeline;
pub mod sender;
pub mod throttle;
