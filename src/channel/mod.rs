//! The three channel delivery-mode state machines: [`unreliable`],
//! [`reliable`], and [`sequenced`] (reliable-sequenced), plus the
//! [`sequencer`] module they share for outgoing/ack/resend bookkeeping.

mod sequencer;

pub mod reliable;
pub mod sequenced;
pub mod unreliable;

pub use reliable::ReliableChannel;
pub use sequenced::ReliableSequencedChannel;
pub use sequencer::OutgoingFrame;
pub use unreliable::UnreliableChannel;

use std::fmt;

use crate::clock::Clock;
use crate::connection::Connection;
use crate::memory::{MemoryError, MemoryManager, PooledBuffer};
use crate::stats::ChannelStats;

/// Errors a channel can report while processing incoming data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The payload was too short to contain the header this channel expects.
    Malformed,
    /// The injected [`MemoryManager`] failed to satisfy an allocation.
    Memory(MemoryError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Malformed => write!(f, "malformed channel packet"),
            ChannelError::Memory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<MemoryError> for ChannelError {
    fn from(err: MemoryError) -> Self {
        ChannelError::Memory(err)
    }
}

/// Common interface implemented by all three channel variants, exposed to
/// the (out-of-scope) dispatch loop.
///
/// Collaborators (`Connection`, `MemoryManager`, `Clock`) are passed as
/// trait objects to each call rather than stored on the channel, since in
/// practice many channels share one connection, one pool, and one clock.
pub trait Channel {
    /// The channel's id, as framed into every packet it sends.
    fn channel_id(&self) -> u8;

    /// Frames `payload` for transmission and assigns it a sequence number.
    /// Reliable variants retain the buffer for retransmission and return a
    /// borrowed view (`caller_must_release() == false`); the unreliable
    /// variant hands back full ownership (`caller_must_release() == true`).
    fn create_outgoing(
        &mut self,
        memory: &mut dyn MemoryManager,
        clock: &dyn Clock,
        payload: &[u8],
    ) -> Result<OutgoingFrame<'_>, ChannelError>;

    /// Processes an incoming data packet (payload already stripped of the
    /// `MessageType`/`channel_id` prefix). Returns the application payload,
    /// if any is ready for immediate delivery, and whether the dispatcher
    /// should call `poll()` again (only ever `true` for the sequenced
    /// variant).
    fn handle_incoming(
        &mut self,
        connection: &mut dyn Connection,
        memory: &mut dyn MemoryManager,
        clock: &dyn Clock,
        payload: &[u8],
    ) -> (Option<Vec<u8>>, bool);

    /// Processes an incoming ack packet (payload already stripped of the
    /// `MessageType`/`channel_id` prefix).
    fn handle_ack(&mut self, connection: &mut dyn Connection, memory: &mut dyn MemoryManager, clock: &dyn Clock, payload: &[u8]);

    /// Drains the next in-order payload held by the out-of-order buffer,
    /// transferring ownership of the buffer to the caller. Only the
    /// reliable-sequenced variant ever returns `Some`.
    fn poll(&mut self, memory: &mut dyn MemoryManager) -> Option<PooledBuffer>;

    /// Drives retransmission of unacked outgoing packets.
    fn tick(&mut self, connection: &mut dyn Connection, memory: &mut dyn MemoryManager, clock: &dyn Clock);

    /// Releases all retained buffers and resets sequence state to zero.
    fn reset(&mut self, memory: &mut dyn MemoryManager);

    /// A snapshot of this channel's observability counters.
    fn stats(&self) -> ChannelStats;
}
