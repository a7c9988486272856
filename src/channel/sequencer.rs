//! Outgoing-packet bookkeeping shared by the reliable and reliable-sequenced
//! channels: sequence assignment, buffer retention, ack processing, and the
//! resend loop driven by `tick()`.
//!
//! Factored out per the design note that the three channel variants share
//! substantial framing/ack/resend code; only the incoming-side policy
//! differs per variant (see `channel::unreliable`, `channel::reliable`,
//! `channel::sequenced`).

use smallvec::SmallVec;

use crate::connection::{Connection, DisconnectReason};
use crate::memory::{MemoryManager, PooledBuffer};
use crate::sequence;
use crate::stats::StatsAccumulator;
use crate::wire;
use crate::window::SlidingWindow;

use super::ChannelError;

/// Sequences resent by a single `tick()` call. Most ticks resend zero or
/// one packet; inline storage avoids a heap allocation for the common case.
pub(crate) type ResentSequences = SmallVec<[u16; 8]>;

/// A framed outgoing buffer, returned from `create_outgoing`. Distinguishes
/// buffers the channel retains ownership of (the caller only gets a
/// read-only view for the immediate send) from buffers whose ownership
/// transfers to the caller outright.
///
/// This is "option (a)" from the design notes: the channel owns the buffer
/// and exposes a borrowed view, rather than reference-counting it.
pub enum OutgoingFrame<'a> {
    /// Ownership transfers to the caller; the caller must release it via
    /// `MemoryManager::release` after transmission.
    Owned(PooledBuffer),
    /// The channel retains ownership; this is a read-only view for the
    /// immediate send. The caller must not (and, being a borrow, cannot)
    /// release it.
    Borrowed(&'a [u8]),
}

impl<'a> OutgoingFrame<'a> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutgoingFrame::Owned(buf) => buf.as_slice(),
            OutgoingFrame::Borrowed(slice) => slice,
        }
    }

    /// `true` if the caller must release this buffer itself.
    pub fn caller_must_release(&self) -> bool {
        matches!(self, OutgoingFrame::Owned(_))
    }
}

#[derive(Debug, Clone, Default)]
struct PendingOutgoingSlot {
    sequence: u16,
    buffer: Option<PooledBuffer>,
    first_sent_at_ms: u64,
    last_sent_at_ms: u64,
    attempts: u32,
    alive: bool,
}

/// Shared outgoing-side state for a reliable channel: sequence assignment,
/// retained buffers awaiting ack, and the resend loop.
pub(crate) struct OutgoingSequencer {
    channel_id: u8,
    max_resend_attempts: u32,
    resend_extra_delay_ms: u64,
    tx_last: u16,
    tx_lowest_unacked: u16,
    has_sent: bool,
    send_window: SlidingWindow<PendingOutgoingSlot>,
}

impl OutgoingSequencer {
    pub fn new(channel_id: u8, window_size: usize, max_resend_attempts: u32, resend_extra_delay_ms: u64) -> Self {
        Self {
            channel_id,
            max_resend_attempts,
            resend_extra_delay_ms,
            tx_last: 0,
            tx_lowest_unacked: 0,
            has_sent: false,
            send_window: SlidingWindow::new(window_size),
        }
    }

    /// Assigns the next sequence, frames `payload`, and retains the buffer
    /// in the send window. Returns a borrowed view of the retained buffer
    /// for the caller's immediate transmission.
    pub fn create_outgoing(
        &mut self,
        memory: &mut dyn MemoryManager,
        now_ms: u64,
        payload: &[u8],
    ) -> Result<&[u8], ChannelError> {
        self.tx_last = sequence::wrapping_next(self.tx_last);
        if !self.has_sent {
            self.tx_lowest_unacked = self.tx_last;
            self.has_sent = true;
        }
        let seq = self.tx_last;

        let mut buf = memory
            .allocate(wire::DATA_HEADER_LEN + payload.len())
            .map_err(ChannelError::Memory)?;
        wire::write_data_header(buf.as_mut_slice(), self.channel_id, seq);
        buf.as_mut_slice()[wire::DATA_HEADER_LEN..].copy_from_slice(payload);

        self.send_window.set(
            seq,
            PendingOutgoingSlot {
                sequence: seq,
                buffer: Some(buf),
                first_sent_at_ms: now_ms,
                last_sent_at_ms: now_ms,
                attempts: 1,
                alive: true,
            },
        );

        Ok(self
            .send_window
            .get(seq)
            .buffer
            .as_ref()
            .expect("just inserted")
            .as_slice())
    }

    /// Processes an ack for `seq`: if the slot is alive, emits an RTT
    /// sample, frees the buffer, and advances `tx_lowest_unacked` across any
    /// now-contiguous dead slots starting from the floor.
    pub fn handle_ack(
        &mut self,
        connection: &mut dyn Connection,
        memory: &mut dyn MemoryManager,
        now_ms: u64,
        seq: u16,
    ) {
        let matched = {
            let slot = self.send_window.get_mut(seq);
            slot.sequence == seq && slot.alive
        };
        if !matched {
            return;
        }

        let (first_sent_at_ms, buffer) = {
            let slot = self.send_window.get_mut(seq);
            slot.alive = false;
            (slot.first_sent_at_ms, slot.buffer.take())
        };

        connection.add_roundtrip_sample(now_ms.saturating_sub(first_sent_at_ms));
        if let Some(buf) = buffer {
            memory.release(buf);
        }

        if seq == self.tx_lowest_unacked {
            while sequence::distance(self.tx_lowest_unacked, self.tx_last) < 0 {
                let candidate = sequence::wrapping_next(self.tx_lowest_unacked);
                let slot = self.send_window.get(candidate);
                if slot.sequence == candidate && slot.alive {
                    break;
                }
                self.tx_lowest_unacked = candidate;
            }
        }
    }

    /// Walks the in-flight range `[tx_lowest_unacked, tx_last]` (outgoing
    /// watermarks only — never the receive side), resending timed-out
    /// packets and disconnecting on resend exhaustion.
    pub fn tick(
        &mut self,
        connection: &mut dyn Connection,
        now_ms: u64,
        stats: &mut StatsAccumulator,
    ) -> ResentSequences {
        let mut resent = ResentSequences::new();
        if !self.has_sent {
            return resent;
        }
        let threshold_ms = connection.roundtrip_ms() + self.resend_extra_delay_ms;

        let mut seq = self.tx_lowest_unacked;
        loop {
            let action = {
                let slot = self.send_window.get_mut(seq);
                if slot.sequence == seq && slot.alive {
                    if slot.attempts > self.max_resend_attempts {
                        Some(SlotAction::Exhausted)
                    } else if now_ms.saturating_sub(slot.last_sent_at_ms) > threshold_ms {
                        slot.attempts += 1;
                        slot.last_sent_at_ms = now_ms;
                        Some(SlotAction::Resend)
                    } else {
                        None
                    }
                } else {
                    None
                }
            };

            match action {
                Some(SlotAction::Exhausted) => {
                    stats.record_disconnect_triggered();
                    connection.disconnect(DisconnectReason::ResendExhausted);
                    return resent;
                }
                Some(SlotAction::Resend) => {
                    let slot = self.send_window.get(seq);
                    if let Some(buf) = &slot.buffer {
                        connection.send_raw(buf.as_slice());
                    }
                    stats.record_resend();
                    resent.push(seq);
                }
                None => {}
            }

            if seq == self.tx_last {
                break;
            }
            seq = sequence::wrapping_next(seq);
        }
        resent
    }

    /// Releases every retained outgoing buffer and resets sequence state.
    pub fn reset(&mut self, memory: &mut dyn MemoryManager) {
        for slot in self.send_window.slots_mut() {
            if let Some(buf) = slot.buffer.take() {
                memory.release(buf);
            }
        }
        self.send_window.release();
        self.tx_last = 0;
        self.tx_lowest_unacked = 0;
        self.has_sent = false;
    }
}

enum SlotAction {
    Resend,
    Exhausted,
}
