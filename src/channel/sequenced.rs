//! Guaranteed, strictly-ordered delivery: out-of-order payloads are held in
//! a receive-side sliding window of buffers and released one at a time via
//! `poll()` as the watermark catches up to them (see §4.5).

use log::{trace, warn};

use crate::clock::Clock;
use crate::connection::Connection;
use crate::memory::{MemoryManager, PooledBuffer};
use crate::sequence;
use crate::stats::{ChannelStats, StatsAccumulator};
use crate::wire;
use crate::window::SlidingWindow;

use super::sequencer::OutgoingSequencer;
use super::{Channel, ChannelError, OutgoingFrame};

#[derive(Debug, Clone, Default)]
struct PendingIncomingSlot {
    sequence: u16,
    buffer: Option<PooledBuffer>,
    alive: bool,
}

pub struct ReliableSequencedChannel {
    channel_id: u8,
    out: OutgoingSequencer,
    rx_lowest: u16,
    receive_window: SlidingWindow<PendingIncomingSlot>,
    stats: StatsAccumulator,
}

impl ReliableSequencedChannel {
    pub fn new(channel_id: u8, window_size: usize, max_resend_attempts: u32, resend_extra_delay_ms: u64) -> Self {
        Self {
            channel_id,
            out: OutgoingSequencer::new(channel_id, window_size, max_resend_attempts, resend_extra_delay_ms),
            rx_lowest: 0,
            receive_window: SlidingWindow::new(window_size),
            stats: StatsAccumulator::default(),
        }
    }

    fn send_ack(&mut self, connection: &mut dyn Connection, memory: &mut dyn MemoryManager, seq: u16) {
        match wire::build_ack_packet(memory, self.channel_id, seq) {
            Ok(buf) => {
                connection.send_raw(buf.as_slice());
                memory.release(buf);
                self.stats.record_ack_sent();
            }
            Err(err) => warn!("channel {}: failed to build ack for seq {seq}: {err}", self.channel_id),
        }
    }

    fn next_is_buffered(&self) -> bool {
        let next = sequence::wrapping_next(self.rx_lowest);
        let slot = self.receive_window.get(next);
        slot.sequence == next && slot.alive
    }
}

impl Channel for ReliableSequencedChannel {
    fn channel_id(&self) -> u8 {
        self.channel_id
    }

    fn create_outgoing(
        &mut self,
        memory: &mut dyn MemoryManager,
        clock: &dyn Clock,
        payload: &[u8],
    ) -> Result<OutgoingFrame<'_>, ChannelError> {
        let bytes = self.out.create_outgoing(memory, clock.now_ms(), payload)?;
        self.stats.record_message_sent();
        Ok(OutgoingFrame::Borrowed(bytes))
    }

    fn handle_incoming(
        &mut self,
        connection: &mut dyn Connection,
        memory: &mut dyn MemoryManager,
        _clock: &dyn Clock,
        payload: &[u8],
    ) -> (Option<Vec<u8>>, bool) {
        let Some((seq, app_payload)) = wire::read_data_seq(payload) else {
            warn!("channel {}: malformed sequenced data packet", self.channel_id);
            return (None, false);
        };

        let already_buffered = {
            let slot = self.receive_window.get(seq);
            slot.sequence == seq && slot.alive
        };

        if sequence::distance(seq, self.rx_lowest) <= 0 || already_buffered {
            trace!("channel {}: stale/duplicate seq {seq}, re-acking", self.channel_id);
            self.stats.record_duplicate_dropped();
            self.send_ack(connection, memory, seq);
            return (None, false);
        }

        self.stats.record_message_received();

        if seq == sequence::wrapping_next(self.rx_lowest) {
            self.rx_lowest = seq;
            self.send_ack(connection, memory, seq);
            let has_more = self.next_is_buffered();
            (Some(app_payload.to_vec()), has_more)
        } else {
            match memory.allocate(app_payload.len()) {
                Ok(mut buf) => {
                    buf.as_mut_slice().copy_from_slice(app_payload);
                    self.receive_window.set(
                        seq,
                        PendingIncomingSlot {
                            sequence: seq,
                            buffer: Some(buf),
                            alive: true,
                        },
                    );
                    self.send_ack(connection, memory, seq);
                }
                Err(err) => warn!("channel {}: failed to buffer seq {seq}: {err}", self.channel_id),
            }
            (None, false)
        }
    }

    fn handle_ack(&mut self, connection: &mut dyn Connection, memory: &mut dyn MemoryManager, clock: &dyn Clock, payload: &[u8]) {
        let Some(seq) = wire::read_ack_seq(payload) else {
            warn!("channel {}: malformed ack packet", self.channel_id);
            return;
        };
        self.out.handle_ack(connection, memory, clock.now_ms(), seq);
    }

    fn poll(&mut self, _memory: &mut dyn MemoryManager) -> Option<PooledBuffer> {
        let next = sequence::wrapping_next(self.rx_lowest);
        let (matched, buffer) = {
            let slot = self.receive_window.get_mut(next);
            if slot.sequence == next && slot.alive {
                slot.alive = false;
                (true, slot.buffer.take())
            } else {
                (false, None)
            }
        };
        if !matched {
            return None;
        }
        self.rx_lowest = next;
        buffer
    }

    fn tick(&mut self, connection: &mut dyn Connection, _memory: &mut dyn MemoryManager, clock: &dyn Clock) {
        let resent = self.out.tick(connection, clock.now_ms(), &mut self.stats);
        if !resent.is_empty() {
            trace!("channel {}: resent {} packet(s): {:?}", self.channel_id, resent.len(), resent.as_slice());
        }
    }

    fn reset(&mut self, memory: &mut dyn MemoryManager) {
        self.out.reset(memory);
        for slot in self.receive_window.slots_mut() {
            if let Some(buf) = slot.buffer.take() {
                memory.release(buf);
            }
        }
        self.receive_window.release();
        self.rx_lowest = 0;
        self.stats.reset();
    }

    fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::connection::RecordingConnection;
    use crate::memory::BufferPool;

    fn data_packet(channel_id: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; wire::DATA_HEADER_LEN + payload.len()];
        wire::write_data_header(&mut buf, channel_id, seq);
        buf[wire::DATA_HEADER_LEN..].copy_from_slice(payload);
        buf[2..].to_vec()
    }

    #[test]
    fn in_order_packet_delivers_immediately() {
        let mut ch = ReliableSequencedChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let (payload, more) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        assert_eq!(payload, Some(b"a".to_vec()));
        assert!(!more);
    }

    #[test]
    fn future_packet_is_buffered_not_delivered() {
        let mut ch = ReliableSequencedChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let (payload, more) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 2, b"second"));
        assert_eq!(payload, None);
        assert!(!more);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn poll_drains_buffered_packets_in_order() {
        let mut ch = ReliableSequencedChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 3, b"third"));
        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 2, b"second"));

        let (first, has_more) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"first"));
        assert_eq!(first, Some(b"first".to_vec()));
        assert!(has_more);

        let second = ch.poll(&mut pool).unwrap();
        assert_eq!(second.as_slice(), b"second");
        pool.release(second);
        let third = ch.poll(&mut pool).unwrap();
        assert_eq!(third.as_slice(), b"third");
        pool.release(third);
        assert!(ch.poll(&mut pool).is_none());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn stale_duplicate_still_acks_without_rebuffering() {
        let mut ch = ReliableSequencedChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        let sent_before = conn.sent.len();
        let (payload, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        assert_eq!(payload, None);
        assert_eq!(conn.sent.len(), sent_before + 1);
    }

    #[test]
    fn reset_releases_buffered_payloads() {
        let mut ch = ReliableSequencedChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 2, b"second"));
        assert_eq!(pool.outstanding(), 1);

        ch.reset(&mut pool);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(ch.rx_lowest, 0);
    }
}
