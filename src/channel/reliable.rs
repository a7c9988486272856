//! Guaranteed, unordered delivery: every payload reaches the application
//! exactly once, acked on every receipt (including duplicates), retransmitted
//! via the shared [`super::sequencer`] until acked or exhausted (see §4.4).

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

pub struct ReliableChannel {
    channel_id: u8,
    out: OutgoingSequencer,
    rx_lowest: u16,
    acked: SlidingWindow<bool>,
    stats: StatsAccumulator,
}

impl ReliableChannel {
    pub fn new(channel_id: u8, window_size: usize, max_resend_attempts: u32, resend_extra_delay_ms: u64) -> Self {
        Self {
            channel_id,
            out: OutgoingSequencer::new(channel_id, window_size, max_resend_attempts, resend_extra_delay_ms),
            rx_lowest: 0,
            acked: SlidingWindow::new(window_size),
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
}

impl Channel for ReliableChannel {
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
            warn!("channel {}: malformed reliable data packet", self.channel_id);
            return (None, false);
        };

        if sequence::distance(seq, self.rx_lowest) <= 0 || *self.acked.get(seq) {
            trace!("channel {}: stale/duplicate seq {seq}, re-acking", self.channel_id);
            self.stats.record_duplicate_dropped();
            self.send_ack(connection, memory, seq);
            return (None, false);
        }

        self.stats.record_message_received();

        if seq == sequence::wrapping_next(self.rx_lowest) {
            self.rx_lowest = seq;
            self.acked.set(seq, false);
            loop {
                let next = sequence::wrapping_next(self.rx_lowest);
                if !*self.acked.get(next) {
                    break;
                }
                self.acked.set(next, false);
                self.rx_lowest = next;
            }
        } else {
            self.acked.set(seq, true);
        }

        self.send_ack(connection, memory, seq);
        (Some(app_payload.to_vec()), false)
    }

    fn handle_ack(&mut self, connection: &mut dyn Connection, memory: &mut dyn MemoryManager, clock: &dyn Clock, payload: &[u8]) {
        let Some(seq) = wire::read_ack_seq(payload) else {
            warn!("channel {}: malformed ack packet", self.channel_id);
            return;
        };
        self.out.handle_ack(connection, memory, clock.now_ms(), seq);
    }

    fn poll(&mut self, _memory: &mut dyn MemoryManager) -> Option<PooledBuffer> {
        None
    }

    fn tick(&mut self, connection: &mut dyn Connection, _memory: &mut dyn MemoryManager, clock: &dyn Clock) {
        let resent = self.out.tick(connection, clock.now_ms(), &mut self.stats);
        if !resent.is_empty() {
            trace!("channel {}: resent {} packet(s): {:?}", self.channel_id, resent.len(), resent.as_slice());
        }
    }

    fn reset(&mut self, memory: &mut dyn MemoryManager) {
        self.out.reset(memory);
        self.rx_lowest = 0;
        self.acked.release();
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

    fn ack_packet(seq: u16) -> Vec<u8> {
        seq.to_le_bytes().to_vec()
    }

    #[test]
    fn create_outgoing_is_borrowed_and_retained() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let clock = MockClock::new();
        let frame = ch.create_outgoing(&mut pool, &clock, b"hi").unwrap();
        assert!(!frame.caller_must_release());
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn incoming_in_order_sends_ack_and_delivers() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let (payload, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        assert_eq!(payload, Some(b"a".to_vec()));
        assert_eq!(conn.sent.len(), 1);
        assert_eq!(ch.stats().acks_sent, 1);
    }

    #[test]
    fn duplicate_still_triggers_ack() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        let (payload, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        assert_eq!(payload, None);
        assert_eq!(conn.sent.len(), 2);
        assert_eq!(ch.stats().duplicates_dropped, 1);
    }

    #[test]
    fn future_then_ack_resolves_contiguously_without_delaying_delivery() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let (p2, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 2, b"second"));
        assert_eq!(p2, Some(b"second".to_vec()));
        assert_eq!(ch.rx_lowest, 0);

        let (p1, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"first"));
        assert_eq!(p1, Some(b"first".to_vec()));
        assert_eq!(ch.rx_lowest, 2);
    }

    #[test]
    fn ack_releases_retained_outgoing_buffer() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let clock = MockClock::new();
        ch.create_outgoing(&mut pool, &clock, b"hi").unwrap();
        assert_eq!(pool.outstanding(), 1);

        let mut conn = RecordingConnection::new();
        ch.handle_ack(&mut conn, &mut pool, &clock, &ack_packet(1));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn tick_resends_unacked_outgoing_packet() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let clock = MockClock::new();
        ch.create_outgoing(&mut pool, &clock, b"hi").unwrap();

        let mut conn = RecordingConnection::new().with_roundtrip_ms(100);
        ch.tick(&mut conn, &mut pool, &MockClock::new());
        assert!(conn.sent.is_empty());

        let mut late_clock = MockClock::new();
        late_clock.set(200);
        ch.tick(&mut conn, &mut pool, &late_clock);
        assert_eq!(conn.sent.len(), 1);
        assert_eq!(ch.stats().resends, 1);
    }

    #[test]
    fn reset_clears_receive_and_send_state() {
        let mut ch = ReliableChannel::new(0, 64, 10, 50);
        let mut pool = BufferPool::new();
        let clock = MockClock::new();
        ch.create_outgoing(&mut pool, &clock, b"hi").unwrap();

        let mut conn = RecordingConnection::new();
        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));

        ch.reset(&mut pool);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(ch.rx_lowest, 0);
        assert_eq!(ch.stats(), ChannelStats::default());
    }
}
