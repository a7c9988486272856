//! Best-effort delivery: no acks, no retransmission, duplicate suppression
//! only (see §4.3).

use log::{trace, warn};

use crate::clock::Clock;
use crate::connection::Connection;
use crate::memory::{MemoryManager, PooledBuffer};
use crate::sequence;
use crate::stats::{ChannelStats, StatsAccumulator};
use crate::wire;
use crate::window::SlidingWindow;

use super::{Channel, ChannelError, OutgoingFrame};

/// Fire-and-forget channel. Sends immediately, never retains a buffer, and
/// tracks only enough receive-side state to drop duplicates.
pub struct UnreliableChannel {
    channel_id: u8,
    tx_last: u16,
    rx_lowest: u16,
    acked: SlidingWindow<bool>,
    stats: StatsAccumulator,
}

impl UnreliableChannel {
    pub fn new(channel_id: u8, window_size: usize) -> Self {
        Self {
            channel_id,
            tx_last: 0,
            rx_lowest: 0,
            acked: SlidingWindow::new(window_size),
            stats: StatsAccumulator::default(),
        }
    }
}

impl Channel for UnreliableChannel {
    fn channel_id(&self) -> u8 {
        self.channel_id
    }

    fn create_outgoing(
        &mut self,
        memory: &mut dyn MemoryManager,
        _clock: &dyn Clock,
        payload: &[u8],
    ) -> Result<OutgoingFrame<'_>, ChannelError> {
        self.tx_last = sequence::wrapping_next(self.tx_last);
        let mut buf = memory
            .allocate(wire::DATA_HEADER_LEN + payload.len())
            .map_err(ChannelError::Memory)?;
        wire::write_data_header(buf.as_mut_slice(), self.channel_id, self.tx_last);
        buf.as_mut_slice()[wire::DATA_HEADER_LEN..].copy_from_slice(payload);
        self.stats.record_message_sent();
        Ok(OutgoingFrame::Owned(buf))
    }

    fn handle_incoming(
        &mut self,
        _connection: &mut dyn Connection,
        _memory: &mut dyn MemoryManager,
        _clock: &dyn Clock,
        payload: &[u8],
    ) -> (Option<Vec<u8>>, bool) {
        let Some((seq, app_payload)) = wire::read_data_seq(payload) else {
            warn!("channel {}: malformed unreliable data packet", self.channel_id);
            return (None, false);
        };

        if sequence::distance(seq, self.rx_lowest) <= 0 || *self.acked.get(seq) {
            trace!("channel {}: dropping stale/duplicate seq {seq}", self.channel_id);
            self.stats.record_duplicate_dropped();
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
            (Some(app_payload.to_vec()), false)
        } else {
            self.acked.set(seq, true);
            (Some(app_payload.to_vec()), false)
        }
    }

    fn handle_ack(&mut self, _connection: &mut dyn Connection, _memory: &mut dyn MemoryManager, _clock: &dyn Clock, _payload: &[u8]) {}

    fn poll(&mut self, _memory: &mut dyn MemoryManager) -> Option<PooledBuffer> {
        None
    }

    fn tick(&mut self, _connection: &mut dyn Connection, _memory: &mut dyn MemoryManager, _clock: &dyn Clock) {}

    fn reset(&mut self, _memory: &mut dyn MemoryManager) {
        self.tx_last = 0;
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
        // handle_incoming sees the packet with channel-id/message-type already
        // stripped, leaving just the 2-byte sequence prefix.
        buf[2..].to_vec()
    }

    #[test]
    fn create_outgoing_hands_ownership_to_caller() {
        let mut ch = UnreliableChannel::new(0, 16);
        let mut pool = BufferPool::new();
        let clock = MockClock::new();
        let frame = ch.create_outgoing(&mut pool, &clock, b"hi").unwrap();
        assert!(frame.caller_must_release());
        assert_eq!(u16::from_le_bytes([frame.as_bytes()[2], frame.as_bytes()[3]]), 1);
    }

    #[test]
    fn in_order_delivery_advances_watermark() {
        let mut ch = UnreliableChannel::new(0, 16);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let pkt = data_packet(0, 1, b"a");
        let (payload, more) = ch.handle_incoming(&mut conn, &mut pool, &clock, &pkt);
        assert_eq!(payload, Some(b"a".to_vec()));
        assert!(!more);
        assert_eq!(ch.rx_lowest, 1);
    }

    #[test]
    fn future_sequence_is_delivered_immediately() {
        let mut ch = UnreliableChannel::new(0, 16);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let pkt = data_packet(0, 5, b"skip-ahead");
        let (payload, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &pkt);
        assert_eq!(payload, Some(b"skip-ahead".to_vec()));
        // future arrival does not move the contiguous watermark
        assert_eq!(ch.rx_lowest, 0);
    }

    #[test]
    fn stale_duplicate_is_dropped() {
        let mut ch = UnreliableChannel::new(0, 16);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"a"));
        ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 2, b"b"));
        let (payload, _) = ch.handle_incoming(&mut conn, &mut pool, &clock, &data_packet(0, 1, b"dup"));
        assert_eq!(payload, None);
        assert_eq!(ch.stats().duplicates_dropped, 1);
    }

    #[test]
    fn malformed_short_payload_is_rejected_without_panic() {
        let mut ch = UnreliableChannel::new(0, 16);
        let mut pool = BufferPool::new();
        let mut conn = RecordingConnection::new();
        let clock = MockClock::new();

        let (payload, more) = ch.handle_incoming(&mut conn, &mut pool, &clock, &[0u8]);
        assert_eq!(payload, None);
        assert!(!more);
    }
}
