//! Shared packet framing: the `MessageType` tag and the data/ack header
//! layout used by every channel variant.
//!
//! Per §6.1 of the spec, `handle_incoming`/`handle_ack` receive payload
//! bytes with the outer `[MessageType, channel_id]` prefix already stripped
//! by the dispatcher; only the 2-byte little-endian sequence (plus, for data
//! packets, the application payload) remains. `create_outgoing`, in
//! contrast, builds the *full* 4-byte-prefixed frame, since that is what
//! actually goes out on the wire.

use byteorder::{ByteOrder, LittleEndian};

use crate::memory::{MemoryError, MemoryManager, PooledBuffer};

/// Length of the full outgoing data-packet header
/// (`MessageType`, `channel_id`, `sequence`).
pub const DATA_HEADER_LEN: usize = 4;
/// Length of the sequence-only prefix `handle_incoming` sees
/// (the dispatcher has already stripped `MessageType` and `channel_id`).
pub const DATA_SEQ_PREFIX_LEN: usize = 2;
/// Length of a full ack packet (`MessageType`, `channel_id`, `sequence`).
pub const ACK_PACKET_LEN: usize = 4;
/// Length of the sequence-only prefix `handle_ack` sees.
pub const ACK_SEQ_PREFIX_LEN: usize = 2;

/// Tag distinguishing data packets from ack packets on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Data = 0,
    Ack = 1,
}

/// Writes the full outgoing data-packet header into `buf[0..4]`.
///
/// # Panics
/// Panics if `buf` is shorter than [`DATA_HEADER_LEN`].
pub fn write_data_header(buf: &mut [u8], channel_id: u8, sequence: u16) {
    buf[0] = MessageType::Data as u8;
    buf[1] = channel_id;
    LittleEndian::write_u16(&mut buf[2..4], sequence);
}

/// Reads the sequence number from an incoming data payload (already
/// stripped of `MessageType`/`channel_id`) and returns it along with the
/// application payload slice that follows. Returns `None` if `payload` is
/// too short to contain a sequence number.
pub fn read_data_seq(payload: &[u8]) -> Option<(u16, &[u8])> {
    if payload.len() < DATA_SEQ_PREFIX_LEN {
        return None;
    }
    let seq = LittleEndian::read_u16(&payload[0..2]);
    Some((seq, &payload[DATA_SEQ_PREFIX_LEN..]))
}

/// Reads the acked sequence number from an incoming ack payload (already
/// stripped of `MessageType`/`channel_id`). Returns `None` if too short.
pub fn read_ack_seq(payload: &[u8]) -> Option<u16> {
    if payload.len() < ACK_SEQ_PREFIX_LEN {
        return None;
    }
    Some(LittleEndian::read_u16(&payload[0..2]))
}

/// Builds a full 4-byte ack packet `[Ack, channel_id, seq_lo, seq_hi]`.
pub fn build_ack_packet(
    memory: &mut dyn MemoryManager,
    channel_id: u8,
    sequence: u16,
) -> Result<PooledBuffer, MemoryError> {
    let mut buf = memory.allocate(ACK_PACKET_LEN)?;
    let bytes = buf.as_mut_slice();
    bytes[0] = MessageType::Ack as u8;
    bytes[1] = channel_id;
    LittleEndian::write_u16(&mut bytes[2..4], sequence);
    Ok(buf)
}
