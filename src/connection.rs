//! The `Connection` collaborator: raw datagram send, RTT feedback, and
//! non-graceful teardown, injected into every channel.
//!
//! This crate does not implement a real socket-backed connection (socket
//! I/O, handshake, and keepalive are out of scope — see SPEC_FULL.md §1).
//! [`RecordingConnection`] is a test double used throughout this crate's own
//! tests and demos.

use std::fmt;

/// Why a connection was torn down. Mirrors the reasons a full transport
/// would report to its application layer, though only `ResendExhausted` is
/// ever produced by this crate's own channel logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A reliable packet exceeded `Config::max_resend_attempts`.
    ResendExhausted,
    /// Requested by the local application.
    Requested,
    /// The remote peer timed out (owned by the out-of-scope heartbeat
    /// collaborator; listed here only so callers can match exhaustively).
    Timeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ResendExhausted => write!(f, "resend attempts exhausted"),
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Transport-level collaborator a channel sends raw bytes through and
/// reports RTT samples and fatal errors to.
pub trait Connection {
    /// Transmits a framed datagram (already including the channel header)
    /// to the remote peer. Fire-and-forget from the channel's perspective.
    fn send_raw(&mut self, bytes: &[u8]);

    /// Feeds an RTT sample, in milliseconds, derived from an acked packet's
    /// `now - first_sent_at`.
    fn add_roundtrip_sample(&mut self, ms: u64);

    /// The connection's current smoothed round-trip estimate, in
    /// milliseconds. Used by a reliable channel's `tick()` to compute the
    /// resend threshold.
    fn roundtrip_ms(&self) -> u64;

    /// Tears the connection down non-gracefully (e.g. resend exhaustion).
    fn disconnect(&mut self, reason: DisconnectReason);
}

/// A `Connection` test double that records every call instead of touching a
/// socket. Used by this crate's unit/integration tests and demos.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    pub sent: Vec<Vec<u8>>,
    pub rtt_samples_ms: Vec<u64>,
    pub roundtrip_ms: u64,
    pub disconnected: Option<DisconnectReason>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the RTT the connection reports to channels via `roundtrip_ms()`,
    /// simulating an external RTT estimator (out of scope for this crate).
    pub fn with_roundtrip_ms(mut self, ms: u64) -> Self {
        self.roundtrip_ms = ms;
        self
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_some()
    }

    /// Drains and returns every packet sent since the last drain, in order.
    pub fn drain_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl Connection for RecordingConnection {
    fn send_raw(&mut self, bytes: &[u8]) {
        self.sent.push(bytes.to_vec());
    }

    fn add_roundtrip_sample(&mut self, ms: u64) {
        self.rtt_samples_ms.push(ms);
    }

    fn roundtrip_ms(&self) -> u64 {
        self.roundtrip_ms
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        self.disconnected = Some(reason);
    }
}
