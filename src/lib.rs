//! # relchan
//!
//! Per-channel reliability state machines for UDP transports: Unreliable,
//! Reliable (unordered), and Reliable-Sequenced (strict order) delivery,
//! built on a wrap-around-safe 16-bit sequence space.
//!
//! This crate covers the channel layer only. A connection/dispatch loop,
//! socket I/O, handshake, and fragmentation are out of scope; the
//! [`Connection`], [`MemoryManager`], and [`Clock`] traits are the seams a
//! host application implements to supply them.
//!
//! ## Quick start
//!
//! ```no_run
//! use relchan::prelude::*;
//!
//! let config = Config::default();
//! let mut channel = ReliableChannel::new(0, config.window_size(), config.max_resend_attempts(), config.resend_extra_delay_ms());
//! let mut pool = BufferPool::new();
//! let clock = SystemClock::new();
//!
//! let frame = channel.create_outgoing(&mut pool, &clock, b"hello").unwrap();
//! // frame.as_bytes() is ready to hand to the socket layer.
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod connection;
pub mod memory;
pub mod sequence;
pub mod stats;
pub mod wire;
pub mod window;

pub use channel::{Channel, ChannelError, OutgoingFrame, ReliableChannel, ReliableSequencedChannel, UnreliableChannel};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{Config, ConfigError};
pub use connection::{Connection, DisconnectReason, RecordingConnection};
pub use memory::{BufferPool, MemoryError, MemoryManager, PooledBuffer};
pub use stats::ChannelStats;
pub use window::SlidingWindow;

/// Unified error type aggregating every fallible concern in this crate.
#[derive(Debug)]
pub enum NetError {
    Channel(ChannelError),
    Memory(MemoryError),
    Config(ConfigError),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetError::Channel(e) => write!(f, "channel error: {e}"),
            NetError::Memory(e) => write!(f, "memory error: {e}"),
            NetError::Config(e) => write!(f, "config error: {e}"),
        }
    }
}

impl std::error::Error for NetError {}

impl From<ChannelError> for NetError {
    fn from(err: ChannelError) -> Self {
        NetError::Channel(err)
    }
}

impl From<MemoryError> for NetError {
    fn from(err: MemoryError) -> Self {
        NetError::Memory(err)
    }
}

impl From<ConfigError> for NetError {
    fn from(err: ConfigError) -> Self {
        NetError::Config(err)
    }
}

/// Prelude: import everything commonly needed to use a channel.
pub mod prelude {
    pub use crate::{
        BufferPool, Channel, ChannelError, ChannelStats, Clock, Config, ConfigError, Connection, DisconnectReason, MemoryError,
        MemoryManager, MockClock, NetError, OutgoingFrame, PooledBuffer, RecordingConnection, ReliableChannel,
        ReliableSequencedChannel, SystemClock, UnreliableChannel,
    };
}
