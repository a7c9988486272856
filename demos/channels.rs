//! Demonstrates all three delivery modes by creating a channel pair and
//! transferring a few messages through each one.
//!
//! Run with: `cargo run --example channels`

use relchan::prelude::*;
use relchan::{Channel, SystemClock};

fn run_pair(mut sender: Box<dyn Channel>, mut receiver: Box<dyn Channel>, name: &str) {
    let mut pool = BufferPool::new();
    let clock = SystemClock::new();
    let mut sender_conn = RecordingConnection::new();
    let mut receiver_conn = RecordingConnection::new();

    let mut received = Vec::new();

    for i in 0u8..3 {
        let msg = format!("{name} message {i}");
        let frame = sender.create_outgoing(&mut pool, &clock, msg.as_bytes()).unwrap();
        let wire = frame.as_bytes().to_vec();
        if let OutgoingFrame::Owned(buf) = frame {
            pool.release(buf);
        }

        // strip MessageType + channel_id the way a dispatcher would.
        let (delivered, _has_more) = receiver.handle_incoming(&mut receiver_conn, &mut pool, &clock, &wire[2..]);
        if let Some(payload) = delivered {
            received.push(String::from_utf8_lossy(&payload).to_string());
        }
    }

    // Feed any acks back to the sender.
    for ack in receiver_conn.drain_sent() {
        sender.handle_ack(&mut sender_conn, &mut pool, &clock, &ack[2..]);
    }

    // The sequenced channel withholds out-of-order payloads from
    // handle_incoming; poll() drains whatever the watermark has caught up to.
    while let Some(buf) = receiver.poll(&mut pool) {
        received.push(String::from_utf8_lossy(buf.as_slice()).to_string());
        pool.release(buf);
    }
    println!("{name:<20} delivered: {}", received.join(", "));

    sender.reset(&mut pool);
    receiver.reset(&mut pool);
}

fn main() {
    env_logger::init();

    let config = Config::default();
    run_pair(
        Box::new(UnreliableChannel::new(0, config.window_size())),
        Box::new(UnreliableChannel::new(0, config.window_size())),
        "Unreliable",
    );
    run_pair(
        Box::new(ReliableChannel::new(1, config.window_size(), config.max_resend_attempts(), config.resend_extra_delay_ms())),
        Box::new(ReliableChannel::new(1, config.window_size(), config.max_resend_attempts(), config.resend_extra_delay_ms())),
        "Reliable",
    );
    run_pair(
        Box::new(ReliableSequencedChannel::new(
            2,
            config.window_size(),
            config.max_resend_attempts(),
            config.resend_extra_delay_ms(),
        )),
        Box::new(ReliableSequencedChannel::new(
            2,
            config.window_size(),
            config.max_resend_attempts(),
            config.resend_extra_delay_ms(),
        )),
        "ReliableSequenced",
    );
}
