//! Demonstrates a tuned `Config` and validates it before use.
//!
//! Run with: `cargo run --example configuration`

use relchan::{Channel, Config, ReliableSequencedChannel};

fn main() {
    // A config tuned for a fast-paced action game: a tighter window than
    // the default, and a shorter grace period before resend.
    let config = Config::default()
        .with_window_size(128)
        .with_max_resend_attempts(6)
        .with_resend_extra_delay_ms(30);

    config.validate().expect("config should be valid");

    println!("Channel configuration:");
    println!("  window_size:           {}", config.window_size());
    println!("  max_resend_attempts:   {}", config.max_resend_attempts());
    println!("  resend_extra_delay_ms: {}", config.resend_extra_delay_ms());

    let channel = ReliableSequencedChannel::new(0, config.window_size(), config.max_resend_attempts(), config.resend_extra_delay_ms());
    println!("  built channel id:      {}", channel.channel_id());
}
