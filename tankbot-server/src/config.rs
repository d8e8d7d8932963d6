use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tankbot_protocol::Backpressure;

use crate::debug_history::DEFAULT_HISTORY_LEN;

/// Host side of the tankbot serial link
#[derive(Parser, Debug, Clone)]
#[command(name = "tankbot-server", version)]
pub struct ServerConfig {
    /// Serial device the board is attached to
    #[arg(short, long, env = "TANKBOT_PORT", default_value = "/dev/tty.iap")]
    pub port: String,

    #[arg(short, long, env = "TANKBOT_BAUD", default_value_t = 115_200)]
    pub baud: u32,

    /// Sleep between worker loop iterations
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// How long a read waits for data before the worker moves on
    #[arg(long, default_value_t = 10)]
    pub read_timeout_ms: u64,

    /// Number of device messages kept for subscribers
    #[arg(long, default_value_t = DEFAULT_HISTORY_LEN)]
    pub history: usize,

    /// What a sender does when the outgoing buffer is full
    #[arg(long, value_enum, default_value_t = BackpressureMode::Spin)]
    pub backpressure: BackpressureMode,

    /// Retries before giving up, for `--backpressure bounded`
    #[arg(long, default_value_t = 1000)]
    pub retries: u32,

    /// Print device messages to stdout as they arrive
    #[arg(long)]
    pub echo_telemetry: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Pulse DTR to reset the board into its bootloader, then exit
    Reset,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureMode {
    Spin,
    Bounded,
    FailFast,
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn backpressure(&self) -> Backpressure {
        match self.backpressure {
            BackpressureMode::Spin => Backpressure::Spin,
            BackpressureMode::Bounded => Backpressure::Bounded(self.retries),
            BackpressureMode::FailFast => Backpressure::FailFast,
        }
    }
}
