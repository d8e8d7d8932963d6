pub mod config;
pub mod debug_history;
pub mod device_thread;
pub mod transport;
