mod client;

pub use client::config::{Config, ConfigBuilder};
pub use client::{Client, RealtimeClient, ServerRx, connect};
pub use duet_realtime_types as types;
