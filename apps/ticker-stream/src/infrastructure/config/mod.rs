//! Configuration Module
//!
//! Environment-driven configuration for the ticker stream service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, FeedSettings, ServerSettings, StreamConfig,
};
