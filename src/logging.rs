//! Structured logging setup (A3).
//!
//! A thin wrapper around `tracing-subscriber` so `main` has one call to make;
//! the rest of the crate just uses `tracing::{info,warn,error,debug}!` at
//! suspension points and state transitions, the way the teacher's scheduler
//! and routing modules do.

use crate::config::{LogFormat, LoggingConfig};

pub fn init(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format {
        LogFormat::Json => {
            subscriber.json().init();
        }
        LogFormat::Pretty => {
            subscriber.init();
        }
    }
}
