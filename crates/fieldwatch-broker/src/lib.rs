//! fieldwatch broker library.
//!
//! Runs the nng forwarder between relay publishers and subscribers, and the
//! `watch`/`publish` diagnostics used to inspect a running broker.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::{format_delivery, publish_once, run_broker, run_watch, shutdown_on_ctrl_c};
pub use config::{Args, BrokerConfig, Command, PublishConfig, WatchConfig};
pub use error::Error;
