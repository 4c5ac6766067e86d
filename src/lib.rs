//! relayd - multi-session messaging relay daemon.
//!
//! Runs many independent messaging client sessions side by side. Each
//! session pairs through a QR code, then accepts bulk-send jobs that are
//! delivered one recipient at a time with pacing and bounded retry.
//!
//! The binary wires these modules together; integration tests drive them
//! in-process through the loopback client backend.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod telemetry;
