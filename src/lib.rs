//! Connection diagnostics for links running through a VPN or proxy.
//!
//! The core measures latency and throughput over plain HTTP transfers and
//! classifies whether well-known destinations are reachable. Presentation
//! layers subscribe to [`progress::ProgressEvent`]s and never drive the
//! measurements themselves.

pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod measurements;
pub mod progress;
pub mod results;
pub mod scoring;
pub mod services;
pub mod stats;
pub mod transport;
pub mod tui;
