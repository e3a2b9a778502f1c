// ABOUTME: ssh connection multiplexing over per-host ControlMaster processes
//
// Key components:
// - config: MuxerConfig (socket directory, cache bound, handshake limit)
// - master: one ControlMaster process with startup handshake, liveness, teardown
// - muxer: concurrent per-host cache of masters handing out session specs
// - metrics: counters for master churn

pub mod config;
pub mod master;
pub mod metrics;
pub mod muxer;

// Re-exports for convenient access
pub use config::MuxerConfig;
pub use master::{HandshakeOptions, MasterConnection};
pub use metrics::{MetricsSnapshot, MuxMetrics};
pub use muxer::Muxer;
