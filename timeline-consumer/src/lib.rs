pub mod config;
pub mod error;
pub mod metrics_consts;
pub mod observer;
pub mod pipeline;
pub mod probes;
