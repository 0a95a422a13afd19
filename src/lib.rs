pub mod classify;
pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sanitize;
pub mod spatial;
pub mod sync;
pub mod types;

// Ports and their adapters
pub mod app;
pub mod infra;
