//! `encbatch-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod driver;
pub mod jobs;
pub mod sequential;
pub mod telemetry;
