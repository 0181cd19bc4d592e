//! Tracing subscriber setup shared by every binary in the workspace.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
