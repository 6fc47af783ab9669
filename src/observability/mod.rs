//! Logging setup.

mod tracing_init;

pub use tracing_init::*;
