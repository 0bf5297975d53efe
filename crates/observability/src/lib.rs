//! Tracing/logging setup shared by the binaries.

pub mod logging;

pub use logging::init;
