//! Logging initialization shared between binaries and tests.
pub mod tracing;
