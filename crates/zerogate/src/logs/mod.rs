//! Logging configuration and output formatting.

pub mod logger;
