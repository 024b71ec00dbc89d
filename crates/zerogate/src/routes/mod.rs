//! HTTP endpoints served by the gateway itself.

pub mod status;
