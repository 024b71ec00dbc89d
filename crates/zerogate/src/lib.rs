//! # Zerogate
//!
//! A configuration-driven HTTP reverse proxy that routes requests over a
//! zero-trust overlay transport. Inbound requests are matched against
//! declaratively configured routes, balanced across backends identified by
//! overlay service names, and forwarded through per-backend overlay-aware
//! dialers.
//!
//! ## Request path
//!
//! ```text
//! listener → middleware chain → forwarder → route matcher
//!          → load balancer → dialer cache → overlay connection
//!          → upstream → response streaming
//! ```
//!
//! The middleware chain composes recovery, request logging, CORS, global
//! authentication and a request deadline in a fixed order; route-level
//! authentication runs inside the forwarder once the route is known.
//!
//! ## Core pieces
//!
//! - [`utils::route_matcher`]: two-tier route table, an exact-match map plus
//!   ordered compiled patterns with `:name` parameters and `*` wildcards
//! - [`services::load_balancer`]: per-route backend pool with round-robin,
//!   weighted-round-robin and least-connections selection, lock-free on the
//!   hot path
//! - [`services::health`]: concurrent per-backend probes with
//!   threshold-based healthy/unhealthy transitions
//! - [`services::http`]: the forwarding state machine with retries and
//!   guaranteed connection accounting
//! - [`overlay`]: the dialer cache and the overlay transport contract
//! - [`services::supervisor`]: listener ownership, status snapshots and
//!   atomic hot reload
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use zerogate::overlay::static_map::StaticOverlay;
//! use zerogate::services::supervisor::Proxy;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let proxy = Proxy::new("./config.json", Arc::new(StaticOverlay))
//!         .expect("invalid configuration");
//!     proxy.start().await
//! }
//! ```

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod overlay;
pub mod routes;
pub mod services;
pub mod utils;
