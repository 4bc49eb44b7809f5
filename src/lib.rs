//! HTTP Simulator Middleware
//!
//! Middleware that sits in front of an HTTP handler and, for requests
//! matching a configured resource, injects latency and/or replaces the
//! response. Useful for testing how clients cope with slow or failing
//! upstreams.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, path glob, header and query globs
//! - **Latency Simulation**: Uniformly sampled delays from a seeded stream
//! - **Response Replacement**: Fixed status, headers and body
//! - **Live Reconfiguration**: Swap the configuration without blocking requests
//!
//! # Example Configuration
//!
//! ```yaml
//! resources:
//!   - path: /specific
//!     methods: [DELETE]
//!     effect:
//!       replace:
//!         status-code: 404
//!         body: "Specific resource not found"
//!         headers:
//!           Content-Type: text/plain
//!   - path: /api/*
//!     headers:
//!       X-Slow: ["yes"]
//!     effect:
//!       delay:
//!         min: 100ms
//!         max: 2s
//! ```

pub mod config;
pub mod duration;
pub mod effect;
pub mod error;
pub mod glob;
pub mod matcher;
pub mod middleware;
pub mod random;
pub mod request;
pub mod response;

pub use config::Config;
pub use error::Error;
pub use middleware::{Handler, MatchOutcome, Middleware};
pub use request::RequestDescriptor;
pub use response::{ResponseRecorder, ResponseSink};
