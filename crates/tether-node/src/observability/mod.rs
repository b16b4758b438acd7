//! # Observability Module
//!
//! Structured logging for the node. Every lifecycle point of the hub and its
//! connections is logged with `tracing` fields (`client_id`, `reason`, ...);
//! this module only decides where those events go.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tether_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//! ```

mod logging;

pub use logging::{init_logging, LogFormat, UnknownLogFormat};
