//! Observability: structured logging and per-connection log channels

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogChannel, LogFormat};

// Span macros for structured logging
pub use logging::{loop_span, mqtt_span};
