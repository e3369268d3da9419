//! Transport layer for communicating with agent subprocesses
//!
//! The only transport is [`subprocess`]: a long-lived child process speaking
//! newline-delimited JSON on stdin/stdout.

pub mod subprocess;

pub use subprocess::{ProcessClient, effective_timeout};
