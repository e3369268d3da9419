//! Line-protocol subprocess client
//!
//! This module provides [`ProcessClient`], which spawns an agent subprocess
//! and talks to it one prompt line at a time via stdin/stdout.

mod command;
mod config;
mod lifecycle;
mod reader;
mod supervisor;
mod transport;

// Re-export public types
pub use command::resolve_program;
pub use config::{
    BRIDGE_VERSION_ENV, DANGEROUS_ENV_VARS, DEFAULT_EXIT_DRAIN_GRACE, DEFAULT_MAX_STDERR_SIZE,
    DEFAULT_SHUTDOWN_GRACE, HARD_TIMEOUT_CEILING,
};
pub use supervisor::effective_timeout;
pub use transport::ProcessClient;
