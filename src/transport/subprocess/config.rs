//! Configuration constants for subprocess transport

use std::time::Duration;

/// Hard ceiling on any single call's wait
///
/// Protects against agent hangs even when a caller asks for a longer timeout.
/// Overridable per registry through `BridgeConfig::timeout_ceiling`.
pub const HARD_TIMEOUT_CEILING: Duration = Duration::from_secs(5 * 60);

/// Default maximum retained stderr per subprocess (1MB)
pub const DEFAULT_MAX_STDERR_SIZE: usize = 1024 * 1024;

/// Default wait for a killed subprocess to be reaped
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default wait for trailing stdout/stderr after the subprocess exits
pub const DEFAULT_EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Dangerous environment variables that should not be passed to subprocess
///
/// These variables can affect how the subprocess loads and executes code,
/// potentially creating security vulnerabilities.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Environment variable carrying the bridge version into the subprocess
pub const BRIDGE_VERSION_ENV: &str = "KODEGEN_BRIDGE_VERSION";
