//! Bridge configuration and call requests
//!
//! This module contains the bridge-wide configuration (with a builder and an
//! environment loader) and the request type accepted by
//! [`ClientRegistry::call`](crate::ClientRegistry::call).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::transport::subprocess::{
    DEFAULT_EXIT_DRAIN_GRACE, DEFAULT_MAX_STDERR_SIZE, DEFAULT_SHUTDOWN_GRACE,
    HARD_TIMEOUT_CEILING,
};

use super::prompt_input::PromptPayload;

/// Environment variable overriding [`BridgeConfig::timeout_ceiling`]
pub const ENV_TIMEOUT_CEILING_MS: &str = "KODEGEN_BRIDGE_TIMEOUT_CEILING_MS";
/// Environment variable overriding [`BridgeConfig::default_timeout`]
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "KODEGEN_BRIDGE_DEFAULT_TIMEOUT_MS";
/// Environment variable overriding [`BridgeConfig::max_stderr_size`]
pub const ENV_MAX_STDERR_BYTES: &str = "KODEGEN_BRIDGE_MAX_STDERR_BYTES";
/// Environment variable overriding [`BridgeConfig::shutdown_grace`]
pub const ENV_SHUTDOWN_GRACE_MS: &str = "KODEGEN_BRIDGE_SHUTDOWN_GRACE_MS";

/// Per-line observer, called with every stdout line of the in-flight call
pub type LineObserver = Arc<dyn Fn(&str) + Send + Sync>;

// ============================================================================
// Bridge Configuration
// ============================================================================

/// Bridge-wide configuration shared by every client a registry creates
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on any call's wait, whatever the caller requested
    pub timeout_ceiling: Duration,
    /// Timeout used when a request does not name one
    pub default_timeout: Duration,
    /// Maximum retained stderr bytes per subprocess (the tail is kept)
    pub max_stderr_size: usize,
    /// How long to wait for a killed subprocess to be reaped
    pub shutdown_grace: Duration,
    /// How long to wait for trailing output after the subprocess exits
    pub exit_drain_grace: Duration,
    /// Extra environment variables for spawned subprocesses
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ceiling: HARD_TIMEOUT_CEILING,
            default_timeout: HARD_TIMEOUT_CEILING,
            max_stderr_size: DEFAULT_MAX_STDERR_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            exit_drain_grace: DEFAULT_EXIT_DRAIN_GRACE,
            env: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Create a new builder for `BridgeConfig`
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Load configuration from the process environment
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable is set but unparseable or zero
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable is set but unparseable or zero
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_u64(&lookup, ENV_TIMEOUT_CEILING_MS)? {
            config.timeout_ceiling = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_DEFAULT_TIMEOUT_MS)? {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_u64(&lookup, ENV_MAX_STDERR_BYTES)? {
            config.max_stderr_size = usize::try_from(bytes).map_err(|_| {
                BridgeError::invalid_config(format!("{ENV_MAX_STDERR_BYTES} is too large"))
            })?;
        }
        if let Some(ms) = parse_u64(&lookup, ENV_SHUTDOWN_GRACE_MS)? {
            config.shutdown_grace = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that all durations and limits are usable
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ceiling.is_zero() {
            return Err(BridgeError::invalid_config("timeout_ceiling must be non-zero"));
        }
        if self.default_timeout.is_zero() {
            return Err(BridgeError::invalid_config("default_timeout must be non-zero"));
        }
        if self.max_stderr_size == 0 {
            return Err(BridgeError::invalid_config("max_stderr_size must be non-zero"));
        }
        Ok(())
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|e| BridgeError::invalid_config(format!("{key}={raw:?}: {e}")))
}

// ============================================================================
// Builder for BridgeConfig
// ============================================================================

/// Builder for `BridgeConfig`
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Set the hard timeout ceiling
    #[must_use]
    pub fn timeout_ceiling(mut self, ceiling: Duration) -> Self {
        self.config.timeout_ceiling = ceiling;
        self
    }

    /// Set the default per-call timeout
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the maximum retained stderr size
    #[must_use]
    pub fn max_stderr_size(mut self, bytes: usize) -> Self {
        self.config.max_stderr_size = bytes;
        self
    }

    /// Set the reaping grace period after a kill
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Set the trailing-output grace period after exit
    #[must_use]
    pub fn exit_drain_grace(mut self, grace: Duration) -> Self {
        self.config.exit_drain_grace = grace;
        self
    }

    /// Add an environment variable for spawned subprocesses
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// ============================================================================
// Call Request
// ============================================================================

/// A single call: which subprocess to talk to, what to send, and how long to wait
#[derive(Clone)]
pub struct CallRequest {
    /// Argument vector; `argv[0]` is the program
    pub argv: Vec<String>,
    /// Working directory for the subprocess
    pub cwd: Option<PathBuf>,
    /// Requested timeout; the registry default applies when `None`
    pub timeout: Option<Duration>,
    /// Prompt payload
    pub prompt: PromptPayload,
    /// Optional per-line observer
    pub on_line: Option<LineObserver>,
}

impl CallRequest {
    /// Create a request for the given argument vector and prompt
    pub fn new(
        argv: impl IntoIterator<Item = impl Into<String>>,
        prompt: impl Into<PromptPayload>,
    ) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
            prompt: prompt.into(),
            on_line: None,
        }
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the requested timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the requested timeout in milliseconds
    #[must_use]
    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    /// Observe every stdout line of this call as it arrives
    #[must_use]
    pub fn on_line(mut self, observer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_line = Some(Arc::new(observer));
        self
    }
}

impl std::fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRequest")
            .field("argv", &self.argv)
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("prompt", &self.prompt)
            .field("on_line", &self.on_line.as_ref().map(|_| "<observer>"))
            .finish()
    }
}
