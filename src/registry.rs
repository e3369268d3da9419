//! Client registry keyed by process identity
//!
//! Holds at most one live [`ProcessClient`]. A call against the cached
//! identity reuses its subprocess (and whatever session state the agent keeps
//! in it); a call with a different working directory or argument vector
//! disposes the cached client first and starts over.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::transport::ProcessClient;
use crate::types::identifiers::ProcessIdentity;
use crate::types::options::{BridgeConfig, CallRequest};
use crate::types::output::CallOutput;

/// Single-slot registry of process clients
///
/// Registries are independent values; cloning shares the same slot.
#[derive(Clone)]
pub struct ClientRegistry {
    current: Arc<Mutex<Option<Arc<ProcessClient>>>>,
    config: BridgeConfig,
}

impl ClientRegistry {
    /// Create an empty registry whose clients use `config`
    ///
    /// An invalid `config` is not rejected here; every later call fails with
    /// `InvalidConfig` instead. Use [`ClientRegistry::try_new`] to fail early.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// Create an empty registry after validating `config`
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending field
    pub fn try_new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Configuration handed to every client
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Get the client for `(cwd, argv)`, replacing the cached one on mismatch
    ///
    /// The replacement is validated first; only then is the cached client
    /// disposed (and its subprocess reaped) and replaced.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `argv` is empty or the registry's config is
    /// invalid; the cached client is kept in that case
    pub async fn acquire(&self, argv: &[String], cwd: Option<&Path>) -> Result<Arc<ProcessClient>> {
        let identity = ProcessIdentity::new(cwd, argv);
        let mut current = self.current.lock().await;

        if let Some(client) = current.as_ref()
            && client.identity() == &identity
        {
            return Ok(Arc::clone(client));
        }

        // A rejected request leaves the cached client untouched.
        let client = Arc::new(ProcessClient::new(
            argv.to_vec(),
            cwd.map(Path::to_path_buf),
            self.config.clone(),
        )?);

        if let Some(previous) = current.take() {
            log::info!(
                "[{}] identity changed to {identity}, disposing client",
                previous.id()
            );
            previous.dispose().await;
        }
        log::debug!("[{}] created client for {identity}", client.id());
        *current = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Resolve the client for `request` and perform the call
    ///
    /// # Errors
    /// See [`ProcessClient::call`]
    pub async fn call(&self, request: CallRequest) -> Result<CallOutput> {
        let CallRequest {
            argv,
            cwd,
            timeout,
            prompt,
            on_line,
        } = request;

        let client = self.acquire(&argv, cwd.as_deref()).await?;
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        client.call(prompt, timeout, on_line).await
    }

    /// The cached client, if any
    pub async fn current(&self) -> Option<Arc<ProcessClient>> {
        self.current.lock().await.clone()
    }

    /// Dispose the cached client and empty the registry
    pub async fn reset_all(&self) {
        let previous = self.current.lock().await.take();
        if let Some(client) = previous {
            log::info!("[{}] registry reset, disposing client", client.id());
            client.dispose().await;
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
