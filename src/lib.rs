//! # RPC Bridge for line-protocol agents
//!
//! Turns a long-lived, line-oriented agent subprocess into an async
//! call/response API. Each call writes one JSON line to the subprocess and
//! resolves with every output line produced until the agent reports the end of
//! its turn, the subprocess exits, or a timeout elapses.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kodegen_rpc_bridge::{BridgeConfig, CallRequest, ClientRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ClientRegistry::new(BridgeConfig::default());
//!
//!     let request = CallRequest::new(["pi", "--mode", "rpc"], "What is 2 + 2?")
//!         .cwd("/tmp")
//!         .timeout_ms(60_000)
//!         .on_line(|line| log::debug!("agent: {line}"));
//!
//!     let output = registry.call(request).await?;
//!     log::info!("turn finished with code {:?}", output.code);
//!
//!     registry.reset_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! - Input: `{"type":"prompt","message":"..."}` followed by a newline
//! - Output: arbitrary lines; a JSON object with `"type":"agent_end"` ends
//!   the turn. Everything else is buffered verbatim and never treated as an
//!   error.
//!
//! ## Guarantees
//!
//! - **Single flight** - a second call while one is pending fails with
//!   [`BridgeError::AlreadyBusy`]; the first call is unaffected
//! - **Exactly once** - every call is resolved exactly once, by the turn
//!   marker, subprocess exit, or timeout, whichever comes first
//! - **No orphans** - timeouts kill the subprocess; disposing or dropping a
//!   client kills it too
//! - **Bounded waits** - effective timeout is `min(requested, ceiling)`, with a
//!   5 minute default ceiling
//!
//! ## Architecture
//!
//! - [`prompt`]: prompt normalization (payload of any shape to text)
//! - [`protocol`]: outbound command envelope, best-effort line decoding, codec
//! - [`transport`]: the subprocess client and its lifecycle
//! - [`registry`]: one cached client per (cwd, argv) identity
//! - [`types`]: identifiers, configuration, payloads and results
//! - [`error`]: error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod prompt;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use error::{BridgeError, Result};
pub use prompt::normalize;
pub use protocol::{LineEvent, OutboundCommand, RpcEvent, TURN_COMPLETE_MARKER, decode_line};
pub use registry::ClientRegistry;
pub use transport::{ProcessClient, effective_timeout};
pub use transport::subprocess::HARD_TIMEOUT_CEILING;

pub use types::identifiers::{CallId, ClientId, ProcessIdentity};
pub use types::options::{BridgeConfig, BridgeConfigBuilder, CallRequest, LineObserver};
pub use types::output::{CallOutput, ClientState, ClientStatus};
pub use types::prompt_input::{ContentPart, NormalizedPrompt, PromptMessage, PromptPayload};

/// Version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
