//! Type definitions for the RPC bridge
//!
//! - [`identifiers`] - Type-safe ID wrappers (`ProcessIdentity`, `ClientId`, `CallId`)
//! - [`options`] - Bridge configuration and call requests
//! - [`output`] - Call results and client status snapshots
//! - [`prompt_input`] - Prompt payloads and their normalized form

pub mod identifiers;
pub mod options;
pub mod output;
pub mod prompt_input;

// Re-export commonly used types
pub use identifiers::{CallId, ClientId, ProcessIdentity};
pub use options::{BridgeConfig, BridgeConfigBuilder, CallRequest, LineObserver};
pub use output::{CallOutput, ClientState, ClientStatus};
pub use prompt_input::{ContentPart, NormalizedPrompt, PromptMessage, PromptPayload};
