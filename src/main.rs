// Line-protocol bridge CLI
//
// Runs `<program> [args...]` as a persistent agent subprocess, sends every
// line read from stdin as a prompt, and prints each call result as one JSON
// line. Configuration comes from KODEGEN_BRIDGE_* environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use kodegen_rpc_bridge::{BridgeConfig, CallRequest, ClientRegistry, PromptPayload};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Working directory for the agent subprocess
const ENV_CWD: &str = "KODEGEN_BRIDGE_CWD";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        bail!("usage: kodegen-rpc-bridge <program> [args...]");
    }

    let config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    let cwd = std::env::var_os(ENV_CWD).map(PathBuf::from);
    let registry = ClientRegistry::try_new(config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let mut request = CallRequest::new(argv.iter().cloned(), parse_prompt(&line))
            .on_line(|line| log::debug!("<- {line}"));
        if let Some(ref cwd) = cwd {
            request = request.cwd(cwd.clone());
        }

        match registry.call(request).await {
            Ok(output) => println!("{}", serde_json::to_string(&output)?),
            Err(e) => log::error!("call failed: {e}"),
        }
    }

    registry.reset_all().await;
    Ok(())
}

/// Lines that look like JSON objects are sent as structured payloads
fn parse_prompt(line: &str) -> PromptPayload {
    if line.trim_start().starts_with('{')
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(line)
    {
        return value.into();
    }
    line.into()
}
