//! Command building logic for subprocess transport

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::VERSION;
use crate::error::{BridgeError, Result};

use super::config::{BRIDGE_VERSION_ENV, DANGEROUS_ENV_VARS};

/// Command builder for an agent subprocess
pub(super) struct CommandBuilder<'a> {
    argv: &'a [String],
    cwd: Option<&'a Path>,
    env: &'a HashMap<String, String>,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub(super) const fn new(
        argv: &'a [String],
        cwd: Option<&'a Path>,
        env: &'a HashMap<String, String>,
    ) -> Self {
        Self { argv, cwd, env }
    }

    /// Build the command with piped stdio
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an empty argv and `ProgramNotFound` when
    /// `argv[0]` cannot be resolved
    pub(super) fn build(&self) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| BridgeError::invalid_config("argument vector is empty"))?;

        let mut cmd = Command::new(resolve_program(program)?);
        cmd.args(args);

        for (key, value) in self.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                log::warn!("Refusing to pass {key} to subprocess environment");
                continue;
            }
            cmd.env(key, value);
        }
        cmd.env(BRIDGE_VERSION_ENV, VERSION);

        if let Some(cwd) = self.cwd {
            cmd.env("PWD", cwd).current_dir(cwd);
        }

        // Stderr is piped, never inherited, so the child cannot touch the
        // parent's terminal state.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

/// Resolve the program to run
///
/// Anything containing a path separator is used as given; bare names are looked
/// up on `PATH`.
///
/// # Errors
/// Returns `ProgramNotFound` if a bare name is not on `PATH`
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|_| BridgeError::program_not_found(program))
}
