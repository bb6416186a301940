//! Secure environment assembly for upstream MCP child processes.
//!
//! Produces the environment and, where the command needs a login shell, the
//! wrapped argv to hand to a process spawner. See [`EnvAssembler::assemble`].

mod allowlist;
mod path;
mod shell;

pub use shell::{WrappedCommand, escape_unix, escape_windows, wrap_with_login_shell};

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("working directory does not exist: {0}")]
    InvalidWorkingDir(String),
}

/// Fails fast if `path` isn't a directory that exists, so a misconfigured
/// `working_dir` surfaces as a connect-time config error instead of a spawn
/// failure from the OS.
pub fn validate_working_dir(path: &str) -> Result<(), EnvError> {
    if std::path::Path::new(path).is_dir() {
        Ok(())
    } else {
        Err(EnvError::InvalidWorkingDir(path.to_string()))
    }
}

/// Per-server overrides layered over the filtered parent environment.
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    /// Extra allow-list patterns (exact names or `prefix*` wildcards).
    pub extra_allow: Vec<String>,
    /// Variables always injected, overriding anything inherited.
    pub custom_env: Vec<(String, String)>,
    /// Enables Unix PATH enhancement even when the inherited PATH looks
    /// rich already. Ignored on Windows, where enhancement always runs.
    pub enhance_path: bool,
    /// Wrap the command through the user's login shell for PATH
    /// inheritance from `.bashrc`/`.zshrc`-style startup files.
    pub shell_wrap: bool,
}

/// A fully assembled child-process invocation: filtered environment plus
/// (optionally) a shell-wrapped command line.
#[derive(Debug, Clone)]
pub struct AssembledCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Builds [`AssembledCommand`]s from a `(command, args)` pair and an
/// [`EnvPolicy`], given the parent process environment.
#[derive(Debug, Default)]
pub struct EnvAssembler;

impl EnvAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assembles the environment and argv for spawning `command args...`.
    ///
    /// On Unix, PATH is enhanced in place (merging discovered tool
    /// directories) before the shell wrap, if any, is applied. On Windows,
    /// PATH is reconstructed from the registry unconditionally.
    pub fn assemble(
        &self,
        command: &str,
        args: &[String],
        policy: &EnvPolicy,
        parent_env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<AssembledCommand, EnvError> {
        let mut env_map: HashMap<String, String> = parent_env.into_iter().collect();

        #[cfg(windows)]
        {
            if let Ok(reconstructed) = path::reconstruct_windows_path() {
                if !reconstructed.is_empty() {
                    env_map.insert("PATH".to_string(), reconstructed);
                }
            }
        }
        #[cfg(not(windows))]
        {
            let inherited = env_map.get("PATH").cloned().unwrap_or_default();
            let enhanced = path::enhance_unix_path(&inherited, policy.enhance_path);
            env_map.insert("PATH".to_string(), enhanced);
        }

        let filtered = allowlist::filter_env(env_map, &policy.extra_allow, &policy.custom_env);

        let (program, args) = if policy.shell_wrap {
            let shell = filtered
                .iter()
                .find(|(k, _)| k == "SHELL")
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| "/bin/sh".to_string());
            let wrapped = shell::wrap_with_login_shell(command, args, &shell, cfg!(windows));
            (wrapped.program, wrapped.args)
        } else {
            (command.to_string(), args.to_vec())
        };

        Ok(AssembledCommand {
            program,
            args,
            env: filtered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_env_survives_filtering() {
        let assembler = EnvAssembler::new();
        let policy = EnvPolicy {
            custom_env: vec![("MY_SERVER_FLAG".to_string(), "1".to_string())],
            ..Default::default()
        };
        let parent = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let assembled = assembler.assemble("python3", &[], &policy, parent).unwrap();
        assert!(
            assembled
                .env
                .iter()
                .any(|(k, v)| k == "MY_SERVER_FLAG" && v == "1")
        );
    }

    #[test]
    fn validate_working_dir_accepts_existing_directory() {
        assert!(validate_working_dir(env!("CARGO_MANIFEST_DIR")).is_ok());
    }

    #[test]
    fn validate_working_dir_rejects_missing_path() {
        let err = validate_working_dir("/no/such/directory/mcpup-test").unwrap_err();
        assert!(matches!(err, EnvError::InvalidWorkingDir(_)));
    }

    #[test]
    fn no_shell_wrap_by_default() {
        let assembler = EnvAssembler::new();
        let policy = EnvPolicy::default();
        let assembled = assembler
            .assemble("python3", &["-m".to_string(), "srv".to_string()], &policy, Vec::new())
            .unwrap();
        assert_eq!(assembled.program, "python3");
        assert_eq!(assembled.args, vec!["-m".to_string(), "srv".to_string()]);
    }
}
