// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operation descriptors shared by every session of a run.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::utils::sanitize::sanitize_command;

/// Signal sent by `kill` when none is given.
pub const DEFAULT_KILL_SIGNAL: &str = "9";

/// The operation template applied to every host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Run a command through the remote shell.
    Exec { command: String },

    /// Copy local files to the same path on every host.
    CopyTo {
        sources: Vec<PathBuf>,
        remote: String,
        recursive: bool,
    },

    /// Copy a remote file from every host into a per-host local directory.
    CopyFrom {
        remote: String,
        local: String,
        local_dir: Option<PathBuf>,
        recursive: bool,
    },

    /// Mirror a local path to every host with rsync.
    Sync {
        local: PathBuf,
        remote: String,
        recursive: bool,
        archive: bool,
        compress: bool,
        ssh_args: Option<String>,
    },

    /// Signal every remote process whose name matches `pattern`.
    Kill { pattern: String, signal: String },
}

impl Operation {
    /// Short name used in logs and report headers.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::Exec { .. } => "exec",
            Operation::CopyTo { .. } => "upload",
            Operation::CopyFrom { .. } => "download",
            Operation::Sync { .. } => "sync",
            Operation::Kill { .. } => "kill",
        }
    }

    /// Whether the operation runs through a remote shell (as opposed to a file transfer).
    pub fn is_remote_shell(&self) -> bool {
        matches!(self, Operation::Exec { .. } | Operation::Kill { .. })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Operation::Exec { command } => {
                sanitize_command(command)
                    .map_err(|e| ConfigError::invalid_operation(format!("{e}")))?;
            }
            Operation::CopyTo {
                sources, remote, ..
            } => {
                if sources.is_empty() {
                    return Err(ConfigError::invalid_operation("no local paths to upload"));
                }
                require_absolute(remote)?;
            }
            Operation::CopyFrom { remote, local, .. } => {
                require_absolute(remote)?;
                if local.trim().is_empty() {
                    return Err(ConfigError::invalid_operation("local path is empty"));
                }
                if local.split('/').any(|part| part == "..") {
                    return Err(ConfigError::invalid_operation(
                        "local path must stay inside the per-host directory",
                    ));
                }
            }
            Operation::Sync { local, remote, .. } => {
                if local.as_os_str().is_empty() {
                    return Err(ConfigError::invalid_operation("local path is empty"));
                }
                require_absolute(remote)?;
            }
            Operation::Kill { pattern, signal } => {
                if pattern.trim().is_empty() {
                    return Err(ConfigError::invalid_operation("kill pattern is empty"));
                }
                let valid_signal = !signal.is_empty()
                    && signal.chars().all(|c| c.is_ascii_alphanumeric());
                if !valid_signal {
                    return Err(ConfigError::invalid_operation(format!(
                        "invalid signal '{signal}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn require_absolute(remote: &str) -> Result<(), ConfigError> {
    if remote.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::invalid_operation(format!(
            "remote path {remote} must be an absolute path"
        )))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Exec { command } => write!(f, "{command}"),
            Operation::CopyTo {
                sources, remote, ..
            } => {
                let sources: Vec<_> = sources.iter().map(|p| p.display().to_string()).collect();
                write!(f, "upload {} -> {remote}", sources.join(" "))
            }
            Operation::CopyFrom { remote, local, .. } => {
                write!(f, "download {remote} -> <host>/{local}")
            }
            Operation::Sync { local, remote, .. } => {
                write!(f, "sync {} -> {remote}", local.display())
            }
            Operation::Kill { pattern, signal } => write!(f, "kill -{signal} {pattern}"),
        }
    }
}

/// Options shared by all sessions of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Per-session timeout; `None` waits for natural exit.
    pub timeout: Option<Duration>,
    /// Directory receiving one stdout file per host.
    pub outdir: Option<PathBuf>,
    /// Directory receiving one stderr file per host.
    pub errdir: Option<PathBuf>,
    /// Run the remote operation with escalated privileges.
    pub elevate: bool,
    /// Exit codes classified as success.
    pub ok_exit_codes: BTreeSet<i32>,
    /// Bytes written to every session's stdin.
    pub stdin: Option<Arc<[u8]>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            outdir: None,
            errdir: None,
            elevate: false,
            ok_exit_codes: BTreeSet::from([0]),
            stdin: None,
        }
    }
}

impl SessionOptions {
    /// Set the timeout in seconds; `0` disables it.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_outdir(mut self, dir: Option<PathBuf>) -> Self {
        self.outdir = dir;
        self
    }

    pub fn with_errdir(mut self, dir: Option<PathBuf>) -> Self {
        self.errdir = dir;
        self
    }

    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    /// Replace the accepted exit codes. An empty list keeps the default `{0}`.
    pub fn with_ok_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        let codes: BTreeSet<i32> = codes.into_iter().collect();
        if !codes.is_empty() {
            self.ok_exit_codes = codes;
        }
        self
    }

    pub fn with_stdin(mut self, input: Option<Vec<u8>>) -> Self {
        self.stdin = input.map(Arc::from);
        self
    }

    pub fn is_accepted(&self, code: i32) -> bool {
        self.ok_exit_codes.contains(&code)
    }
}

/// Operation plus shared options; immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub operation: Operation,
    pub options: SessionOptions,
}

impl OperationDescriptor {
    pub fn new(operation: Operation, options: SessionOptions) -> Self {
        Self { operation, options }
    }

    pub fn exec(command: impl Into<String>) -> Self {
        Self::new(
            Operation::Exec {
                command: command.into(),
            },
            SessionOptions::default(),
        )
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.operation.validate()
    }
}
