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

//! Launcher that reaches hosts through the OpenSSH client tools.
//!
//! | Operation | Program |
//! |-----------|---------|
//! | `Exec`, `Kill` | `ssh` |
//! | `CopyTo`, `CopyFrom` | `scp` |
//! | `Sync` | `rsync -e ssh` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::executor::{LaunchContext, Operation, SessionLauncher};
use crate::host::HostRecord;

/// Environment variable carrying the host's submission index.
pub const NODENUM_ENV: &str = "FANOUT_NODENUM";

/// ssh exits with 255 when it could not reach or authenticate to the host.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Client programs to invoke. Overridable so wrappers can be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshPrograms {
    pub ssh: String,
    pub scp: String,
    pub rsync: String,
}

impl Default for SshPrograms {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            rsync: "rsync".to_string(),
        }
    }
}

/// A program and its argument vector, before it becomes a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn into_command(self) -> Command {
        let mut command = Command::new(self.program);
        command.args(self.args);
        command
    }
}

#[derive(Debug, Clone, Default)]
pub struct SshLauncher {
    /// `-o` options passed to every ssh, scp and rsync-ssh invocation.
    ssh_options: Vec<String>,
    identity: Option<PathBuf>,
    /// Extra arguments appended verbatim before the destination.
    extra_args: Vec<String>,
    programs: SshPrograms,
}

impl SshLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_programs(mut self, programs: SshPrograms) -> Self {
        self.programs = programs;
        self
    }

    /// Build the command line for one session without touching the filesystem.
    pub fn command_line(&self, ctx: &LaunchContext<'_>) -> CommandLine {
        let host = ctx.host;
        let elevate = ctx.descriptor.options.elevate;
        match &ctx.descriptor.operation {
            Operation::Exec { command } => {
                let remote = if elevate {
                    format!("sudo -n sh -c {}", shell_words::quote(command))
                } else {
                    command.clone()
                };
                self.ssh(host, &remote)
            }
            Operation::Kill { pattern, signal } => {
                let pkill = format!("pkill -{signal} {}", shell_words::quote(pattern));
                let remote = if elevate {
                    format!("sudo -n {pkill}")
                } else {
                    pkill
                };
                self.ssh(host, &remote)
            }
            Operation::CopyTo {
                sources,
                remote,
                recursive,
            } => {
                let mut line = self.scp_base(host, *recursive);
                line.args(sources.iter().map(|p| p.display().to_string()));
                line.arg(host.remote_path(remote));
                line
            }
            Operation::CopyFrom {
                remote,
                local,
                local_dir,
                recursive,
            } => {
                let mut line = self.scp_base(host, *recursive);
                line.arg(host.remote_path(remote));
                line.arg(
                    download_dir(local_dir.as_deref(), ctx.stem)
                        .join(local)
                        .display()
                        .to_string(),
                );
                line
            }
            Operation::Sync {
                local,
                remote,
                recursive,
                archive,
                compress,
                ssh_args,
            } => {
                let mut rsh = vec![
                    self.programs.ssh.clone(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ];
                for opt in &self.ssh_options {
                    rsh.push("-o".to_string());
                    rsh.push(opt.clone());
                }
                if let Some(port) = host.port {
                    rsh.push("-p".to_string());
                    rsh.push(port.to_string());
                }
                if let Some(identity) = &self.identity {
                    rsh.push("-i".to_string());
                    rsh.push(identity.display().to_string());
                }
                let mut rsh = shell_words::join(rsh);
                if let Some(extra) = ssh_args.as_deref().filter(|s| !s.trim().is_empty()) {
                    rsh.push(' ');
                    rsh.push_str(extra);
                }

                let mut line = CommandLine::new(&self.programs.rsync);
                line.arg("-e").arg(rsh);
                if *recursive {
                    line.arg("-r");
                }
                if *archive {
                    line.arg("-a");
                }
                if *compress {
                    line.arg("-z");
                }
                line.args(self.extra_args.iter().cloned());
                line.arg(local.display().to_string());
                line.arg(host.remote_path(remote));
                line
            }
        }
    }

    fn ssh(&self, host: &HostRecord, remote_command: &str) -> CommandLine {
        let mut line = CommandLine::new(&self.programs.ssh);
        line.args(["-o", "NumberOfPasswordPrompts=1"]);
        line.arg("-o").arg(format!("SendEnv={NODENUM_ENV}"));
        for opt in &self.ssh_options {
            line.arg("-o").arg(opt.clone());
        }
        if let Some(user) = &host.user {
            line.arg("-l").arg(user.clone());
        }
        if let Some(port) = host.port {
            line.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity {
            line.arg("-i").arg(identity.display().to_string());
        }
        line.args(self.extra_args.iter().cloned());
        line.arg(host.hostname.clone());
        line.arg(remote_command);
        line
    }

    fn scp_base(&self, host: &HostRecord, recursive: bool) -> CommandLine {
        let mut line = CommandLine::new(&self.programs.scp);
        line.arg("-qC");
        for opt in &self.ssh_options {
            line.arg("-o").arg(opt.clone());
        }
        if let Some(port) = host.port {
            line.arg("-P").arg(port.to_string());
        }
        if let Some(identity) = &self.identity {
            line.arg("-i").arg(identity.display().to_string());
        }
        if recursive {
            line.arg("-r");
        }
        line.args(self.extra_args.iter().cloned());
        line
    }
}

/// Per-host directory that receives downloaded files.
pub fn download_dir(local_dir: Option<&Path>, stem: &str) -> PathBuf {
    local_dir.unwrap_or_else(|| Path::new(".")).join(stem)
}

#[async_trait]
impl SessionLauncher for SshLauncher {
    async fn build_command(&self, ctx: &LaunchContext<'_>) -> Result<Command> {
        let operation = &ctx.descriptor.operation;
        if ctx.descriptor.options.elevate && !operation.is_remote_shell() {
            tracing::debug!(
                "Elevation does not apply to {}; ignoring",
                operation.kind_name()
            );
        }

        if let Operation::CopyFrom {
            local, local_dir, ..
        } = operation
        {
            let target = download_dir(local_dir.as_deref(), ctx.stem).join(local);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let line = self.command_line(ctx);
        tracing::trace!(host = %ctx.host, "{} {}", line.program, shell_words::join(&line.args));
        let mut command = line.into_command();
        command.env(NODENUM_ENV, ctx.index.to_string());
        Ok(command)
    }

    fn is_transport_failure(&self, operation: &Operation, exit_code: i32) -> bool {
        match operation {
            Operation::Exec { .. } | Operation::Kill { .. } => exit_code == SSH_TRANSPORT_FAILURE,
            // scp and rsync do not separate remote errors from link errors
            Operation::CopyTo { .. } | Operation::CopyFrom { .. } | Operation::Sync { .. } => {
                exit_code != 0
            }
        }
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{OperationDescriptor, SessionOptions};

    fn line_for(launcher: &SshLauncher, host: &HostRecord, descriptor: &OperationDescriptor) -> CommandLine {
        let stem = host.output_stem();
        let ctx = LaunchContext {
            host,
            index: 0,
            stem: &stem,
            descriptor,
        };
        launcher.command_line(&ctx)
    }

    #[test]
    fn test_exec_command_line() {
        let launcher = SshLauncher::new().with_ssh_options(vec!["StrictHostKeyChecking=no".into()]);
        let host = HostRecord::new("web1").with_user("ops").with_port(2222);
        let line = line_for(&launcher, &host, &OperationDescriptor::exec("uptime"));

        assert_eq!(line.program, "ssh");
        assert_eq!(
            line.args,
            vec![
                "-o",
                "NumberOfPasswordPrompts=1",
                "-o",
                "SendEnv=FANOUT_NODENUM",
                "-o",
                "StrictHostKeyChecking=no",
                "-l",
                "ops",
                "-p",
                "2222",
                "web1",
                "uptime",
            ]
        );
    }

    #[test]
    fn test_elevated_exec_wraps_in_sudo() {
        let launcher = SshLauncher::new();
        let host = HostRecord::new("web1");
        let descriptor = OperationDescriptor::exec("cat /etc/shadow | wc -l")
            .with_options(SessionOptions::default().with_elevation(true));
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(
            line.args.last().unwrap(),
            "sudo -n sh -c 'cat /etc/shadow | wc -l'"
        );

        let descriptor = OperationDescriptor::exec("echo it's")
            .with_options(SessionOptions::default().with_elevation(true));
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(line.args.last().unwrap(), r"sudo -n sh -c 'echo it'\''s'");
    }

    #[test]
    fn test_kill_command_line() {
        let launcher = SshLauncher::new();
        let host = HostRecord::new("web1");
        let descriptor = OperationDescriptor::new(
            Operation::Kill {
                pattern: "java app".into(),
                signal: "9".into(),
            },
            SessionOptions::default().with_elevation(true),
        );
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(line.args.last().unwrap(), "sudo -n pkill -9 'java app'");
    }

    #[test]
    fn test_scp_to_command_line() {
        let launcher = SshLauncher::new().with_identity(Some(PathBuf::from("/keys/id")));
        let host = HostRecord::new("fe80::1").with_user("ops").with_port(22);
        let descriptor = OperationDescriptor::new(
            Operation::CopyTo {
                sources: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
                remote: "/tmp/".into(),
                recursive: true,
            },
            SessionOptions::default(),
        );
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(line.program, "scp");
        assert_eq!(
            line.args,
            vec!["-qC", "-P", "22", "-i", "/keys/id", "-r", "a.txt", "b.txt", "ops@[fe80::1]:/tmp/"]
        );
    }

    #[test]
    fn test_scp_from_targets_per_host_dir() {
        let launcher = SshLauncher::new();
        let host = HostRecord::new("web1");
        let descriptor = OperationDescriptor::new(
            Operation::CopyFrom {
                remote: "/var/log/syslog".into(),
                local: "syslog".into(),
                local_dir: Some(PathBuf::from("/tmp/logs")),
                recursive: false,
            },
            SessionOptions::default(),
        );
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(
            line.args,
            vec!["-qC", "web1:/var/log/syslog", "/tmp/logs/web1/syslog"]
        );
    }

    #[test]
    fn test_rsync_command_line() {
        let launcher = SshLauncher::new().with_ssh_options(vec!["Compression=no".into()]);
        let host = HostRecord::new("web1").with_port(2200);
        let descriptor = OperationDescriptor::new(
            Operation::Sync {
                local: PathBuf::from("site/"),
                remote: "/srv/site".into(),
                recursive: false,
                archive: true,
                compress: true,
                ssh_args: Some("-C".into()),
            },
            SessionOptions::default(),
        );
        let line = line_for(&launcher, &host, &descriptor);
        assert_eq!(line.program, "rsync");
        assert_eq!(
            line.args,
            vec![
                "-e",
                "ssh -o NumberOfPasswordPrompts=1 -o Compression=no -p 2200 -C",
                "-a",
                "-z",
                "site/",
                "web1:/srv/site",
            ]
        );
    }

    #[test]
    fn test_transport_failure_rules() {
        let launcher = SshLauncher::new();
        let exec = Operation::Exec {
            command: "true".into(),
        };
        assert!(launcher.is_transport_failure(&exec, 255));
        assert!(!launcher.is_transport_failure(&exec, 1));

        let copy = Operation::CopyTo {
            sources: vec![PathBuf::from("a")],
            remote: "/a".into(),
            recursive: false,
        };
        assert!(launcher.is_transport_failure(&copy, 1));
    }
}
