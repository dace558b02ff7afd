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

//! Launcher that runs the command on this machine once per host.
//!
//! The host identity is exported to the command as `FANOUT_HOST`,
//! `FANOUT_USER`, `FANOUT_PORT` and `FANOUT_NODENUM`, which makes it useful
//! for driving other per-host tools (`kubectl`, `docker exec`, ...) and for
//! exercising the engine without a network.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::ssh::NODENUM_ENV;
use crate::executor::{LaunchContext, Operation, SessionLauncher};

#[derive(Debug, Clone)]
pub struct LocalLauncher {
    shell: String,
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl LocalLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl SessionLauncher for LocalLauncher {
    async fn build_command(&self, ctx: &LaunchContext<'_>) -> Result<Command> {
        let Operation::Exec { command } = &ctx.descriptor.operation else {
            bail!(
                "{} is not supported by the local transport",
                ctx.descriptor.operation.kind_name()
            );
        };

        let mut cmd = if ctx.descriptor.options.elevate {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&self.shell);
            cmd
        } else {
            Command::new(&self.shell)
        };
        cmd.arg("-c").arg(command);

        let host = ctx.host;
        cmd.env("FANOUT_HOST", &host.hostname)
            .env(NODENUM_ENV, ctx.index.to_string());
        match &host.user {
            Some(user) => cmd.env("FANOUT_USER", user),
            None => cmd.env_remove("FANOUT_USER"),
        };
        match host.port {
            Some(port) => cmd.env("FANOUT_PORT", port.to_string()),
            None => cmd.env_remove("FANOUT_PORT"),
        };
        Ok(cmd)
    }

    fn name(&self) -> &'static str {
        "local shell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::OperationDescriptor;
    use crate::host::HostRecord;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_exports_host_identity() {
        let host = HostRecord::new("node7").with_user("ops").with_port(2022);
        let descriptor =
            OperationDescriptor::exec("echo $FANOUT_HOST $FANOUT_USER $FANOUT_PORT $FANOUT_NODENUM");
        let ctx = LaunchContext {
            host: &host,
            index: 4,
            stem: "node7",
            descriptor: &descriptor,
        };
        let output = LocalLauncher::new()
            .build_command(&ctx)
            .await
            .unwrap()
            .output()
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "node7 ops 2022 4\n");
    }

    #[tokio::test]
    async fn test_rejects_file_transfer() {
        let host = HostRecord::new("node7");
        let descriptor = OperationDescriptor::new(
            Operation::CopyTo {
                sources: vec![PathBuf::from("a")],
                remote: "/a".into(),
                recursive: false,
            },
            Default::default(),
        );
        let ctx = LaunchContext {
            host: &host,
            index: 0,
            stem: "node7",
            descriptor: &descriptor,
        };
        let err = LocalLauncher::new().build_command(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
