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

//! Boundary between the engine and the program that reaches a host.
//!
//! A launcher only decides *what* to spawn. Spawning, stream capture,
//! timeouts and termination are owned by the session supervisor, so every
//! launcher gets the same lifecycle guarantees.

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;

use super::operation::{Operation, OperationDescriptor};
use crate::host::HostRecord;

/// Everything a launcher needs to know about one session.
#[derive(Debug, Clone, Copy)]
pub struct LaunchContext<'a> {
    pub host: &'a HostRecord,
    /// Position of the host in the submitted list.
    pub index: usize,
    /// Output-file stem unique to this host within the run.
    pub stem: &'a str,
    pub descriptor: &'a OperationDescriptor,
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Build the command for one session. Stdio is configured by the caller.
    ///
    /// An error here resolves the session as `Errored`.
    async fn build_command(&self, ctx: &LaunchContext<'_>) -> Result<Command>;

    /// Whether a non-accepted exit code means the transport failed rather
    /// than the remote operation.
    fn is_transport_failure(&self, _operation: &Operation, _exit_code: i32) -> bool {
        false
    }

    /// Name used in logs.
    fn name(&self) -> &'static str;
}
