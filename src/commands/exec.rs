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

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use super::{execute_run, RunParams};
use crate::executor::{Operation, OperationDescriptor, SessionOptions};
use crate::transport::script::{default_script_dir, load_script, parse_env_pair};
use crate::transport::ScriptEnvelope;

/// Arguments of the `exec` subcommand.
#[derive(Debug, Clone, Default)]
pub struct ExecArgs {
    pub command: Vec<String>,
    pub script: Option<PathBuf>,
    pub script_args: Option<String>,
    pub env: Vec<String>,
    pub runtime: Option<String>,
    pub script_dir: Option<String>,
    pub send_input: bool,
}

pub async fn execute_command(params: RunParams, args: ExecArgs) -> Result<i32> {
    let stdin = if args.send_input {
        let mut input = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut input)
            .await
            .context("Failed to read standard input")?;
        tracing::debug!("Read {} bytes of input for every host", input.len());
        Some(input)
    } else {
        None
    };

    let descriptor = build_descriptor(&args, params.options.clone(), stdin)?;
    execute_run(params, descriptor).await
}

/// Turn the command line into a descriptor.
///
/// A script is sent on stdin and wrapped in an envelope that stores, runs and
/// removes it; the envelope handles elevation itself, so the session does not
/// wrap the command a second time.
pub fn build_descriptor(
    args: &ExecArgs,
    options: SessionOptions,
    stdin: Option<Vec<u8>>,
) -> Result<OperationDescriptor> {
    let Some(path) = &args.script else {
        let command = args.command.join(" ");
        if command.trim().is_empty() {
            bail!("no command given; pass a command or --script FILE");
        }
        return Ok(OperationDescriptor::new(
            Operation::Exec { command },
            options.with_stdin(stdin),
        ));
    };

    let (body, runtime) = load_script(path, args.runtime.clone())?;
    let env = args
        .env
        .iter()
        .map(|pair| parse_env_pair(pair))
        .collect::<Result<Vec<_>>>()?;
    let envelope = ScriptEnvelope {
        dir: args
            .script_dir
            .clone()
            .unwrap_or_else(|| default_script_dir(options.elevate).to_string()),
        runtime,
        args: args.script_args.clone(),
        env,
        elevate: options.elevate,
    };
    let command = envelope.render(&ScriptEnvelope::script_name());
    tracing::debug!("Running script {} via envelope", path.display());

    Ok(OperationDescriptor::new(
        Operation::Exec { command },
        options.with_elevation(false).with_stdin(Some(body)),
    ))
}
