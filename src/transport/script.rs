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

//! Running a local script on every host.
//!
//! The script body is sent on stdin. The remote command is a small envelope
//! that stores it in a temporary file, runs it and removes it again, exiting
//! with the sum of the store and run statuses.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Directory used on the remote side when none is given.
pub fn default_script_dir(elevate: bool) -> &'static str {
    if elevate {
        "/root"
    } else {
        "/tmp"
    }
}

/// Interpreter named on a `#!` line, if any.
pub fn parse_shebang(first_line: &str) -> Option<String> {
    let interpreter = first_line.strip_prefix("#!")?.trim();
    (!interpreter.is_empty()).then(|| interpreter.to_string())
}

/// Split a `KEY=VALUE` argument.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("environment entry '{pair}' must have the form KEY=VALUE");
    };
    let valid_key = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        bail!("invalid environment variable name '{key}'");
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEnvelope {
    /// Remote directory the script is written to.
    pub dir: String,
    /// Interpreter; `None` executes the file directly.
    pub runtime: Option<String>,
    /// Arguments appended to the script invocation, passed through the remote shell.
    pub args: Option<String>,
    pub env: Vec<(String, String)>,
    pub elevate: bool,
}

impl ScriptEnvelope {
    /// Remote file name for one run.
    pub fn script_name() -> String {
        format!("fanout-{}", uuid::Uuid::new_v4().simple())
    }

    /// Build the remote command that stores, runs and removes `name`.
    pub fn render(&self, name: &str) -> String {
        let path = format!("{}/{}", self.dir.trim_end_matches('/'), name);
        let script = shell_words::quote(&path).into_owned();
        let runner = match &self.runtime {
            Some(runtime) => format!("{runtime} {script}"),
            None => script.clone(),
        };
        let environ = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={}", shell_words::quote(v)))
            .collect::<Vec<_>>()
            .join(" ");

        let mut invocation = String::new();
        if !environ.is_empty() {
            invocation.push_str(&environ);
            invocation.push(' ');
        }
        invocation.push_str(&runner);
        if let Some(args) = self.args.as_deref().filter(|a| !a.trim().is_empty()) {
            invocation.push(' ');
            invocation.push_str(args);
        }

        if self.elevate {
            format!(
                "cat | sudo -i tee {script} 1>/dev/null; CATRET=$?; sudo -i chmod 700 {script}; \
                 sudo -i {invocation}; RET=$((CATRET+$?)); sudo -i rm -f {script}; exit $RET"
            )
        } else {
            format!(
                "cat > {script}; CATRET=$?; chmod 700 {script}; \
                 {invocation}; RET=$((CATRET+$?)); rm -f {script}; exit $RET"
            )
        }
    }
}

/// Read a script and work out its interpreter.
///
/// An explicit `runtime` wins over the script's own `#!` line.
pub fn load_script(path: &Path, runtime: Option<String>) -> Result<(Vec<u8>, Option<String>)> {
    let body =
        std::fs::read(path).with_context(|| format!("Failed to read script {}", path.display()))?;
    if body.is_empty() {
        bail!("script {} is empty", path.display());
    }
    let runtime = runtime.or_else(|| {
        let text = String::from_utf8_lossy(&body);
        text.lines().next().and_then(parse_shebang)
    });
    Ok((body, runtime))
}
