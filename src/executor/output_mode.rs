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

//! How a run is shown on the terminal while it is in flight:
//! - Report: one status line per host as it completes
//! - Progress: an indicatif bar instead of status lines
//! - Stream: live `[host]` prefixed output plus status lines

/// Terminal display mode for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Report,
    Progress,
    Stream,
}

impl OutputMode {
    /// Create output mode from CLI arguments.
    ///
    /// `--print` wins over `--progress`; a progress bar is only drawn on a TTY.
    pub fn from_args(progress: bool, print: bool) -> Self {
        if print {
            OutputMode::Stream
        } else if progress && is_tty() {
            OutputMode::Progress
        } else {
            OutputMode::Report
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OutputMode::Stream)
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, OutputMode::Progress)
    }

    /// Whether per-host status lines are printed on completion.
    pub fn reports_tasks(&self) -> bool {
        !self.is_progress()
    }
}

/// Check if stdout is a TTY outside of CI.
pub fn is_tty() -> bool {
    use std::io::IsTerminal;

    let is_terminal = std::io::stdout().is_terminal();
    let is_ci = ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "JENKINS_URL", "TRAVIS"]
        .iter()
        .any(|var| std::env::var_os(var).is_some());

    is_terminal && !is_ci
}

/// Check if colors should be enabled (TTY, no `NO_COLOR`, not `TERM=dumb`).
pub fn should_use_colors() -> bool {
    if !is_tty() {
        return false;
    }
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(std::env::var("TERM"), Ok(term) if term == "dumb")
}
