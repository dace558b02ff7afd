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

//! Exit code calculation for a finished run.
//!
//! - **Detailed** (default): distinguishes why a run was unsuccessful, so
//!   scripts can tell a dead link from a failing command:
//!   `3` timeout or not attempted, `4` launch error or connection failure,
//!   `5` remote command failure. When several apply, the lowest code wins.
//!
//! - **RequireAllSuccess**: `0` if every host succeeded, `6` otherwise. The
//!   code stays clear of `1` so a configuration error is still recognisable.

use super::result::{OutcomeKind, ResultSet};

pub const EXIT_SUCCESS: i32 = 0;
/// Configuration or runtime error before any session was dispatched.
pub const EXIT_CONFIG_ERROR: i32 = 1;
/// Command-line usage error (reported by clap).
pub const EXIT_USAGE_ERROR: i32 = 2;
pub const EXIT_TIMED_OUT: i32 = 3;
pub const EXIT_LAUNCH_FAILURE: i32 = 4;
pub const EXIT_REMOTE_FAILURE: i32 = 5;
/// Any unsuccessful host, under [`ExitCodeStrategy::RequireAllSuccess`].
pub const EXIT_HOSTS_FAILED: i32 = 6;

/// Strategy for calculating the process exit code from all host results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitCodeStrategy {
    #[default]
    Detailed,
    RequireAllSuccess,
}

impl ExitCodeStrategy {
    pub fn calculate(&self, results: &ResultSet) -> i32 {
        match self {
            Self::Detailed => {
                let mut code = EXIT_SUCCESS;
                for entry in results {
                    let entry_code = match entry.kind {
                        OutcomeKind::Succeeded => continue,
                        OutcomeKind::TimedOut | OutcomeKind::NotAttempted => EXIT_TIMED_OUT,
                        OutcomeKind::Errored => EXIT_LAUNCH_FAILURE,
                        OutcomeKind::Failed if entry.transport_failure => EXIT_LAUNCH_FAILURE,
                        OutcomeKind::Failed => EXIT_REMOTE_FAILURE,
                    };
                    if code == EXIT_SUCCESS || entry_code < code {
                        code = entry_code;
                    }
                }
                code
            }

            Self::RequireAllSuccess => {
                if results.all_succeeded() {
                    EXIT_SUCCESS
                } else {
                    EXIT_HOSTS_FAILED
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::result::{ResultEntry, TimeoutScope};
    use crate::host::HostRecord;

    fn set(kinds: &[(OutcomeKind, bool)]) -> ResultSet {
        let entries = kinds
            .iter()
            .enumerate()
            .map(|(i, &(kind, transport))| {
                let host = HostRecord::new(format!("h{i}"));
                let mut entry = match kind {
                    OutcomeKind::NotAttempted => {
                        ResultEntry::not_attempted(host, i, TimeoutScope::Run)
                    }
                    _ => {
                        let mut e = ResultEntry::errored(host, i, "x");
                        e.kind = kind;
                        e.error = None;
                        e
                    }
                };
                entry.transport_failure = transport;
                entry
            })
            .collect();
        ResultSet::from_ordered(entries)
    }

    #[test]
    fn test_all_success() {
        let results = set(&[(OutcomeKind::Succeeded, false), (OutcomeKind::Succeeded, false)]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 0);
        assert_eq!(ExitCodeStrategy::RequireAllSuccess.calculate(&results), 0);
    }

    #[test]
    fn test_remote_failure() {
        let results = set(&[(OutcomeKind::Succeeded, false), (OutcomeKind::Failed, false)]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), EXIT_REMOTE_FAILURE);
        assert_eq!(
            ExitCodeStrategy::RequireAllSuccess.calculate(&results),
            EXIT_HOSTS_FAILED
        );
        assert_ne!(EXIT_HOSTS_FAILED, EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_connection_failure_outranks_remote_failure() {
        let results = set(&[(OutcomeKind::Failed, false), (OutcomeKind::Failed, true)]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), EXIT_LAUNCH_FAILURE);

        let results = set(&[(OutcomeKind::Errored, false), (OutcomeKind::Failed, false)]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), EXIT_LAUNCH_FAILURE);
    }

    #[test]
    fn test_timeout_outranks_everything() {
        let results = set(&[
            (OutcomeKind::Failed, false),
            (OutcomeKind::Errored, false),
            (OutcomeKind::TimedOut, false),
        ]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), EXIT_TIMED_OUT);

        let results = set(&[(OutcomeKind::Succeeded, false), (OutcomeKind::NotAttempted, false)]);
        assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), EXIT_TIMED_OUT);
    }

    #[test]
    fn test_default_is_detailed() {
        assert_eq!(ExitCodeStrategy::default(), ExitCodeStrategy::Detailed);
    }
}
