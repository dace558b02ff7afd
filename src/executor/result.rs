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

//! Result types for a parallel run.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::capture::CapturedStream;
use crate::host::HostRecord;

/// Terminal classification of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Exited with an accepted exit code.
    Succeeded,
    /// Exited with a code outside the accepted set, or was killed by a signal.
    Failed,
    /// Forcibly terminated by a session timeout, the run deadline or an interrupt.
    TimedOut,
    /// The subprocess could not be started.
    Errored,
    /// Never admitted before the run ended.
    NotAttempted,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::Failed => "failed",
            OutcomeKind::TimedOut => "timed out",
            OutcomeKind::Errored => "errored",
            OutcomeKind::NotAttempted => "not attempted",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What forced a session to end early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// The per-session timeout elapsed.
    Session,
    /// The run-wide deadline elapsed.
    Run,
    /// The run was interrupted (Ctrl-C).
    Interrupted,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutScope::Session => "session timeout",
            TimeoutScope::Run => "run timeout",
            TimeoutScope::Interrupted => "interrupted",
        })
    }
}

/// Immutable outcome of one host's session.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEntry {
    pub host: HostRecord,
    /// Position of the host in the submitted list.
    pub index: usize,
    pub kind: OutcomeKind,
    pub timeout_scope: Option<TimeoutScope>,
    pub exit_code: Option<i32>,
    /// Signal that terminated the local subprocess, if any.
    pub signal: Option<i32>,
    /// Launch error or internal failure description.
    pub error: Option<String>,
    /// The transport (not the remote command) reported the failure.
    pub transport_failure: bool,
    pub started_at: Option<DateTime<Local>>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ResultEntry {
    fn blank(host: HostRecord, index: usize, kind: OutcomeKind) -> Self {
        Self {
            host,
            index,
            kind,
            timeout_scope: None,
            exit_code: None,
            signal: None,
            error: None,
            transport_failure: false,
            started_at: None,
            elapsed: Duration::ZERO,
            stdout: CapturedStream::default(),
            stderr: CapturedStream::default(),
        }
    }

    /// Entry for a host whose session never started.
    pub fn not_attempted(host: HostRecord, index: usize, scope: TimeoutScope) -> Self {
        let mut entry = Self::blank(host, index, OutcomeKind::NotAttempted);
        entry.timeout_scope = Some(scope);
        entry
    }

    /// Entry for a session that could not be launched or whose task was lost.
    pub fn errored(host: HostRecord, index: usize, error: impl Into<String>) -> Self {
        let mut entry = Self::blank(host, index, OutcomeKind::Errored);
        entry.error = Some(error.into());
        entry
    }

    /// Entry for a session that was abandoned after being forcibly ended.
    pub fn abandoned(host: HostRecord, index: usize, scope: TimeoutScope) -> Self {
        let mut entry = Self::blank(host, index, OutcomeKind::TimedOut);
        entry.timeout_scope = Some(scope);
        entry.error = Some(format!("abandoned after {scope}"));
        entry
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    /// Short human-readable reason for a non-success outcome.
    pub fn reason(&self) -> Option<String> {
        match self.kind {
            OutcomeKind::Succeeded => None,
            OutcomeKind::Failed if self.transport_failure => Some(format!(
                "connection failed (exit status {})",
                self.exit_code.unwrap_or(255)
            )),
            OutcomeKind::Failed => match (self.exit_code, self.signal) {
                (Some(code), _) => Some(format!("exited with error code {code}")),
                (None, Some(sig)) => Some(format!("killed by signal {sig}")),
                (None, None) => Some("failed".to_string()),
            },
            OutcomeKind::TimedOut => Some(match self.timeout_scope {
                Some(scope) => format!("timed out ({scope})"),
                None => "timed out".to_string(),
            }),
            OutcomeKind::Errored => Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "failed to start".to_string()),
            ),
            OutcomeKind::NotAttempted => Some("not attempted".to_string()),
        }
    }
}

/// Aggregate counts over a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub not_attempted: usize,
    /// Subset of `failed` attributed to the transport.
    pub connection_failed: usize,
}

impl RunSummary {
    /// Counts over any run of entries, such as a finished first batch.
    pub fn from_entries(entries: &[ResultEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            match entry.kind {
                OutcomeKind::Succeeded => summary.succeeded += 1,
                OutcomeKind::Failed => {
                    summary.failed += 1;
                    if entry.transport_failure {
                        summary.connection_failed += 1;
                    }
                }
                OutcomeKind::TimedOut => summary.timed_out += 1,
                OutcomeKind::Errored => summary.errored += 1,
                OutcomeKind::NotAttempted => summary.not_attempted += 1,
            }
        }
        summary
    }

    pub fn unsuccessful(&self) -> usize {
        self.total - self.succeeded
    }
}

/// One entry per submitted host, in submission order.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    entries: Vec<ResultEntry>,
}

impl ResultSet {
    /// Build from entries already ordered by submission index.
    pub(crate) fn from_ordered(entries: Vec<ResultEntry>) -> Self {
        debug_assert!(entries.iter().enumerate().all(|(i, e)| e.index == i));
        Self { entries }
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResultEntry> {
        self.entries.get(index)
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(ResultEntry::is_success)
    }

    pub fn kinds(&self) -> Vec<OutcomeKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_entries(&self.entries)
    }

    pub fn passed_hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.entries
            .iter()
            .filter(|e| e.is_success())
            .map(|e| &e.host)
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.entries
            .iter()
            .filter(|e| !e.is_success())
            .map(|e| &e.host)
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a ResultEntry;
    type IntoIter = std::slice::Iter<'a, ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, kind: OutcomeKind) -> ResultEntry {
        ResultEntry::blank(HostRecord::new(format!("h{index}")), index, kind)
    }

    #[test]
    fn test_summary_counts() {
        let mut conn = entry(3, OutcomeKind::Failed);
        conn.transport_failure = true;
        conn.exit_code = Some(255);

        let set = ResultSet::from_ordered(vec![
            entry(0, OutcomeKind::Succeeded),
            entry(1, OutcomeKind::Failed),
            entry(2, OutcomeKind::TimedOut),
            conn,
            ResultEntry::not_attempted(HostRecord::new("h4"), 4, TimeoutScope::Run),
        ]);

        let summary = set.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.connection_failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.not_attempted, 1);
        assert_eq!(summary.unsuccessful(), 4);
        assert!(!set.all_succeeded());
        assert_eq!(set.passed_hosts().count(), 1);
        assert_eq!(set.failed_hosts().count(), 4);
    }

    #[test]
    fn test_reasons() {
        let mut failed = entry(0, OutcomeKind::Failed);
        failed.exit_code = Some(2);
        assert_eq!(failed.reason().unwrap(), "exited with error code 2");

        let mut killed = entry(0, OutcomeKind::Failed);
        killed.signal = Some(9);
        assert_eq!(killed.reason().unwrap(), "killed by signal 9");

        let mut timed_out = entry(0, OutcomeKind::TimedOut);
        timed_out.timeout_scope = Some(TimeoutScope::Session);
        assert_eq!(timed_out.reason().unwrap(), "timed out (session timeout)");

        assert!(entry(0, OutcomeKind::Succeeded).reason().is_none());
    }

    #[test]
    fn test_serializes_kind_as_snake_case() {
        let json = serde_json::to_value(OutcomeKind::NotAttempted).unwrap();
        assert_eq!(json, "not_attempted");
    }
}
