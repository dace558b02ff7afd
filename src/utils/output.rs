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

//! Report files written after a run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::executor::{OperationDescriptor, ResultSet, RunSummary};
use crate::host::HostRecord;
use crate::ui::ResultSink;

/// Write `<prefix>.passed.lst` and `<prefix>.failed.lst`, one host per line,
/// so a follow-up run can target either group with `--host-file`.
pub async fn write_host_lists(results: &ResultSet, prefix: &Path) -> Result<(PathBuf, PathBuf)> {
    let passed_path = with_suffix(prefix, "passed.lst");
    let failed_path = with_suffix(prefix, "failed.lst");

    fs::write(&passed_path, host_lines(results.passed_hosts()))
        .await
        .with_context(|| format!("Failed to write {}", passed_path.display()))?;
    fs::write(&failed_path, host_lines(results.failed_hosts()))
        .await
        .with_context(|| format!("Failed to write {}", failed_path.display()))?;

    tracing::debug!(
        "Wrote host lists {} and {}",
        passed_path.display(),
        failed_path.display()
    );
    Ok((passed_path, failed_path))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Host-file lines that round-trip through `read_host_file`.
fn host_lines<'a>(hosts: impl Iterator<Item = &'a HostRecord>) -> String {
    let mut out = String::new();
    for host in hosts {
        out.push_str(&host.spec());
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    operation: String,
    kind: &'static str,
    generated_at: String,
    summary: RunSummary,
    results: Vec<JsonEntry<'a>>,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    #[serde(flatten)]
    entry: &'a crate::executor::ResultEntry,
    stdout_text: String,
    stderr_text: String,
}

/// Serialize the whole result set, including captured output, as JSON.
pub async fn write_json_report(
    results: &ResultSet,
    descriptor: &OperationDescriptor,
    path: &Path,
) -> Result<()> {
    let report = JsonReport {
        operation: descriptor.operation.to_string(),
        kind: descriptor.operation.kind_name(),
        generated_at: chrono::Local::now().to_rfc3339(),
        summary: results.summary(),
        results: results
            .iter()
            .map(|entry| JsonEntry {
                entry,
                stdout_text: entry.stdout.text(),
                stderr_text: entry.stderr.text(),
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::debug!("Wrote JSON report to {}", path.display());
    Ok(())
}

/// Writes the passed/failed host lists after a run.
pub struct HostListSink {
    pub prefix: PathBuf,
}

#[async_trait]
impl ResultSink for HostListSink {
    async fn consume(&self, results: &ResultSet) -> Result<()> {
        write_host_lists(results, &self.prefix).await.map(|_| ())
    }
}

/// Writes the JSON report after a run.
pub struct JsonReportSink {
    pub path: PathBuf,
    pub descriptor: OperationDescriptor,
}

#[async_trait]
impl ResultSink for JsonReportSink {
    async fn consume(&self, results: &ResultSet) -> Result<()> {
        write_json_report(results, &self.descriptor, &self.path).await
    }
}
