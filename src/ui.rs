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

//! Console rendering of a run: per-task status lines while it runs, and
//! result sinks that consume the finished result set.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::executor::output_sync::synchronized_print_lines;
use crate::executor::{
    CapturedStream, OperationDescriptor, OutcomeKind, ResultEntry, ResultSet, RunObserver,
    RunSummary,
};
use crate::host::HostRecord;

const PROGRESS_TICK_RATE_MS: u64 = 80;

fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80)
}

/// String builders for everything printed to the console.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    colors: bool,
}

impl OutputFormatter {
    pub fn new(colors: bool) -> Self {
        Self { colors }
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> String) -> String {
        if self.colors {
            style(text)
        } else {
            text.to_string()
        }
    }

    pub fn format_run_header(
        &self,
        descriptor: &OperationDescriptor,
        host_count: usize,
        parallelism: usize,
    ) -> String {
        format!(
            "{} {} on {} {} (parallelism {}):\n{}",
            self.paint("►", |t| t.cyan().bold().to_string()),
            self.paint(
                &capitalize(descriptor.operation.kind_name()),
                |t| t.cyan().to_string()
            ),
            self.paint(&host_count.to_string(), |t| t.bold().to_string()),
            if host_count == 1 { "host" } else { "hosts" },
            parallelism,
            self.paint(&format!("  {}", descriptor.operation), |t| {
                t.dimmed().to_string()
            })
        )
    }

    /// `[seq] HH:MM:SS [SUCCESS|FAILURE] host[:port] reason`
    pub fn format_task_line(&self, seq: usize, at: DateTime<Local>, entry: &ResultEntry) -> String {
        let status = if entry.is_success() {
            self.paint("[SUCCESS]", |t| t.green().to_string())
        } else {
            self.paint("[FAILURE]", |t| t.red().to_string())
        };
        let mut line = format!(
            "{} {} {} {}",
            self.paint(&format!("[{seq}]"), |t| t.dimmed().to_string()),
            at.format("%H:%M:%S"),
            status,
            self.paint(&entry.host.pretty(), |t| t.bold().to_string()),
        );
        if let Some(reason) = entry.reason() {
            line.push(' ');
            line.push_str(&self.paint(&reason, |t| t.yellow().to_string()));
        }
        line
    }

    /// Captured stdout and stderr of one host, indented.
    pub fn format_inline_output(&self, entry: &ResultEntry) -> Vec<String> {
        let mut lines = Vec::new();
        self.push_stream(&mut lines, &entry.stdout, None);
        self.push_stream(&mut lines, &entry.stderr, Some("Stderr:"));
        lines
    }

    fn push_stream(&self, lines: &mut Vec<String>, stream: &CapturedStream, title: Option<&str>) {
        if stream.is_empty() {
            return;
        }
        if let Some(title) = title {
            lines.push(self.paint(title, |t| t.red().to_string()));
        }
        if stream.is_truncated() {
            lines.push(self.paint(
                &format!("  ... {} earlier bytes not kept ...", stream.dropped),
                |t| t.dimmed().to_string(),
            ));
        }
        let max_width = terminal_width().saturating_sub(4).max(20);
        for line in stream.text().lines() {
            let mut remaining = line;
            while remaining.width() > max_width {
                let (chunk, rest) = split_at_width(remaining, max_width);
                lines.push(format!("  {chunk}"));
                remaining = rest;
            }
            lines.push(format!("  {remaining}"));
        }
    }

    pub fn format_summary(&self, summary: &RunSummary) -> String {
        let rule = self.paint(&"═".repeat(terminal_width()), |t| t.dimmed().to_string());
        let mut parts = vec![format!("{} hosts", summary.total)];
        parts.push(self.paint(&format!("{} succeeded", summary.succeeded), |t| {
            t.green().to_string()
        }));
        if summary.unsuccessful() > 0 {
            parts.push(self.paint(&format!("{} failed", summary.unsuccessful()), |t| {
                t.red().to_string()
            }));
        }

        let mut out = format!("{rule}\n Summary: {}\n", parts.join(" • "));
        let breakdown = [
            ("Connections failed", summary.connection_failed),
            ("Tasks failed", summary.failed - summary.connection_failed),
            ("Tasks timed out", summary.timed_out),
            ("Not attempted", summary.not_attempted),
            ("Launch errors", summary.errored),
        ];
        for (label, count) in breakdown.iter().filter(|(_, n)| *n > 0) {
            out.push_str(&format!("   {label}: {count}\n"));
        }
        out.push_str(&rule);
        out
    }

    /// Non-success hosts with their reasons.
    pub fn format_failures(&self, results: &ResultSet) -> Vec<String> {
        let failed: Vec<&ResultEntry> = results.iter().filter(|e| !e.is_success()).collect();
        if failed.is_empty() {
            return Vec::new();
        }
        let mut lines = vec![self.paint("Failed hosts:", |t| t.red().bold().to_string())];
        for entry in failed {
            lines.push(format!(
                "  {} {}: {}",
                self.paint("✗", |t| t.red().to_string()),
                entry.host,
                entry.reason().unwrap_or_default()
            ));
        }
        lines
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn split_at_width(s: &str, max_width: usize) -> (&str, &str) {
    let mut width = 0;
    let mut split_pos = 0;

    for (i, ch) in s.char_indices() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width {
            break;
        }
        width += ch_width;
        split_pos = i + ch.len_utf8();
    }

    if split_pos == 0 {
        // A single character wider than the limit still has to make progress.
        split_pos = s.chars().next().map(char::len_utf8).unwrap_or(0);
    }
    s.split_at(split_pos)
}

/// Prints one status line per host as sessions complete.
pub struct TaskReporter {
    formatter: OutputFormatter,
    inline: bool,
    completed: AtomicUsize,
}

impl TaskReporter {
    pub fn new(formatter: OutputFormatter, inline: bool) -> Self {
        Self {
            formatter,
            inline,
            completed: AtomicUsize::new(0),
        }
    }
}

impl RunObserver for TaskReporter {
    fn session_finished(&self, entry: &ResultEntry) {
        if entry.kind == OutcomeKind::NotAttempted {
            return;
        }
        let seq = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let mut lines = vec![self.formatter.format_task_line(seq, Local::now(), entry)];
        if self.inline {
            lines.extend(self.formatter.format_inline_output(entry));
        }
        let _ = synchronized_print_lines(lines.iter().map(String::as_str));
    }
}

/// A single progress bar advanced as sessions complete.
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new(host_count: usize) -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| anyhow::anyhow!("Failed to create progress bar template: {e}"))?
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷ ")
            .progress_chars("=> ");
        let bar = ProgressBar::new(host_count as u64);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_RATE_MS));
        Ok(Self { bar })
    }
}

impl RunObserver for ProgressDisplay {
    fn session_started(&self, host: &HostRecord, _index: usize) {
        self.bar.set_message(host.pretty());
    }

    fn session_finished(&self, entry: &ResultEntry) {
        self.bar.inc(1);
        if !entry.is_success() {
            self.bar
                .println(format!("{} {}", entry.host.pretty(), entry.reason().unwrap_or_default()));
        }
    }

    fn run_finished(&self, _results: &ResultSet) {
        self.bar.finish_and_clear();
    }
}

/// Consumer of a finished result set.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn consume(&self, results: &ResultSet) -> Result<()>;
}

/// Renders the end-of-run console output.
pub struct ConsoleSink {
    formatter: OutputFormatter,
    /// Print totals and the failure breakdown.
    pub summary: bool,
    /// Print every host's captured output (used when it was not shown live).
    pub inline_output: bool,
}

impl ConsoleSink {
    pub fn new(formatter: OutputFormatter) -> Self {
        Self {
            formatter,
            summary: false,
            inline_output: false,
        }
    }

    pub fn render(&self, results: &ResultSet) -> Vec<String> {
        let mut lines = Vec::new();
        if self.inline_output {
            for entry in results {
                lines.push(self.formatter.paint(&entry.host.pretty(), |t| t.bold().to_string()));
                lines.extend(self.formatter.format_inline_output(entry));
            }
        }
        if self.summary {
            lines.push(self.formatter.format_summary(&results.summary()));
            lines.extend(self.formatter.format_failures(results));
        }
        lines
    }
}

#[async_trait]
impl ResultSink for ConsoleSink {
    async fn consume(&self, results: &ResultSet) -> Result<()> {
        let lines = self.render(results);
        if !lines.is_empty() {
            synchronized_print_lines(lines.iter().map(String::as_str))?;
        }
        Ok(())
    }
}
