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

//! Line-atomic terminal output shared by concurrently running sessions.

use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

static STDOUT_MUTEX: Lazy<Mutex<io::Stdout>> = Lazy::new(|| Mutex::new(io::stdout()));
static STDERR_MUTEX: Lazy<Mutex<io::Stderr>> = Lazy::new(|| Mutex::new(io::stderr()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write whole lines to stdout without interleaving with other writers.
pub fn synchronized_print_lines<'a, I>(lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stdout = lock(&STDOUT_MUTEX);
    for line in lines {
        writeln!(stdout, "{line}")?;
    }
    stdout.flush()
}

pub fn synchronized_println(text: &str) -> io::Result<()> {
    synchronized_print_lines([text])
}

/// Write whole lines to stderr without interleaving with other writers.
pub fn synchronized_eprint_lines<'a, I>(lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stderr = lock(&STDERR_MUTEX);
    for line in lines {
        writeln!(stderr, "{line}")?;
    }
    stderr.flush()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoTarget {
    Stdout,
    Stderr,
}

/// Echoes a session's output as `[host] line`, one complete line at a time.
///
/// Chunks arrive at arbitrary boundaries, so incomplete trailing data is held
/// until the next newline or [`finish`](Self::finish).
#[derive(Debug)]
pub struct NodeOutputWriter {
    prefix: String,
    target: EchoTarget,
    pending: Vec<u8>,
}

impl NodeOutputWriter {
    pub fn new(host_label: &str, target: EchoTarget) -> Self {
        Self {
            prefix: format!("[{host_label}]"),
            target,
            pending: Vec::new(),
        }
    }

    /// Buffer `chunk` and emit every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.emit(&complete)
    }

    /// Emit whatever is left without a trailing newline.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.emit(&rest)
    }

    fn emit(&self, bytes: &[u8]) -> io::Result<()> {
        let lines = self.prefixed_lines(bytes);
        match self.target {
            EchoTarget::Stdout => synchronized_print_lines(lines.iter().map(String::as_str)),
            EchoTarget::Stderr => synchronized_eprint_lines(lines.iter().map(String::as_str)),
        }
    }

    fn prefixed_lines(&self, bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(|line| format!("{} {}", self.prefix, line))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_format() {
        let writer = NodeOutputWriter::new("web1", EchoTarget::Stdout);
        assert_eq!(writer.prefix, "[web1]");
        assert_eq!(
            writer.prefixed_lines(b"a\nb\n"),
            vec!["[web1] a".to_string(), "[web1] b".to_string()]
        );
    }

    #[test]
    fn test_partial_lines_are_held() {
        let mut writer = NodeOutputWriter::new("web1", EchoTarget::Stderr);
        writer.feed(b"hel").unwrap();
        assert_eq!(writer.pending, b"hel");

        writer.feed(b"lo\nwor").unwrap();
        assert_eq!(writer.pending, b"wor");

        writer.finish().unwrap();
        assert!(writer.pending.is_empty());
    }
}
