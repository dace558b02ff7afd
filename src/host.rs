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

//! Host records and host list resolution.
//!
//! A [`HostRecord`] is the resolved identity of one remote target. Records are
//! produced once, from `-H` strings, host files or configuration groups, and
//! are read-only afterwards.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// Host files larger than this are rejected outright.
const MAX_HOST_FILE_SIZE: u64 = 1024 * 1024;

/// Resolved identity of one remote target.
///
/// Equality is by `(hostname, port, user)`; the alias is display-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl HostRecord {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: None,
            user: None,
            alias: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Parse a host string.
    ///
    /// Accepted forms:
    /// - `host`
    /// - `host:port`
    /// - `user@host`
    /// - `user@host:port`
    /// - `[v6addr]` / `[v6addr]:port` (optionally with `user@`)
    pub fn parse(input: &str, default_user: Option<&str>) -> Result<Self, ConfigError> {
        let input = input.trim();
        let parse_err = |reason: &str| ConfigError::HostParse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(parse_err("empty host string"));
        }

        let (user, rest) = match input.rfind('@') {
            Some(at_pos) => {
                let user = &input[..at_pos];
                if user.is_empty() {
                    return Err(parse_err("empty user before '@'"));
                }
                (Some(user), &input[at_pos + 1..])
            }
            None => (None, input),
        };

        let (hostname, port_str) = if let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| parse_err("unclosed '[' in IPv6 address"))?;
            let host = &stripped[..close];
            let tail = &stripped[close + 1..];
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(parse_err("unexpected characters after IPv6 address")),
            }
        } else if rest.matches(':').count() > 1 {
            // Bare IPv6 literal without brackets; no port possible
            (rest, None)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if hostname.is_empty() {
            return Err(parse_err("empty hostname"));
        }
        if hostname.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(parse_err("hostname contains invalid characters"));
        }

        let port = match port_str {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| parse_err("invalid port number"))?,
            ),
            None => None,
        };

        Ok(HostRecord {
            hostname: hostname.to_string(),
            port,
            user: user.or(default_user).map(str::to_string),
            alias: None,
        })
    }

    /// Uniqueness key of this target.
    pub fn identity(&self) -> (&str, Option<u16>, Option<&str>) {
        (&self.hostname, self.port, self.user.as_deref())
    }

    /// `[user@]host` destination form understood by ssh.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// `[user@]host:path` form understood by scp and rsync.
    ///
    /// IPv6 literals are bracketed so the path separator stays unambiguous.
    pub fn remote_path(&self, path: &str) -> String {
        let host = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        match &self.user {
            Some(user) => format!("{user}@{host}:{path}"),
            None => format!("{host}:{path}"),
        }
    }

    /// `[user@]host[:port]` string that parses back to this record.
    pub fn spec(&self) -> String {
        let mut out = String::new();
        if let Some(user) = &self.user {
            out.push_str(user);
            out.push('@');
        }
        match (self.hostname.contains(':'), self.port) {
            (true, Some(port)) => out.push_str(&format!("[{}]:{port}", self.hostname)),
            (false, Some(port)) => out.push_str(&format!("{}:{port}", self.hostname)),
            (_, None) => out.push_str(&self.hostname),
        }
        out
    }

    /// Label used in reports: `host` or `host:port`.
    pub fn pretty(&self) -> String {
        let name = self.alias.as_deref().unwrap_or(&self.hostname);
        match self.port {
            Some(port) => format!("{name}:{port}"),
            None => name.to_string(),
        }
    }

    /// Deterministic file-name stem derived from the full host identity.
    ///
    /// Hosts sharing a hostname but differing in user or port get different stems.
    pub fn output_stem(&self) -> String {
        let mut stem = String::new();
        if let Some(user) = &self.user {
            stem.push_str(user);
            stem.push('@');
        }
        stem.push_str(&self.hostname);
        if let Some(port) = self.port {
            stem.push('_');
            stem.push_str(&port.to_string());
        }
        stem.replace(['/', ':', '\\'], "_")
    }
}

impl PartialEq for HostRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for HostRecord {}

impl fmt::Display for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.pretty())
    }
}

/// Parse `-H` style host strings; each string may hold several comma- or
/// whitespace-separated hosts.
pub fn parse_host_strings(
    inputs: &[String],
    default_user: Option<&str>,
) -> Result<Vec<HostRecord>, ConfigError> {
    inputs
        .iter()
        .flat_map(|s| s.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|s| !s.is_empty())
        .map(|s| HostRecord::parse(s, default_user))
        .collect()
}

/// Parse the contents of a host file.
///
/// Each non-empty, non-comment line is `[user@]host[:port] [user]`; the optional
/// second field supplies the user when the first one does not.
pub fn parse_host_file_contents(
    content: &str,
    default_user: Option<&str>,
) -> Result<Vec<HostRecord>, ConfigError> {
    let mut hosts = Vec::new();
    for line in content.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let spec = fields.next().unwrap_or_default();
        let line_user = fields.next();
        if fields.next().is_some() {
            return Err(ConfigError::HostParse {
                input: line.to_string(),
                reason: "expected '[user@]host[:port] [user]'".to_string(),
            });
        }
        hosts.push(HostRecord::parse(spec, line_user.or(default_user))?);
    }
    Ok(hosts)
}

/// Read and parse a host file from disk.
pub fn read_host_file(path: &Path, default_user: Option<&str>) -> Result<Vec<HostRecord>, ConfigError> {
    let file_err = |reason: String| ConfigError::HostFile {
        path: path.display().to_string(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| file_err(e.to_string()))?;
    if metadata.len() > MAX_HOST_FILE_SIZE {
        return Err(file_err(format!(
            "file size {} bytes exceeds maximum allowed size of {MAX_HOST_FILE_SIZE} bytes",
            metadata.len()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
    let hosts = parse_host_file_contents(&content, default_user)?;
    tracing::debug!("Read {} hosts from {}", hosts.len(), path.display());
    Ok(hosts)
}

/// Keep only hosts whose hostname (or alias) matches `pattern`.
pub fn filter_by_regexp(hosts: Vec<HostRecord>, pattern: &Regex) -> Vec<HostRecord> {
    hosts
        .into_iter()
        .filter(|h| {
            pattern.is_match(&h.hostname)
                || h.alias.as_deref().is_some_and(|a| pattern.is_match(a))
        })
        .collect()
}

/// Randomly keep `size` hosts, preserving their submission order.
///
/// A size at or above the host count keeps every host.
pub fn sample_hosts(
    hosts: Vec<HostRecord>,
    size: usize,
    rng: &mut fastrand::Rng,
) -> Vec<HostRecord> {
    if size >= hosts.len() {
        return hosts;
    }
    let mut picked: Vec<usize> = (0..hosts.len()).collect();
    rng.shuffle(&mut picked);
    picked.truncate(size);
    picked.sort_unstable();

    let mut picked = picked.into_iter().peekable();
    hosts
        .into_iter()
        .enumerate()
        .filter_map(|(index, host)| {
            if picked.peek() == Some(&index) {
                picked.next();
                Some(host)
            } else {
                None
            }
        })
        .collect()
}

/// File stems for each host, in submission order.
///
/// The first occurrence of an identity gets the bare stem; repeats get the
/// lowest `.N` suffix no other host in the run has been given, so a repeat of
/// `node` never lands on the file of a host literally named `node.1`.
pub fn unique_output_stems(hosts: &[HostRecord]) -> Vec<String> {
    let mut issued: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    hosts
        .iter()
        .map(|host| {
            let stem = host.output_stem();
            let name = if issued.contains(&stem) {
                let suffix = next_suffix.entry(stem.clone()).or_insert(1);
                loop {
                    let candidate = format!("{stem}.{suffix}");
                    *suffix += 1;
                    if !issued.contains(&candidate) {
                        break candidate;
                    }
                }
            } else {
                stem
            };
            issued.insert(name.clone());
            name
        })
        .collect()
}
