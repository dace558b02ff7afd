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

//! Configuration loading and priority management.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use super::types::{Config, HostEntry};
use super::utils::expand_tilde;
use crate::error::ConfigError;
use crate::host::HostRecord;

const CONFIG_FILE_NAME: &str = "config.yaml";

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        let content = fs::read_to_string(&expanded_path).await.with_context(|| {
            format!(
                "Failed to read configuration file at {}",
                expanded_path.display()
            )
        })?;
        Self::from_yaml(&content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}",
                expanded_path.display()
            )
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration with priority order:
    /// 1. Explicit `--config` path (must exist)
    /// 2. `$XDG_CONFIG_HOME/fanout/config.yaml`
    /// 3. The platform config directory (`~/.config/fanout/config.yaml` on Linux)
    ///
    /// No file at all yields the default configuration.
    pub async fn load_with_priority(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!("Using explicitly specified config file: {:?}", path);
            return Self::load(path).await;
        }

        for candidate in Self::standard_locations() {
            if candidate.exists() {
                tracing::debug!("Found config at {:?}", candidate);
                return Self::load(&candidate).await;
            }
        }

        tracing::debug!("No config file found, using default empty configuration");
        Ok(Self::default())
    }

    fn standard_locations() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
            if !xdg_config_home.is_empty() {
                paths.push(
                    PathBuf::from(xdg_config_home)
                        .join("fanout")
                        .join(CONFIG_FILE_NAME),
                );
            }
        }
        if let Some(proj_dirs) = ProjectDirs::from("", "", "fanout") {
            paths.push(proj_dirs.config_dir().join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Hosts of a named group, with user/port defaults applied.
    ///
    /// Hosts that name no user get `user_override` first, then the group's
    /// user, then the global default.
    pub fn group_hosts(
        &self,
        name: &str,
        user_override: Option<&str>,
    ) -> Result<Vec<HostRecord>, ConfigError> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| ConfigError::UnknownGroup(name.to_string()))?;
        let default_user = user_override
            .or(group.defaults.user.as_deref())
            .or(self.defaults.user.as_deref());
        let default_port = group.defaults.port.or(self.defaults.port);

        group
            .hosts
            .iter()
            .map(|entry| {
                let mut host = match entry {
                    HostEntry::Simple(spec) => HostRecord::parse(spec, default_user)?,
                    HostEntry::Detailed {
                        host,
                        user,
                        port,
                        alias,
                    } => {
                        let mut record =
                            HostRecord::parse(host, user.as_deref().or(default_user))?;
                        if let Some(port) = port {
                            record.port = Some(*port);
                        }
                        record.alias = alias.clone();
                        record
                    }
                };
                if host.port.is_none() {
                    host.port = default_port;
                }
                Ok(host)
            })
            .collect()
    }

    /// Parallelism for a run, group setting first.
    pub fn get_parallel(&self, group: Option<&str>) -> Option<usize> {
        group
            .and_then(|g| self.groups.get(g))
            .and_then(|g| g.defaults.parallel)
            .or(self.defaults.parallel)
    }

    /// Per-session timeout for a run, group setting first.
    pub fn get_timeout(&self, group: Option<&str>) -> Option<u64> {
        group
            .and_then(|g| self.groups.get(g))
            .and_then(|g| g.defaults.timeout)
            .or(self.defaults.timeout)
    }

    pub fn get_global_timeout(&self) -> Option<Duration> {
        self.defaults
            .global_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Default user for command-line hosts, group setting first.
    pub fn get_user(&self, group: Option<&str>) -> Option<String> {
        group
            .and_then(|g| self.groups.get(g))
            .and_then(|g| g.defaults.user.clone())
            .or_else(|| self.defaults.user.clone())
    }
}
