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

//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Named host groups, selected with `--group`.
    #[serde(default)]
    pub groups: HashMap<String, Group>,
}

/// Global default settings.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Defaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub parallel: Option<usize>,
    /// Per-session timeout in seconds; 0 disables it.
    pub timeout: Option<u64>,
    /// Whole-run deadline in seconds; 0 disables it.
    pub global_timeout: Option<u64>,
    /// Extra `-o` options passed to every ssh/scp/rsync invocation.
    #[serde(default)]
    pub ssh_options: Vec<String>,
    pub identity: Option<String>,
    pub outdir: Option<String>,
    pub errdir: Option<String>,
    pub ok_exit_codes: Option<Vec<i32>>,
}

/// A named set of hosts with optional overrides.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    pub hosts: Vec<HostEntry>,

    #[serde(flatten)]
    pub defaults: GroupDefaults,
}

/// Group-specific settings that win over [`Defaults`].
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct GroupDefaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub parallel: Option<usize>,
    pub timeout: Option<u64>,
}

/// Host entry within a group.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum HostEntry {
    /// `[user@]host[:port]`
    Simple(String),
    Detailed {
        host: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        alias: Option<String>,
    },
}
