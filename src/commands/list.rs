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

use owo_colors::OwoColorize;

use crate::config::{Config, HostEntry};
use crate::host::HostRecord;

fn entry_label(entry: &HostEntry) -> String {
    match entry {
        HostEntry::Simple(s) => s.clone(),
        HostEntry::Detailed { host, alias, .. } => match alias {
            Some(alias) => format!("{host} ({alias})"),
            None => host.clone(),
        },
    }
}

/// Print the groups defined in the configuration file.
pub fn list_groups(config: &Config, colors: bool) {
    if config.groups.is_empty() {
        println!("No host groups configured");
        return;
    }

    let mut names: Vec<&String> = config.groups.keys().collect();
    names.sort();
    for name in names {
        let group = &config.groups[name];
        let count = group.hosts.len();
        let noun = if count == 1 { "host" } else { "hosts" };
        if colors {
            println!("{} {} ({} {noun})", "●".blue(), name.bold(), count.yellow());
        } else {
            println!("{name} ({count} {noun})");
        }
        for entry in &group.hosts {
            println!("    {}", entry_label(entry));
        }
    }
}

/// Print resolved hosts in host-file format.
pub fn list_hosts(hosts: &[HostRecord]) {
    for host in hosts {
        println!("{}", host.spec());
    }
}
