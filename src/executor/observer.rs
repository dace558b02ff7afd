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

//! Hooks for watching a run while it is in flight.
//!
//! Observers only see notifications. The result set itself is handed out once,
//! after the run is over.

use super::result::{ResultEntry, ResultSet};
use crate::host::HostRecord;

pub trait RunObserver: Send + Sync {
    /// A session was admitted and its subprocess spawned.
    fn session_started(&self, _host: &HostRecord, _index: usize) {}

    /// A session reached a terminal state.
    fn session_finished(&self, _entry: &ResultEntry) {}

    /// Every host has a result.
    fn run_finished(&self, _results: &ResultSet) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Fan notifications out to several observers in order.
#[derive(Default)]
pub struct ObserverChain {
    observers: Vec<std::sync::Arc<dyn RunObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: std::sync::Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl RunObserver for ObserverChain {
    fn session_started(&self, host: &HostRecord, index: usize) {
        for o in &self.observers {
            o.session_started(host, index);
        }
    }

    fn session_finished(&self, entry: &ResultEntry) {
        for o in &self.observers {
            o.session_finished(entry);
        }
    }

    fn run_finished(&self, results: &ResultSet) {
        for o in &self.observers {
            o.run_finished(results);
        }
    }
}
