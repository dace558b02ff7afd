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

//! Admission control for concurrently active sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ConfigError;

/// Bounds the number of simultaneously active sessions.
///
/// Admission is FIFO: tokio's semaphore serves waiters in request order.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Create a limiter for a run over `host_count` hosts.
    ///
    /// `None` means unbounded up to the host count. Zero is rejected.
    pub fn new(max_parallel: Option<usize>, host_count: usize) -> Result<Self, ConfigError> {
        let limit = match max_parallel {
            Some(0) => return Err(ConfigError::InvalidParallelism(0)),
            Some(n) => n.min(host_count.max(1)),
            None => host_count.max(1),
        }
        .min(Semaphore::MAX_PERMITS);

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Wait until fewer than `limit` sessions are active, then admit one more.
    ///
    /// Returns `None` once the limiter has been closed.
    pub async fn admit(&self) -> Option<Admission> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        tracing::trace!("Admitted session ({now_active}/{} active)", self.limit);
        Some(Admission {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Stop admitting. Pending and future `admit` calls return `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sessions currently holding an admission.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held admissions so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// One admitted slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
