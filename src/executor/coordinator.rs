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

//! Run coordinator: dispatches one session per host under the concurrency
//! limit and assembles the ordered result set.

use futures::future::join_all;
use std::future::Future;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::capture::DEFAULT_CAPTURE_LIMIT;
use super::launcher::SessionLauncher;
use super::limiter::ConcurrencyLimiter;
use super::observer::{NoopObserver, RunObserver};
use super::operation::OperationDescriptor;
use super::result::{ResultEntry, ResultSet, RunSummary, TimeoutScope};
use super::session::{RunCancellation, RunShared, SessionSettings, SessionSupervisor};
use crate::error::ConfigError;
use crate::host::{unique_output_stems, HostRecord};

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Extra time granted to supervisors after the grace period before their
/// tasks are abandoned.
const SETTLE_MARGIN: Duration = Duration::from_secs(1);

/// Run-level configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum simultaneously active sessions; `None` means one per host.
    pub max_parallel: Option<usize>,
    /// Deadline for the whole run; `None` or zero disables it.
    pub global_timeout: Option<Duration>,
    pub termination_grace: Duration,
    /// In-memory cap per captured stream.
    pub capture_limit: usize,
    /// Echo host output live with `[host]` prefixes.
    pub echo: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            global_timeout: None,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            echo: false,
        }
    }
}

impl RunConfig {
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.global_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

pub struct RunCoordinator {
    config: RunConfig,
    launcher: Arc<dyn SessionLauncher>,
    observer: Arc<dyn RunObserver>,
}

impl RunCoordinator {
    pub fn new(config: RunConfig, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            config,
            launcher,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run `descriptor` against every host and return one entry per host, in
    /// submission order.
    ///
    /// Only configuration problems are returned as errors, and always before
    /// any subprocess is started.
    pub async fn run(
        &self,
        hosts: &[HostRecord],
        descriptor: OperationDescriptor,
    ) -> Result<ResultSet, ConfigError> {
        self.run_until_cancelled(hosts, descriptor, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but cancelling `interrupt` ends the run early.
    /// Running sessions are terminated and unstarted hosts are reported as not
    /// attempted.
    pub async fn run_until_cancelled(
        &self,
        hosts: &[HostRecord],
        descriptor: OperationDescriptor,
        interrupt: CancellationToken,
    ) -> Result<ResultSet, ConfigError> {
        self.run_staged(hosts, descriptor, interrupt, hosts.len(), |_| {
            std::future::ready(true)
        })
        .await
    }

    /// Run the first `first_batch` hosts, then ask `proceed` whether to run
    /// the rest.
    ///
    /// Each batch gets its own run deadline. Indexes and output file names
    /// are assigned over the whole host list, so the result set reads as one
    /// run. When `proceed` declines, or `interrupt` is cancelled during the
    /// pause, the remaining hosts are not attempted
    /// ([`TimeoutScope::Interrupted`]). A `first_batch` of zero or at least
    /// the host count runs everything in one batch.
    pub async fn run_staged<F, Fut>(
        &self,
        hosts: &[HostRecord],
        descriptor: OperationDescriptor,
        interrupt: CancellationToken,
        first_batch: usize,
        proceed: F,
    ) -> Result<ResultSet, ConfigError>
    where
        F: FnOnce(RunSummary) -> Fut,
        Fut: Future<Output = bool>,
    {
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostList);
        }
        let limit = ConcurrencyLimiter::new(self.config.max_parallel, hosts.len())?.limit();
        descriptor.validate()?;
        prepare_output_dir(descriptor.options.outdir.as_deref()).await?;
        prepare_output_dir(descriptor.options.errdir.as_deref()).await?;

        tracing::info!(
            "Starting {} on {} host(s) with parallelism {}",
            descriptor.operation.kind_name(),
            hosts.len(),
            limit
        );

        let stems = unique_output_stems(hosts);
        let descriptor = Arc::new(descriptor);
        let split = match first_batch {
            0 => hosts.len(),
            n => n.min(hosts.len()),
        };

        let (mut entries, mut peak) = self
            .run_batch(hosts, &stems, 0..split, &descriptor, &interrupt)
            .await?;

        if split < hosts.len() {
            let summary = RunSummary::from_entries(&entries);
            let resume = tokio::select! {
                answer = proceed(summary) => answer && !interrupt.is_cancelled(),
                _ = interrupt.cancelled() => false,
            };
            if resume {
                let (rest, rest_peak) = self
                    .run_batch(hosts, &stems, split..hosts.len(), &descriptor, &interrupt)
                    .await?;
                entries.extend(rest);
                peak = peak.max(rest_peak);
            } else {
                tracing::warn!("Run stopped after {split} of {} hosts", hosts.len());
                for (index, host) in hosts.iter().enumerate().skip(split) {
                    let entry =
                        ResultEntry::not_attempted(host.clone(), index, TimeoutScope::Interrupted);
                    self.observer.session_finished(&entry);
                    entries.push(entry);
                }
            }
        }

        let results = ResultSet::from_ordered(entries);
        let summary = results.summary();
        tracing::info!(
            "Run finished: {} succeeded, {} failed, {} timed out, {} errored, {} not attempted (peak {} active)",
            summary.succeeded,
            summary.failed,
            summary.timed_out,
            summary.errored,
            summary.not_attempted,
            peak
        );
        self.observer.run_finished(&results);
        Ok(results)
    }

    /// Dispatch `hosts[range]` under a fresh limiter and run deadline.
    /// Returns their entries in order and the peak number of active sessions.
    async fn run_batch(
        &self,
        hosts: &[HostRecord],
        stems: &[String],
        range: Range<usize>,
        descriptor: &Arc<OperationDescriptor>,
        interrupt: &CancellationToken,
    ) -> Result<(Vec<ResultEntry>, usize), ConfigError> {
        let limiter = ConcurrencyLimiter::new(self.config.max_parallel, range.len())?;
        let cancel = RunCancellation::new();
        let shared = Arc::new(RunShared {
            descriptor: Arc::clone(descriptor),
            launcher: Arc::clone(&self.launcher),
            observer: Arc::clone(&self.observer),
            settings: SessionSettings {
                termination_grace: self.config.termination_grace,
                capture_limit: self.config.capture_limit,
                echo: self.config.echo,
            },
            cancel: cancel.clone(),
        });

        let deadline = self
            .config
            .global_timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        let watcher = spawn_watcher(deadline, interrupt.clone(), cancel.clone(), limiter.clone());

        let mut handles: Vec<Option<JoinHandle<ResultEntry>>> = range.clone().map(|_| None).collect();
        for (slot, index) in range.clone().enumerate() {
            let host = &hosts[index];
            let admission = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                admission = limiter.admit() => admission,
            };
            let Some(admission) = admission else {
                tracing::debug!("Dispatch stopped at host {index} of {}", hosts.len());
                break;
            };

            tracing::debug!(host = %host, "Dispatching session {index}");
            let supervisor =
                SessionSupervisor::new(host.clone(), index, stems[index].clone(), Arc::clone(&shared));
            handles[slot] = Some(tokio::spawn(supervisor.run(admission)));
        }

        let aborts: Vec<_> = handles
            .iter()
            .flatten()
            .map(JoinHandle::abort_handle)
            .collect();
        let joined = join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Some(handle) => Some(handle.await),
                None => None,
            }
        }));
        tokio::pin!(joined);

        let outcomes = tokio::select! {
            outcomes = &mut joined => outcomes,
            _ = cancel.cancelled() => {
                let settle = self.config.termination_grace + SETTLE_MARGIN;
                match tokio::time::timeout(settle, &mut joined).await {
                    Ok(outcomes) => outcomes,
                    Err(_) => {
                        tracing::warn!(
                            "Sessions did not settle within {:.1}s; abandoning them",
                            settle.as_secs_f64()
                        );
                        for abort in &aborts {
                            abort.abort();
                        }
                        joined.await
                    }
                }
            }
        };
        watcher.abort();

        let scope = cancel.cause();
        let entries = range
            .zip(outcomes)
            .map(|(index, outcome)| {
                let host = &hosts[index];
                let synthesized = match outcome {
                    Some(Ok(entry)) => return entry,
                    Some(Err(e)) if e.is_cancelled() => {
                        ResultEntry::abandoned(host.clone(), index, scope)
                    }
                    Some(Err(e)) => {
                        tracing::error!(host = %host, "Session task failed: {e}");
                        ResultEntry::errored(host.clone(), index, format!("session task failed: {e}"))
                    }
                    None => ResultEntry::not_attempted(host.clone(), index, scope),
                };
                self.observer.session_finished(&synthesized);
                synthesized
            })
            .collect();
        Ok((entries, limiter.peak()))
    }
}

/// Cancel the run when the deadline passes or the caller interrupts it.
fn spawn_watcher(
    deadline: Option<Instant>,
    interrupt: CancellationToken,
    cancel: RunCancellation,
    limiter: ConcurrencyLimiter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let scope = tokio::select! {
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => TimeoutScope::Run,
            _ = interrupt.cancelled() => TimeoutScope::Interrupted,
        };
        tracing::warn!("Run cancelled: {scope}");
        cancel.cancel(scope);
        limiter.close();
    })
}

async fn prepare_output_dir(dir: Option<&Path>) -> Result<(), ConfigError> {
    let Some(dir) = dir else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConfigError::OutputDirectory {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|e| ConfigError::OutputDirectory {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
    if metadata.permissions().readonly() {
        return Err(ConfigError::OutputDirectory {
            path: dir.display().to_string(),
            reason: "directory is read-only".to_string(),
        });
    }
    Ok(())
}
