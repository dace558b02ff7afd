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

//! Session supervisor: drives one host's subprocess from spawn to a terminal
//! outcome.
//!
//! ```text
//! Pending ──spawn ok──> Running ──exit, accepted code──> Succeeded
//!    │                     ├─────exit, other code──────> Failed
//!    │                     └─────timeout / cancel──────> TimedOut
//!    └──launch error──────────────────────────────────> Errored
//! ```
//!
//! Each state is entered at most once and the resolved entry is produced
//! exactly once, when [`SessionSupervisor::run`] returns.

use chrono::Local;
use once_cell::sync::OnceCell;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::capture::StreamCapture;
use super::launcher::{LaunchContext, SessionLauncher};
use super::limiter::Admission;
use super::observer::RunObserver;
use super::operation::OperationDescriptor;
use super::output_sync::EchoTarget;
use super::result::{OutcomeKind, ResultEntry, TimeoutScope};
use crate::host::HostRecord;

/// Run-wide cancellation shared by the coordinator and every supervisor.
///
/// The first cause recorded wins, so a run deadline that fires after an
/// interrupt is still reported as an interrupt.
#[derive(Debug, Clone, Default)]
pub struct RunCancellation {
    token: CancellationToken,
    cause: Arc<OnceCell<TimeoutScope>>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, cause: TimeoutScope) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cause(&self) -> TimeoutScope {
        self.cause.get().copied().unwrap_or(TimeoutScope::Run)
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Per-session knobs that come from the run configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Time between SIGTERM and SIGKILL when forcing a session down.
    pub termination_grace: Duration,
    /// In-memory cap per captured stream.
    pub capture_limit: usize,
    /// Echo output to the terminal as it arrives.
    pub echo: bool,
}

/// State shared by all supervisors of one run.
pub struct RunShared {
    pub descriptor: Arc<OperationDescriptor>,
    pub launcher: Arc<dyn SessionLauncher>,
    pub observer: Arc<dyn RunObserver>,
    pub settings: SessionSettings,
    pub cancel: RunCancellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Running,
    Resolved(OutcomeKind),
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Forced(TimeoutScope),
}

/// How a resolved session ended, before it is turned into a [`ResultEntry`].
struct Resolution {
    kind: OutcomeKind,
    timeout_scope: Option<TimeoutScope>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    error: Option<String>,
    transport_failure: bool,
}

impl Resolution {
    fn new(kind: OutcomeKind) -> Self {
        Self {
            kind,
            timeout_scope: None,
            exit_code: None,
            signal: None,
            error: None,
            transport_failure: false,
        }
    }
}

pub struct SessionSupervisor {
    host: HostRecord,
    index: usize,
    stem: String,
    shared: Arc<RunShared>,
    state: SessionState,
}

impl SessionSupervisor {
    pub fn new(host: HostRecord, index: usize, stem: String, shared: Arc<RunShared>) -> Self {
        Self {
            host,
            index,
            stem,
            shared,
            state: SessionState::Pending,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(host = %self.host, "Session {:?} -> {:?}", self.state, next);
        debug_assert!(
            matches!(
                (self.state, next),
                (SessionState::Pending, SessionState::Running)
                    | (SessionState::Pending, SessionState::Resolved(_))
                    | (SessionState::Running, SessionState::Resolved(_))
            ),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Drive the session to completion. `admission` is held until the
    /// subprocess has been reaped and observers have seen the result.
    pub async fn run(mut self, admission: Admission) -> ResultEntry {
        let started_at = Local::now();
        let start = Instant::now();
        let shared = Arc::clone(&self.shared);
        let options = &shared.descriptor.options;
        let settings = shared.settings;

        let stdout = StreamCapture::new(
            settings.capture_limit,
            options.outdir.as_ref().map(|dir| dir.join(&self.stem)),
        );
        let stderr = StreamCapture::new(
            settings.capture_limit,
            options.errdir.as_ref().map(|dir| dir.join(&self.stem)),
        );

        let ctx = LaunchContext {
            host: &self.host,
            index: self.index,
            stem: &self.stem,
            descriptor: &shared.descriptor,
        };
        let mut command = match shared.launcher.build_command(&ctx).await {
            Ok(command) => command,
            Err(e) => {
                let mut resolution = Resolution::new(OutcomeKind::Errored);
                resolution.error = Some(format!("{e:#}"));
                return self.finish(resolution, started_at, start, (&stdout, &stderr), admission);
            }
        };

        command
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(host = %self.host, "Failed to spawn {}: {e}", shared.launcher.name());
                let mut resolution = Resolution::new(OutcomeKind::Errored);
                resolution.error = Some(format!("failed to start {}: {e}", shared.launcher.name()));
                return self.finish(resolution, started_at, start, (&stdout, &stderr), admission);
            }
        };

        // session timeout counts from spawn
        let deadline = options.timeout.map(|t| Instant::now() + t);
        self.transition(SessionState::Running);
        tracing::debug!(host = %self.host, pid = ?child.id(), "Session running");
        shared.observer.session_started(&self.host, self.index);

        let label = self.host.pretty();
        let echo = |target| settings.echo.then(|| (label.clone(), target));
        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            pumps.push(stdout.spawn_pump(out, echo(EchoTarget::Stdout)));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(stderr.spawn_pump(err, echo(EchoTarget::Stderr)));
        }
        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), options.stdin.clone()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!("Stdin closed early: {e}");
                }
            });
        }

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = sleep_until_deadline(deadline) => Waited::Forced(TimeoutScope::Session),
            _ = shared.cancel.cancelled() => Waited::Forced(shared.cancel.cause()),
        };

        let resolution = match waited {
            Waited::Exited(Ok(status)) => self.classify(status),
            Waited::Exited(Err(e)) => {
                let mut resolution = Resolution::new(OutcomeKind::Errored);
                resolution.error = Some(format!("failed to wait for process: {e}"));
                resolution
            }
            Waited::Forced(scope) => match terminate(&mut child, settings.termination_grace).await
            {
                Termination::AlreadyExited(status) => self.classify(status),
                Termination::Terminated(status) => {
                    tracing::warn!(host = %self.host, "Session terminated: {scope}");
                    let mut resolution = Resolution::new(OutcomeKind::TimedOut);
                    resolution.timeout_scope = Some(scope);
                    resolution.signal = status.and_then(exit_signal);
                    resolution
                }
            },
        };

        drain_pumps(pumps, settings.termination_grace).await;
        drop(child);
        self.finish(resolution, started_at, start, (&stdout, &stderr), admission)
    }

    fn classify(&self, status: ExitStatus) -> Resolution {
        let options = &self.shared.descriptor.options;
        match status.code() {
            Some(code) if options.is_accepted(code) => {
                let mut resolution = Resolution::new(OutcomeKind::Succeeded);
                resolution.exit_code = Some(code);
                resolution
            }
            Some(code) => {
                let mut resolution = Resolution::new(OutcomeKind::Failed);
                resolution.exit_code = Some(code);
                resolution.transport_failure = self
                    .shared
                    .launcher
                    .is_transport_failure(&self.shared.descriptor.operation, code);
                resolution
            }
            None => {
                let mut resolution = Resolution::new(OutcomeKind::Failed);
                resolution.signal = exit_signal(status);
                resolution
            }
        }
    }

    fn finish(
        mut self,
        resolution: Resolution,
        started_at: chrono::DateTime<Local>,
        start: Instant,
        (stdout, stderr): (&StreamCapture, &StreamCapture),
        admission: Admission,
    ) -> ResultEntry {
        self.transition(SessionState::Resolved(resolution.kind));
        let entry = ResultEntry {
            host: self.host,
            index: self.index,
            kind: resolution.kind,
            timeout_scope: resolution.timeout_scope,
            exit_code: resolution.exit_code,
            signal: resolution.signal,
            error: resolution.error,
            transport_failure: resolution.transport_failure,
            started_at: Some(started_at),
            elapsed: start.elapsed(),
            stdout: stdout.snapshot(),
            stderr: stderr.snapshot(),
        };
        tracing::debug!(
            host = %entry.host,
            "Session resolved as {} after {:.2}s",
            entry.kind,
            entry.elapsed.as_secs_f64()
        );
        self.shared.observer.session_finished(&entry);
        drop(admission);
        entry
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Termination {
    /// The process had exited on its own before any signal was sent.
    AlreadyExited(ExitStatus),
    Terminated(Option<ExitStatus>),
}

/// Force a session's process group down: SIGTERM, then SIGKILL after `grace`.
///
/// Safe to call on a process that already exited. The child is only reaped
/// through this handle, so its pid cannot be reused while `child.id()` is
/// still `Some`.
async fn terminate(child: &mut Child, grace: Duration) -> Termination {
    if let Ok(Some(status)) = child.try_wait() {
        return Termination::AlreadyExited(status);
    }

    signal_group(child, Signal::Term);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return Termination::Terminated(Some(status)),
        Ok(Err(e)) => tracing::debug!("Wait after SIGTERM failed: {e}"),
        Err(_) => tracing::warn!(
            "Process did not exit within {:.1}s of SIGTERM; sending SIGKILL",
            grace.as_secs_f64()
        ),
    }

    signal_group(child, Signal::Kill);
    let _ = child.kill().await;
    Termination::Terminated(child.try_wait().ok().flatten())
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal) {
    if let Some(pid) = child.id() {
        let sig = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: the child leads its own process group and has not been reaped.
        unsafe {
            libc::kill(-(pid as i32), sig);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Wait for the output pumps to hit EOF. Descendants that escaped the process
/// group may hold the pipes open, so the wait is bounded.
async fn drain_pumps(pumps: Vec<JoinHandle<()>>, limit: Duration) {
    let aborts: Vec<_> = pumps.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(limit, futures::future::join_all(pumps))
        .await
        .is_err()
    {
        tracing::debug!("Output streams still open after exit; keeping what was captured");
        for abort in aborts {
            abort.abort();
        }
    }
}
