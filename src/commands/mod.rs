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

//! One driver per subcommand, plus the plumbing they share: resolving
//! hosts and settings from the command line and the configuration file, and
//! running a descriptor through the coordinator with console reporting.

pub mod download;
pub mod exec;
pub mod kill;
pub mod list;
pub mod sync;
pub mod upload;

use anyhow::Result;
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, OutputArgs, RunArgs, TargetArgs, Transport};
use crate::config::{expand_tilde, Config};
use crate::error::ConfigError;
use crate::executor::{
    is_tty, should_use_colors, ExitCodeStrategy, ObserverChain, OperationDescriptor, OutputMode,
    RunConfig, RunCoordinator, RunSummary, SessionLauncher, SessionOptions,
    DEFAULT_TERMINATION_GRACE,
};
use crate::host::{filter_by_regexp, parse_host_strings, read_host_file, sample_hosts, HostRecord};
use crate::transport::{LocalLauncher, SshLauncher};
use crate::ui::{ConsoleSink, OutputFormatter, ProgressDisplay, ResultSink, TaskReporter};
use crate::utils::{HostListSink, JsonReportSink};

/// Concurrent sessions when nothing else says otherwise.
pub const DEFAULT_PARALLEL: usize = 32;

/// Collect target hosts from `-H`, host files and `--group`, in that order,
/// then apply `--host-regexp` and `--sample-size`.
pub fn resolve_hosts(
    targets: &TargetArgs,
    config: &Config,
) -> Result<Vec<HostRecord>, ConfigError> {
    let group = targets.group.as_deref();
    let default_user = targets.user.clone().or_else(|| config.get_user(group));

    let mut hosts = parse_host_strings(&targets.hosts, default_user.as_deref())?;
    for path in &targets.host_files {
        hosts.extend(read_host_file(&expand_tilde(path), default_user.as_deref())?);
    }
    if let Some(name) = group {
        hosts.extend(config.group_hosts(name, targets.user.as_deref())?);
    }

    if let Some(pattern) = &targets.host_regexp {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidHostPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        let before = hosts.len();
        hosts = filter_by_regexp(hosts, &regex);
        tracing::debug!("Host pattern kept {} of {} hosts", hosts.len(), before);
    }

    if let Some(size) = targets.sample_size {
        let before = hosts.len();
        hosts = sample_hosts(hosts, size, &mut fastrand::Rng::new());
        tracing::debug!("Sampled {} of {} hosts", hosts.len(), before);
    }
    Ok(hosts)
}

/// `-X` arguments followed by the words of every `-x` string.
pub fn extra_args(run: &RunArgs) -> Result<Vec<String>, ConfigError> {
    let mut args = run.extra_args.clone();
    for line in &run.extra_arg_lines {
        let words = shell_words::split(line).map_err(|e| ConfigError::InvalidExtraArgs {
            input: line.clone(),
            reason: e.to_string(),
        })?;
        args.extend(words);
    }
    Ok(args)
}

/// How results are presented and persisted.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub mode: OutputMode,
    pub summary: bool,
    pub inline: bool,
    pub fork_hosts: Option<PathBuf>,
    pub json_report: Option<PathBuf>,
    pub exit_strategy: ExitCodeStrategy,
    pub colors: bool,
}

impl ReportSettings {
    pub fn from_args(output: &OutputArgs) -> Self {
        Self {
            mode: OutputMode::from_args(output.progress, output.print),
            summary: output.summary,
            inline: output.inline,
            fork_hosts: output.fork_hosts.clone(),
            json_report: output.json_report.clone(),
            exit_strategy: if output.simple_exit_code {
                ExitCodeStrategy::RequireAllSuccess
            } else {
                ExitCodeStrategy::Detailed
            },
            colors: should_use_colors(),
        }
    }
}

/// Everything needed to run one operation, resolved from the command line,
/// the environment and the configuration file.
pub struct RunParams {
    pub hosts: Vec<HostRecord>,
    pub run_config: RunConfig,
    pub options: SessionOptions,
    pub launcher: Arc<dyn SessionLauncher>,
    pub report: ReportSettings,
    /// Hosts to run before pausing for confirmation.
    pub canary: Option<usize>,
}

impl RunParams {
    /// Apply precedence: command line (and its environment variables), then the
    /// selected group, then configuration defaults, then built-in defaults.
    pub fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let hosts = resolve_hosts(&cli.targets, config)?;
        let group = cli.targets.group.as_deref();
        let defaults = &config.defaults;

        let parallel = cli
            .run
            .parallel
            .or_else(|| config.get_parallel(group))
            .unwrap_or(DEFAULT_PARALLEL);
        let timeout = cli
            .run
            .timeout
            .or_else(|| config.get_timeout(group))
            .unwrap_or(0);
        let global_timeout = match cli.run.global_timeout {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => config.get_global_timeout(),
        };
        let grace = cli
            .run
            .grace
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TERMINATION_GRACE);

        let outdir = cli
            .output
            .outdir
            .clone()
            .or_else(|| defaults.outdir.as_ref().map(PathBuf::from))
            .map(|p| expand_tilde(&p));
        let errdir = cli
            .output
            .errdir
            .clone()
            .or_else(|| defaults.errdir.as_ref().map(PathBuf::from))
            .map(|p| expand_tilde(&p));
        let ok_exit_codes = cli
            .run
            .ok_exit_codes
            .clone()
            .or_else(|| defaults.ok_exit_codes.clone())
            .unwrap_or_else(|| vec![0]);

        let report = ReportSettings::from_args(&cli.output);

        let run_config = RunConfig::default()
            .with_max_parallel(Some(parallel))
            .with_global_timeout(global_timeout)
            .with_termination_grace(grace)
            .with_echo(report.mode.is_stream());

        let options = SessionOptions::default()
            .with_timeout_secs(timeout)
            .with_outdir(outdir)
            .with_errdir(errdir)
            .with_elevation(cli.run.sudo)
            .with_ok_exit_codes(ok_exit_codes);

        let launcher: Arc<dyn SessionLauncher> = match cli.run.transport {
            Transport::Ssh => {
                let mut ssh_options = defaults.ssh_options.clone();
                ssh_options.extend(cli.run.ssh_options.iter().cloned());
                let identity = cli
                    .run
                    .identity
                    .clone()
                    .or_else(|| defaults.identity.as_ref().map(PathBuf::from))
                    .map(|p| expand_tilde(&p));
                Arc::new(
                    SshLauncher::new()
                        .with_ssh_options(ssh_options)
                        .with_identity(identity)
                        .with_extra_args(extra_args(&cli.run)?),
                )
            }
            Transport::Local => Arc::new(LocalLauncher::new()),
        };

        Ok(Self {
            hosts,
            run_config,
            options,
            launcher,
            report,
            canary: cli.run.canary,
        })
    }
}

/// Run `descriptor` on every host, report as configured and return the
/// process exit code.
///
/// Ctrl-C ends the run early: running sessions are terminated and hosts not
/// yet started are reported as not attempted.
pub async fn execute_run(params: RunParams, descriptor: OperationDescriptor) -> Result<i32> {
    let RunParams {
        hosts,
        run_config,
        launcher,
        report,
        canary,
        ..
    } = params;
    let formatter = OutputFormatter::new(report.colors);

    let mut observers = ObserverChain::new();
    if report.mode.reports_tasks() {
        let inline = report.inline && !report.mode.is_stream();
        observers.push(Arc::new(TaskReporter::new(formatter, inline)));
    } else {
        observers.push(Arc::new(ProgressDisplay::new(hosts.len())?));
    }

    if is_tty() && !hosts.is_empty() {
        let parallelism = run_config.max_parallel.unwrap_or(hosts.len()).min(hosts.len());
        println!(
            "{}",
            formatter.format_run_header(&descriptor, hosts.len(), parallelism)
        );
    }

    let interrupt = CancellationToken::new();
    let signal_task = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, terminating running sessions");
                interrupt.cancel();
            }
        })
    };

    let coordinator = RunCoordinator::new(run_config, launcher).with_observer(Arc::new(observers));
    let outcome = match canary.filter(|n| *n < hosts.len()) {
        Some(first) => {
            coordinator
                .run_staged(&hosts, descriptor.clone(), interrupt, first, confirm_continue)
                .await
        }
        None => {
            coordinator
                .run_until_cancelled(&hosts, descriptor.clone(), interrupt)
                .await
        }
    };
    signal_task.abort();
    let results = outcome?;

    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();
    let mut console = ConsoleSink::new(formatter);
    console.summary = report.summary;
    console.inline_output = report.inline && report.mode.is_progress();
    sinks.push(Box::new(console));
    if let Some(prefix) = report.fork_hosts.clone() {
        sinks.push(Box::new(HostListSink { prefix }));
    }
    if let Some(path) = report.json_report.clone() {
        sinks.push(Box::new(JsonReportSink { path, descriptor }));
    }
    for sink in &sinks {
        if let Err(e) = sink.consume(&results).await {
            tracing::error!("Failed to write results: {e:#}");
        }
    }

    Ok(report.exit_strategy.calculate(&results))
}

/// Ask on the terminal whether to run the remaining hosts. Anything but `y`
/// (including end of input) stops the run.
async fn confirm_continue(first: RunSummary) -> bool {
    let prompt = format!(
        "\nPaused after {} host(s): {} succeeded, {} unsuccessful. OK to continue? [y/N]: ",
        first.total,
        first.succeeded,
        first.unsuccessful()
    );
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        let mut response = String::new();
        std::io::stdin().read_line(&mut response)?;
        Ok(response)
    })
    .await;

    match answer {
        Ok(Ok(response)) => is_yes(&response),
        Ok(Err(e)) => {
            tracing::warn!("Failed to read confirmation: {e}");
            false
        }
        Err(e) => {
            tracing::warn!("Confirmation prompt failed: {e}");
            false
        }
    }
}

fn is_yes(response: &str) -> bool {
    let response = response.trim();
    response.eq_ignore_ascii_case("y") || response.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }
}
