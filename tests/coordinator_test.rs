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

//! End-to-end runs through the coordinator with the local-shell launcher.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout::executor::{
    ExitCodeStrategy, OperationDescriptor, OutcomeKind, ResultEntry, RunConfig, RunCoordinator,
    RunObserver, SessionOptions, TimeoutScope,
};
use fanout::host::HostRecord;
use fanout::{ConfigError, LocalLauncher};
use tokio_util::sync::CancellationToken;

fn hosts(names: &[&str]) -> Vec<HostRecord> {
    names.iter().map(|n| HostRecord::new(*n)).collect()
}

fn coordinator(max_parallel: usize) -> RunCoordinator {
    let config = RunConfig::default()
        .with_max_parallel(Some(max_parallel))
        .with_termination_grace(Duration::from_millis(300));
    RunCoordinator::new(config, Arc::new(LocalLauncher::new()))
}

fn exec(command: &str, options: SessionOptions) -> OperationDescriptor {
    OperationDescriptor::exec(command).with_options(options)
}

/// Tracks how many sessions are running at once.
#[derive(Default)]
struct ConcurrencyProbe {
    active: AtomicIsize,
    peak: AtomicIsize,
    started: AtomicUsize,
}

impl RunObserver for ConcurrencyProbe {
    fn session_started(&self, _host: &HostRecord, _index: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn session_finished(&self, entry: &ResultEntry) {
        if entry.started_at.is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_host_times_out_without_affecting_others() {
    let command = r#"if [ "$FANOUT_HOST" = b ]; then sleep 5; else echo "ok-$FANOUT_HOST"; fi"#;
    let options = SessionOptions::default().with_timeout_secs(1);

    let started = Instant::now();
    let results = coordinator(2)
        .run(&hosts(&["a", "b", "c"]), exec(command, options))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(
        results.kinds(),
        vec![OutcomeKind::Succeeded, OutcomeKind::TimedOut, OutcomeKind::Succeeded]
    );
    assert_eq!(results.get(0).unwrap().stdout.text(), "ok-a\n");
    assert_eq!(results.get(2).unwrap().stdout.text(), "ok-c\n");
    assert_eq!(
        results.get(1).unwrap().timeout_scope,
        Some(TimeoutScope::Session)
    );
    assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 3);
    assert_eq!(ExitCodeStrategy::RequireAllSuccess.calculate(&results), 6);
}

#[tokio::test]
async fn test_empty_host_list_is_a_configuration_error() {
    let err = coordinator(4)
        .run(&[], OperationDescriptor::exec("true"))
        .await
        .unwrap_err();
    assert_eq!(err, ConfigError::EmptyHostList);
}

#[tokio::test]
async fn test_zero_parallelism_is_rejected_before_dispatch() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let config = RunConfig::default().with_max_parallel(Some(0));
    let coordinator =
        RunCoordinator::new(config, Arc::new(LocalLauncher::new())).with_observer(probe.clone());

    let err = coordinator
        .run(&hosts(&["a"]), OperationDescriptor::exec("true"))
        .await
        .unwrap_err();
    assert_eq!(err, ConfigError::InvalidParallelism(0));
    assert_eq!(probe.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallelism_is_never_exceeded() {
    for limit in [1, 2] {
        let probe = Arc::new(ConcurrencyProbe::default());
        let config = RunConfig::default().with_max_parallel(Some(limit));
        let coordinator = RunCoordinator::new(config, Arc::new(LocalLauncher::new()))
            .with_observer(probe.clone());

        let results = coordinator
            .run(
                &hosts(&["h0", "h1", "h2", "h3", "h4", "h5"]),
                OperationDescriptor::exec("sleep 0.2"),
            )
            .await
            .unwrap();

        assert!(results.all_succeeded());
        assert_eq!(probe.started.load(Ordering::SeqCst), 6);
        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= limit as isize, "peak {peak} > {limit}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_follow_submission_order() {
    // Later hosts finish first
    let command = r#"sleep 0.$((3 - FANOUT_NODENUM)); echo "$FANOUT_NODENUM""#;
    let results = coordinator(4)
        .run(
            &hosts(&["h0", "h1", "h2", "h3"]),
            OperationDescriptor::exec(command),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    for (i, entry) in results.iter().enumerate() {
        assert_eq!(entry.index, i);
        assert_eq!(entry.host.hostname, format!("h{i}"));
        assert_eq!(entry.stdout.text(), format!("{i}\n"));
    }
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let options = SessionOptions::default().with_timeout_secs(1);
    let results = coordinator(1)
        .run(
            &hosts(&["a"]),
            exec("echo before; echo oops >&2; sleep 5; echo after", options),
        )
        .await
        .unwrap();

    let entry = results.get(0).unwrap();
    assert_eq!(entry.kind, OutcomeKind::TimedOut);
    assert_eq!(entry.stdout.text(), "before\n");
    assert_eq!(entry.stderr.text(), "oops\n");
    assert!(entry.exit_code.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_timeout_leaves_unstarted_hosts_not_attempted() {
    let config = RunConfig::default()
        .with_max_parallel(Some(1))
        .with_global_timeout(Some(Duration::from_millis(800)))
        .with_termination_grace(Duration::from_millis(200));
    let coordinator = RunCoordinator::new(config, Arc::new(LocalLauncher::new()));

    let started = Instant::now();
    let results = coordinator
        .run(
            &hosts(&["a", "b", "c", "d"]),
            OperationDescriptor::exec("sleep 5"),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(results.len(), 4);
    let first = results.get(0).unwrap();
    assert_eq!(first.kind, OutcomeKind::TimedOut);
    assert_eq!(first.timeout_scope, Some(TimeoutScope::Run));
    for entry in results.iter().skip(1) {
        assert_eq!(entry.kind, OutcomeKind::NotAttempted);
        assert_eq!(entry.timeout_scope, Some(TimeoutScope::Run));
    }
    assert_eq!(results.summary().not_attempted, 3);
    assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupt_terminates_running_sessions() {
    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            interrupt.cancel();
        });
    }

    let results = coordinator(1)
        .run_until_cancelled(
            &hosts(&["a", "b", "c"]),
            OperationDescriptor::exec("sleep 5"),
            interrupt,
        )
        .await
        .unwrap();

    assert_eq!(
        results.kinds(),
        vec![
            OutcomeKind::TimedOut,
            OutcomeKind::NotAttempted,
            OutcomeKind::NotAttempted
        ]
    );
    assert!(results
        .iter()
        .all(|e| e.timeout_scope == Some(TimeoutScope::Interrupted)));
}

#[tokio::test]
async fn test_unlaunchable_program_is_errored() {
    let launcher = LocalLauncher::new().with_shell("/nonexistent/fanout-shell");
    let coordinator = RunCoordinator::new(RunConfig::default(), Arc::new(launcher));

    let results = coordinator
        .run(&hosts(&["a", "b"]), OperationDescriptor::exec("true"))
        .await
        .unwrap();

    assert!(results.iter().all(|e| e.kind == OutcomeKind::Errored));
    assert!(results.get(0).unwrap().error.is_some());
    assert_eq!(results.summary().errored, 2);
    assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 4);
}

#[tokio::test]
async fn test_failure_on_one_host_is_isolated() {
    let command = r#"[ "$FANOUT_HOST" != b ] || exit 7"#;
    let results = coordinator(3)
        .run(&hosts(&["a", "b", "c"]), OperationDescriptor::exec(command))
        .await
        .unwrap();

    assert_eq!(
        results.kinds(),
        vec![OutcomeKind::Succeeded, OutcomeKind::Failed, OutcomeKind::Succeeded]
    );
    let failed = results.get(1).unwrap();
    assert_eq!(failed.exit_code, Some(7));
    assert!(!failed.transport_failure);
    assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 5);
}

#[tokio::test]
async fn test_accepted_exit_codes() {
    let accepting = SessionOptions::default().with_ok_exit_codes([0, 3]);
    let results = coordinator(1)
        .run(&hosts(&["a"]), exec("exit 3", accepting))
        .await
        .unwrap();
    assert_eq!(results.get(0).unwrap().kind, OutcomeKind::Succeeded);
    assert_eq!(results.get(0).unwrap().exit_code, Some(3));

    let results = coordinator(1)
        .run(&hosts(&["a"]), exec("exit 3", SessionOptions::default()))
        .await
        .unwrap();
    assert_eq!(results.get(0).unwrap().kind, OutcomeKind::Failed);
}

#[tokio::test]
async fn test_input_is_sent_to_every_host() {
    let options = SessionOptions::default().with_stdin(Some(b"shared input\n".to_vec()));
    let results = coordinator(2)
        .run(&hosts(&["a", "b"]), exec("cat", options))
        .await
        .unwrap();

    for entry in &results {
        assert_eq!(entry.stdout.text(), "shared input\n");
    }
}

#[tokio::test]
async fn test_output_files_are_named_per_host() {
    let outdir = tempfile::tempdir().unwrap();
    let errdir = tempfile::tempdir().unwrap();
    let targets = vec![
        HostRecord::new("a"),
        HostRecord::new("a"),
        HostRecord::new("a").with_user("ops").with_port(2222),
    ];
    let options = SessionOptions::default()
        .with_outdir(Some(outdir.path().to_path_buf()))
        .with_errdir(Some(errdir.path().to_path_buf()));

    let results = coordinator(3)
        .run(
            &targets,
            exec("echo out-$FANOUT_NODENUM; echo err-$FANOUT_NODENUM >&2", options),
        )
        .await
        .unwrap();
    assert!(results.all_succeeded());

    let read = |dir: &tempfile::TempDir, name: &str| {
        std::fs::read_to_string(dir.path().join(name)).unwrap()
    };
    assert_eq!(read(&outdir, "a"), "out-0\n");
    assert_eq!(read(&outdir, "a.1"), "out-1\n");
    assert_eq!(read(&outdir, "ops@a_2222"), "out-2\n");
    assert_eq!(read(&errdir, "a.1"), "err-1\n");
    assert_eq!(
        results.get(1).unwrap().stdout.path.as_deref(),
        Some(outdir.path().join("a.1").as_path())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_staged_run_pauses_after_first_batch() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let coordinator = coordinator(4).with_observer(probe.clone());

    let seen = Arc::new(AtomicUsize::new(0));
    let results = coordinator
        .run_staged(
            &hosts(&["a", "b", "c", "d"]),
            OperationDescriptor::exec("echo n-$FANOUT_NODENUM"),
            CancellationToken::new(),
            2,
            |first| {
                assert_eq!(first.total, 2);
                assert_eq!(first.succeeded, 2);
                seen.store(probe.started.load(Ordering::SeqCst), Ordering::SeqCst);
                async { true }
            },
        )
        .await
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert!(results.all_succeeded());
    let outputs: Vec<String> = results.iter().map(|e| e.stdout.text()).collect();
    assert_eq!(outputs, vec!["n-0\n", "n-1\n", "n-2\n", "n-3\n"]);
}

#[tokio::test]
async fn test_declined_staged_run_leaves_rest_not_attempted() {
    let results = coordinator(2)
        .run_staged(
            &hosts(&["a", "b", "c"]),
            OperationDescriptor::exec("true"),
            CancellationToken::new(),
            1,
            |_| async { false },
        )
        .await
        .unwrap();

    assert_eq!(
        results.kinds(),
        vec![
            OutcomeKind::Succeeded,
            OutcomeKind::NotAttempted,
            OutcomeKind::NotAttempted
        ]
    );
    assert_eq!(
        results.get(2).unwrap().timeout_scope,
        Some(TimeoutScope::Interrupted)
    );
    assert_eq!(ExitCodeStrategy::Detailed.calculate(&results), 3);
}

#[tokio::test]
async fn test_repeated_host_never_shares_a_file_with_a_suffixed_name() {
    let outdir = tempfile::tempdir().unwrap();
    let options = SessionOptions::default().with_outdir(Some(outdir.path().to_path_buf()));

    let results = coordinator(1)
        .run(
            &hosts(&["node", "node", "node.1"]),
            exec("echo run-$FANOUT_NODENUM-$FANOUT_HOST", options),
        )
        .await
        .unwrap();
    assert!(results.all_succeeded());

    let mut files: Vec<String> = std::fs::read_dir(outdir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["node", "node.1", "node.1.1"]);

    for entry in &results {
        let path = entry.stdout.path.as_deref().unwrap();
        let expected = format!("run-{}-{}\n", entry.index, entry.host.hostname);
        assert_eq!(std::fs::read_to_string(path).unwrap(), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_holding_pipes_past_settle_window_is_abandoned() {
    // The shell ignores SIGTERM, and a setsid child outside its process group
    // keeps the output pipes open after the group is killed.
    let config = RunConfig::default()
        .with_max_parallel(Some(2))
        .with_global_timeout(Some(Duration::from_millis(300)))
        .with_termination_grace(Duration::from_secs(2));
    let coordinator = RunCoordinator::new(config, Arc::new(LocalLauncher::new()));

    let started = Instant::now();
    let results = coordinator
        .run(
            &hosts(&["stuck", "quick"]),
            OperationDescriptor::exec(
                r#"if [ "$FANOUT_HOST" = stuck ]; then trap '' TERM; setsid sleep 8 & sleep 30; fi"#,
            ),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    let stuck = results.get(0).unwrap();
    assert_eq!(stuck.kind, OutcomeKind::TimedOut);
    assert_eq!(stuck.timeout_scope, Some(TimeoutScope::Run));
    assert!(stuck.error.as_deref().unwrap().contains("abandoned"));
    assert_eq!(results.get(1).unwrap().kind, OutcomeKind::Succeeded);
}

#[tokio::test]
async fn test_unusable_output_directory_is_a_configuration_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let options = SessionOptions::default().with_outdir(Some(file.path().join("sub")));

    let err = coordinator(1)
        .run(&hosts(&["a"]), exec("true", options))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::OutputDirectory { .. }));
}
