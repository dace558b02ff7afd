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

//! Command-line parsing and settings resolution.

use clap::Parser;
use serial_test::serial;
use std::time::Duration;

use fanout::cli::{Cli, Commands, Transport};
use fanout::commands::{extra_args, resolve_hosts, RunParams, DEFAULT_PARALLEL};
use fanout::config::Config;
use fanout::ConfigError;

const ENV_VARS: &[&str] = &[
    "FANOUT_HOSTS",
    "FANOUT_USER",
    "FANOUT_PAR",
    "FANOUT_TIMEOUT",
    "FANOUT_OUTDIR",
    "FANOUT_ERRDIR",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn parse(args: &[&str]) -> Cli {
    clear_env();
    Cli::try_parse_from(args).unwrap()
}

const CONFIG: &str = r#"
defaults:
  user: admin
  parallel: 16
  timeout: 30
  outdir: /tmp/fanout-out
groups:
  web:
    parallel: 4
    hosts:
      - web1
      - web2:2222
      - db9
"#;

#[test]
#[serial]
fn test_exec_with_trailing_command() {
    let cli = parse(&["fanout", "-H", "a,b", "-p", "4", "-t", "10", "exec", "--", "ls", "-la"]);
    assert_eq!(cli.targets.hosts, vec!["a,b"]);
    assert_eq!(cli.run.parallel, Some(4));
    assert_eq!(cli.run.timeout, Some(10));
    match cli.command {
        Commands::Exec { command, script, .. } => {
            assert_eq!(command, vec!["ls", "-la"]);
            assert!(script.is_none());
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
#[serial]
fn test_global_options_after_subcommand() {
    let cli = parse(&["fanout", "exec", "-H", "a", "--sudo", "--transport", "local", "uptime"]);
    assert_eq!(cli.targets.hosts, vec!["a"]);
    assert!(cli.run.sudo);
    assert_eq!(cli.run.transport, Transport::Local);
}

#[test]
#[serial]
fn test_kill_defaults_to_signal_nine() {
    let cli = parse(&["fanout", "-H", "a", "kill", "nginx"]);
    match cli.command {
        Commands::Kill { pattern, signal } => {
            assert_eq!(pattern, "nginx");
            assert_eq!(signal, "9");
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
#[serial]
fn test_upload_and_sync_arguments() {
    let cli = parse(&["fanout", "upload", "-r", "a.conf", "b.conf", "/etc/app/"]);
    match cli.command {
        Commands::Upload { paths, recursive } => {
            assert_eq!(paths, vec!["a.conf", "b.conf", "/etc/app/"]);
            assert!(recursive);
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cli = parse(&["fanout", "sync", "-az", "./site", "/srv/site"]);
    match cli.command {
        Commands::Sync {
            archive,
            compress,
            recursive,
            ..
        } => {
            assert!(archive && compress && !recursive);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
#[serial]
fn test_usage_errors_exit_with_two() {
    clear_env();
    let err = Cli::try_parse_from(["fanout", "upload", "only-one"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);

    let err = Cli::try_parse_from(["fanout", "exec", "--script", "x.sh", "--send-input"])
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);

    let err = Cli::try_parse_from(["fanout", "-p", "many", "exec", "true"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
#[serial]
fn test_environment_supplies_options() {
    clear_env();
    std::env::set_var("FANOUT_PAR", "7");
    std::env::set_var("FANOUT_HOSTS", "x,y");
    let cli = Cli::try_parse_from(["fanout", "exec", "true"]).unwrap();
    clear_env();

    assert_eq!(cli.run.parallel, Some(7));
    assert_eq!(cli.targets.hosts, vec!["x,y"]);
}

#[test]
#[serial]
fn test_ok_exit_codes_are_comma_separated() {
    let cli = parse(&["fanout", "--ok-exit-codes", "0,1,255", "exec", "true"]);
    assert_eq!(cli.run.ok_exit_codes, Some(vec![0, 1, 255]));
}

#[test]
#[serial]
fn test_builtin_defaults() {
    let cli = parse(&["fanout", "-H", "a", "exec", "true"]);
    let params = RunParams::resolve(&cli, &Config::default()).unwrap();

    assert_eq!(params.run_config.max_parallel, Some(DEFAULT_PARALLEL));
    assert_eq!(params.run_config.global_timeout, None);
    assert_eq!(params.options.timeout, None);
    assert!(params.options.is_accepted(0));
    assert!(!params.options.is_accepted(1));
}

#[test]
#[serial]
fn test_command_line_beats_group_beats_defaults() {
    let config = Config::from_yaml(CONFIG).unwrap();

    let cli = parse(&["fanout", "-g", "web", "exec", "true"]);
    let params = RunParams::resolve(&cli, &config).unwrap();
    assert_eq!(params.run_config.max_parallel, Some(4));
    assert_eq!(params.options.timeout, Some(Duration::from_secs(30)));
    assert_eq!(
        params.options.outdir.as_deref(),
        Some(std::path::Path::new("/tmp/fanout-out"))
    );
    assert_eq!(params.hosts.len(), 3);
    assert_eq!(params.hosts[0].spec(), "admin@web1");

    let cli = parse(&["fanout", "-g", "web", "-p", "8", "-t", "0", "exec", "true"]);
    let params = RunParams::resolve(&cli, &config).unwrap();
    assert_eq!(params.run_config.max_parallel, Some(8));
    assert_eq!(params.options.timeout, None);
}

#[test]
#[serial]
fn test_host_sources_are_combined_then_filtered() {
    let config = Config::from_yaml(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let host_file = dir.path().join("hosts");
    std::fs::write(&host_file, "# fleet\nweb7 deploy\nbackup:2200\n").unwrap();
    let host_file = host_file.display().to_string();

    let cli = parse(&[
        "fanout", "-H", "web5", "-f", &host_file, "-g", "web", "-l", "ops", "exec", "true",
    ]);
    let all = resolve_hosts(&cli.targets, &config).unwrap();
    let specs: Vec<String> = all.iter().map(|h| h.spec()).collect();
    assert_eq!(
        specs,
        vec![
            "ops@web5",
            "deploy@web7",
            "ops@backup:2200",
            "ops@web1",
            "ops@web2:2222",
            "ops@db9"
        ]
    );

    let cli = parse(&["fanout", "-g", "web", "--host-regexp", "^web", "exec", "true"]);
    let filtered = resolve_hosts(&cli.targets, &config).unwrap();
    assert_eq!(filtered.len(), 2);
}

#[test]
#[serial]
fn test_host_resolution_errors() {
    let config = Config::from_yaml(CONFIG).unwrap();

    let cli = parse(&["fanout", "-g", "missing", "exec", "true"]);
    assert_eq!(
        resolve_hosts(&cli.targets, &config).unwrap_err(),
        ConfigError::UnknownGroup("missing".to_string())
    );

    let cli = parse(&["fanout", "-g", "web", "--host-regexp", "(", "exec", "true"]);
    assert!(matches!(
        resolve_hosts(&cli.targets, &config).unwrap_err(),
        ConfigError::InvalidHostPattern { .. }
    ));

    let cli = parse(&["fanout", "-H", "bad:port", "exec", "true"]);
    assert!(matches!(
        resolve_hosts(&cli.targets, &config).unwrap_err(),
        ConfigError::HostParse { .. }
    ));
}

#[test]
#[serial]
fn test_canary_and_global_timeout_flags() {
    let cli = parse(&["fanout", "-H", "a,b,c", "-T", "2", "--global-timeout", "60", "exec", "true"]);
    assert_eq!(cli.run.canary, Some(2));
    assert_eq!(cli.run.global_timeout, Some(60));

    let params = RunParams::resolve(&cli, &Config::default()).unwrap();
    assert_eq!(params.canary, Some(2));
    assert_eq!(params.run_config.global_timeout, Some(Duration::from_secs(60)));

    clear_env();
    let err = Cli::try_parse_from(["fanout", "--test", "0", "exec", "true"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
#[serial]
fn test_sample_size_applies_after_host_regexp() {
    let config = Config::from_yaml(CONFIG).unwrap();

    let cli = parse(&[
        "fanout",
        "-g",
        "web",
        "--host-regexp",
        "^web",
        "--sample-size",
        "1",
        "exec",
        "true",
    ]);
    let sampled = resolve_hosts(&cli.targets, &config).unwrap();
    assert_eq!(sampled.len(), 1);
    assert!(sampled[0].hostname.starts_with("web"));

    let cli = parse(&["fanout", "-H", "a,b,c", "--sample-size", "10", "exec", "true"]);
    let all = resolve_hosts(&cli.targets, &config).unwrap();
    let names: Vec<&str> = all.iter().map(|h| h.hostname.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    clear_env();
    let err = Cli::try_parse_from(["fanout", "--sample-size", "0", "exec", "true"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
#[serial]
fn test_extra_args_are_shell_split() {
    let cli = parse(&[
        "fanout",
        "-X",
        "-4",
        "-x",
        "-o 'ConnectTimeout 5' -v",
        "exec",
        "true",
    ]);
    assert_eq!(
        extra_args(&cli.run).unwrap(),
        vec!["-4", "-o", "ConnectTimeout 5", "-v"]
    );

    let cli = parse(&["fanout", "-x", "-o 'unterminated", "exec", "true"]);
    assert!(matches!(
        extra_args(&cli.run).unwrap_err(),
        ConfigError::InvalidExtraArgs { .. }
    ));
}
