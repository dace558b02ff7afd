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

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::executor::DEFAULT_KILL_SIGNAL;

#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    version,
    about = "Run commands, copy files and signal processes on many hosts in parallel",
    long_about = "fanout drives the system ssh, scp and rsync programs against many hosts at once.\nEvery host gets its own subprocess; a bounded number run concurrently, each under an\noptional timeout, and the outcome of every host is reported when the run ends.",
    after_help = "EXAMPLES:\n  Run a command:           fanout -H \"web1,web2:2222\" exec uptime\n  Use a host file:         fanout -f hosts.txt -p 8 -t 30 exec -- df -h\n  Run a local script:      fanout -g db exec --script ./check.sh --sudo\n  Upload files:            fanout -g web upload app.conf /etc/app/\n  Download per host:       fanout -g web download /var/log/syslog syslog -L ./logs\n  Sync a tree:             fanout -g web sync -az ./site /srv/site\n  Signal processes:        fanout -g web kill nginx --signal HUP\n  Try two hosts first:     fanout -g web -T 2 exec -- systemctl restart app\n\nEXIT CODES:\n  0 all hosts succeeded    1 configuration error    2 usage error\n  3 timeout / not run      4 launch or connection failure\n  5 remote command failure 6 any host failure (--simple-exit-code)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub targets: TargetArgs,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[arg(
        long,
        global = true,
        help = "Configuration file path\nDefault: $XDG_CONFIG_HOME/fanout/config.yaml or ~/.config/fanout/config.yaml"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

/// Where the target hosts come from.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    #[arg(
        short = 'H',
        long = "host",
        global = true,
        env = "FANOUT_HOSTS",
        value_name = "HOSTS",
        help = "Hosts in [user@]hostname[:port] format, comma-separated and repeatable"
    )]
    pub hosts: Vec<String>,

    #[arg(
        short = 'f',
        long = "host-file",
        global = true,
        value_name = "FILE",
        help = "File with one '[user@]host[:port] [user]' per line (# starts a comment)"
    )]
    pub host_files: Vec<PathBuf>,

    #[arg(short = 'g', long, global = true, help = "Host group from the configuration file")]
    pub group: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "REGEX",
        help = "Keep only hosts whose name or alias matches REGEX"
    )]
    pub host_regexp: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "N",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        help = "Run against N hosts chosen at random (applied after --host-regexp)"
    )]
    pub sample_size: Option<usize>,

    #[arg(
        short = 'l',
        long,
        global = true,
        env = "FANOUT_USER",
        help = "Default username for hosts that do not name one"
    )]
    pub user: Option<String>,
}

/// How sessions are run.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(
        short = 'p',
        long,
        global = true,
        env = "FANOUT_PAR",
        help = "Maximum concurrent sessions [default: 32]"
    )]
    pub parallel: Option<usize>,

    #[arg(
        short = 't',
        long,
        global = true,
        env = "FANOUT_TIMEOUT",
        value_name = "SECS",
        help = "Per-host timeout in seconds (0 for none) [default: 0]"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Deadline for the whole run in seconds; hosts not started by then are not run"
    )]
    pub global_timeout: Option<u64>,

    #[arg(
        short = 'T',
        long = "test",
        global = true,
        value_name = "N",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        help = "Run the first N hosts, then ask before running the rest"
    )]
    pub canary: Option<usize>,

    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Seconds between SIGTERM and SIGKILL when ending a session [default: 2]"
    )]
    pub grace: Option<u64>,

    #[arg(long, global = true, help = "Run the remote command as root via sudo")]
    pub sudo: bool,

    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        value_name = "CODES",
        help = "Exit codes counted as success, comma-separated [default: 0]"
    )]
    pub ok_exit_codes: Option<Vec<i32>>,

    #[arg(
        short = 'O',
        long = "option",
        global = true,
        value_name = "OPTION",
        help = "ssh option in ssh_config format, passed as -o (repeatable)"
    )]
    pub ssh_options: Vec<String>,

    #[arg(
        short = 'X',
        long = "extra-arg",
        global = true,
        allow_hyphen_values = true,
        value_name = "ARG",
        help = "Extra argument for ssh/scp/rsync (repeatable)"
    )]
    pub extra_args: Vec<String>,

    #[arg(
        short = 'x',
        long = "extra-args",
        global = true,
        allow_hyphen_values = true,
        value_name = "ARGS",
        help = "Extra arguments for ssh/scp/rsync, split like a shell would (repeatable)"
    )]
    pub extra_arg_lines: Vec<String>,

    #[arg(short = 'i', long, global = true, help = "Identity (private key) file")]
    pub identity: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = Transport::Ssh,
        help = "How hosts are reached"
    )]
    pub transport: Transport,
}

/// How results are shown and stored.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    #[arg(
        short = 'o',
        long,
        global = true,
        env = "FANOUT_OUTDIR",
        help = "Directory for one stdout file per host"
    )]
    pub outdir: Option<PathBuf>,

    #[arg(
        short = 'e',
        long,
        global = true,
        env = "FANOUT_ERRDIR",
        help = "Directory for one stderr file per host"
    )]
    pub errdir: Option<PathBuf>,

    #[arg(short = 's', long, global = true, help = "Print a summary when the run ends")]
    pub summary: bool,

    #[arg(long, global = true, help = "Show a progress bar instead of per-host lines")]
    pub progress: bool,

    #[arg(long, global = true, help = "Show each host's output with its status line")]
    pub inline: bool,

    #[arg(
        short = 'P',
        long,
        global = true,
        help = "Print output live, prefixed with [host]"
    )]
    pub print: bool,

    #[arg(
        long,
        global = true,
        value_name = "PREFIX",
        help = "Write PREFIX.passed.lst and PREFIX.failed.lst host lists"
    )]
    pub fork_hosts: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", help = "Write a JSON report")]
    pub json_report: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Exit with 6 on any host failure instead of the detailed codes"
    )]
    pub simple_exit_code: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    /// ssh, scp and rsync
    #[default]
    Ssh,
    /// A local shell per host, with the host exported as FANOUT_HOST
    Local,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run a command or a local script on every host",
        after_help = "Examples:\n  fanout -g web exec uptime\n  fanout -g web exec -- ls -la /tmp\n  fanout -g web exec --script setup.sh --args '--fast' --env MODE=prod\n  echo data | fanout -g web exec --send-input 'cat > /tmp/data'"
    )]
    Exec {
        #[arg(long, value_name = "FILE", conflicts_with = "command", help = "Local script to run")]
        script: Option<PathBuf>,

        #[arg(long, requires = "script", allow_hyphen_values = true, help = "Arguments for the script")]
        args: Option<String>,

        #[arg(
            long = "env",
            requires = "script",
            value_name = "KEY=VALUE",
            help = "Environment for the script (repeatable)"
        )]
        env: Vec<String>,

        #[arg(long, requires = "script", help = "Interpreter for the script (default: its #! line)")]
        runtime: Option<String>,

        #[arg(
            long = "copy-to",
            requires = "script",
            value_name = "DIR",
            help = "Remote directory the script is stored in [default: /tmp, /root with --sudo]"
        )]
        script_dir: Option<String>,

        #[arg(
            long,
            conflicts_with = "script",
            help = "Read local stdin once and send it to every host"
        )]
        send_input: bool,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, help = "Command to run")]
        command: Vec<String>,
    },

    #[command(
        about = "Copy local files to every host (scp)",
        after_help = "Examples:\n  fanout -g web upload app.conf /etc/app/app.conf\n  fanout -g web upload -r conf.d /etc/app/"
    )]
    Upload {
        #[arg(
            required = true,
            num_args = 2..,
            value_name = "PATH",
            help = "Local files followed by the absolute remote destination"
        )]
        paths: Vec<String>,

        #[arg(short = 'r', long, help = "Copy directories recursively")]
        recursive: bool,
    },

    #[command(
        about = "Copy a remote path from every host into a per-host local directory (scp)",
        after_help = "Examples:\n  fanout -g web download /var/log/syslog syslog -L ./logs\n  Files land in ./logs/<host>/syslog"
    )]
    Download {
        #[arg(help = "Absolute remote path")]
        remote: String,

        #[arg(help = "Local name inside each host's directory")]
        local: String,

        #[arg(short = 'L', long, help = "Parent of the per-host directories [default: .]")]
        local_dir: Option<PathBuf>,

        #[arg(short = 'r', long, help = "Copy directories recursively")]
        recursive: bool,
    },

    #[command(
        about = "Synchronise a local path to every host (rsync)",
        after_help = "Examples:\n  fanout -g web sync -az ./site /srv/site"
    )]
    Sync {
        #[arg(help = "Local path")]
        local: PathBuf,

        #[arg(help = "Absolute remote path")]
        remote: String,

        #[arg(short = 'r', long, help = "Recurse into directories")]
        recursive: bool,

        #[arg(short = 'a', long, help = "Archive mode")]
        archive: bool,

        #[arg(short = 'z', long, help = "Compress during transfer")]
        compress: bool,

        #[arg(long, allow_hyphen_values = true, help = "Extra arguments for the ssh transport")]
        ssh_args: Option<String>,
    },

    #[command(
        about = "Signal processes matching a pattern on every host (pkill)",
        after_help = "Examples:\n  fanout -g web kill nginx --signal HUP"
    )]
    Kill {
        #[arg(help = "Process name pattern")]
        pattern: String,

        #[arg(long, default_value = DEFAULT_KILL_SIGNAL, help = "Signal name or number")]
        signal: String,
    },

    #[command(about = "List configured groups, or the resolved hosts with -H/-f/-g")]
    List,
}
