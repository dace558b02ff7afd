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

use anyhow::Result;
use clap::Parser;

use fanout::{
    cli::{Cli, Commands},
    commands::{
        download::download_files,
        exec::{execute_command, ExecArgs},
        kill::kill_processes,
        list::{list_groups, list_hosts},
        resolve_hosts,
        sync::sync_path,
        upload::upload_files,
        RunParams,
    },
    config::Config,
    executor::{exit_strategy::EXIT_CONFIG_ERROR, should_use_colors, Operation},
    utils::init_logging,
};

#[tokio::main]
async fn main() {
    // clap reports usage errors itself and exits with status 2
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load_with_priority(cli.config.as_deref()).await?;

    if let Commands::List = cli.command {
        let targets = &cli.targets;
        if targets.hosts.is_empty() && targets.host_files.is_empty() && targets.group.is_none() {
            list_groups(&config, should_use_colors());
        } else {
            list_hosts(&resolve_hosts(targets, &config)?);
        }
        return Ok(0);
    }

    let params = RunParams::resolve(&cli, &config)?;
    tracing::debug!(
        "Resolved {} hosts, transport {:?}",
        params.hosts.len(),
        cli.run.transport
    );

    match cli.command {
        Commands::Exec {
            script,
            args,
            env,
            runtime,
            script_dir,
            send_input,
            command,
        } => {
            let args = ExecArgs {
                command,
                script,
                script_args: args,
                env,
                runtime,
                script_dir,
                send_input,
            };
            execute_command(params, args).await
        }
        Commands::Upload { paths, recursive } => upload_files(params, &paths, recursive).await,
        Commands::Download {
            remote,
            local,
            local_dir,
            recursive,
        } => download_files(params, remote, local, local_dir, recursive).await,
        Commands::Sync {
            local,
            remote,
            recursive,
            archive,
            compress,
            ssh_args,
        } => {
            let operation = Operation::Sync {
                local,
                remote,
                recursive,
                archive,
                compress,
                ssh_args,
            };
            sync_path(params, operation).await
        }
        Commands::Kill { pattern, signal } => kill_processes(params, pattern, signal).await,
        Commands::List => Ok(0),
    }
}
