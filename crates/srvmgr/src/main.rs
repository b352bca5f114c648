use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use srvmgr_process::OperationResult;
use tracing_subscriber::EnvFilter;

mod cli;
mod error;
mod launch;
mod log_sink;
mod pid_store;
mod probe;
mod proc_table;
mod readiness;
mod settings;
mod supervisor;

use cli::{Cli, Operation};
use error::ErrorPayload;
use launch::{CommandLauncher, Toolchain};
use pid_store::FilePidStore;
use probe::SystemProbe;
use settings::ServerLayout;
use supervisor::Supervisor;

type SystemSupervisor = Supervisor<SystemProbe, FilePidStore, CommandLauncher>;

fn init_tracing() {
    // stdout is reserved for the result line.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,srvmgr=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_supervisor(cli: &Cli) -> anyhow::Result<SystemSupervisor> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let layout = ServerLayout::new(root);
    let store = FilePidStore::new(layout.pid_file());
    tracing::debug!(pid_file = %store.path().display(), "using pid file");

    Ok(Supervisor::new(
        SystemProbe,
        store,
        CommandLauncher,
        layout,
        Toolchain::from_env(),
        settings::readiness_waiter(),
        settings::restart_pause(),
    ))
}

fn print_result(cli: &Cli, sup: &SystemSupervisor, result: &OperationResult) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(result).context("serialize result")?);
        return Ok(());
    }
    match result {
        OperationResult::Started { .. } => {
            println!("{result} Logs: {}", sup.layout().log_file().display())
        }
        _ => println!("{result}"),
    }
    Ok(())
}

async fn run(cli: &Cli, op: Operation) -> anyhow::Result<()> {
    let sup = build_supervisor(cli)?;
    tracing::debug!(?op, port = cli.port, root = %sup.layout().root.display(), "dispatch");

    let result = match op {
        Operation::Start => sup.start(cli.port, cli.mode(), cli.wait).await?,
        Operation::Stop => sup.stop(cli.port),
        Operation::Restart => sup.restart(cli.port, cli.mode(), cli.wait).await?,
        Operation::Status => {
            let report = sup.status(cli.port);
            if cli.json {
                println!("{}", serde_json::to_string(&report).context("serialize status")?);
            } else {
                println!("{report}");
            }
            return Ok(());
        }
    };
    print_result(cli, &sup, &result)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let Some(op) = cli.operation() else {
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    };

    match run(&cli, op).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = ErrorPayload::from_anyhow(&err);
            if cli.json {
                match serde_json::to_string(&payload) {
                    Ok(json) => println!("{json}"),
                    Err(_) => eprintln!("error: {}", payload.message),
                }
            } else {
                eprintln!("error: {}", payload.message);
                if let Some(hint) = payload.hint {
                    eprintln!("hint: {hint}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
