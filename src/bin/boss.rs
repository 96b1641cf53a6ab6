//! boss - command line client for the boss process supervision daemon
//!
//! # Usage
//!
//! ```text
//! boss list                          # List supervised processes
//! boss start app.js -n web -i 4      # Start a cluster of four workers
//! boss start app.js -u www -g www    # Start as another user/group
//! boss find --pid 4242               # Look up one process
//! boss watch                         # Stream process events until Ctrl-C
//! boss kill                          # Stop every process and the daemon
//! ```
//!
//! The daemon socket comes from `--socket`, then `BOSS_SOCKET`, then the
//! config file, then `/tmp/boss.sock`. Logs go to stderr; set `RUST_LOG`
//! (e.g. `RUST_LOG=boss_client=debug`) for more detail.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use boss_client::{spawn_reconcile_task, ConnectionConfig, DaemonConnection, EventArg, ProcessRef};
use boss_core::{ProcessId, StartOptions};

/// boss - process supervision client
#[derive(Parser, Debug)]
#[command(name = "boss", version, about)]
struct Cli {
    /// Daemon socket path (overrides BOSS_SOCKET and the config file)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Config file (default: ~/.config/boss/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log connection activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supervised processes
    List,
    /// Start a script under supervision
    Start {
        /// Script to run; relative paths are resolved against the current directory
        script: PathBuf,

        /// User to run the process as
        #[arg(short, long)]
        user: Option<String>,

        /// Group to run the process as
        #[arg(short, long)]
        group: Option<String>,

        /// Name for the process
        #[arg(short, long)]
        name: Option<String>,

        /// Run as a cluster with this many workers
        #[arg(short, long)]
        instances: Option<u32>,

        /// Arguments passed to the script
        #[arg(last = true)]
        argv: Vec<String>,
    },
    /// Look up one process
    Find(FindArgs),
    /// Stream process events until interrupted
    Watch,
    /// Stop every process and shut the daemon down
    Kill,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct FindArgs {
    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    pid: Option<u32>,

    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("boss={level}").parse()?)
                .add_directive(format!("boss_client={level}").parse()?),
        )
        .init();

    let mut config =
        ConnectionConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    debug!(socket_path = %config.socket_path.display(), "Configuration loaded");

    let connection = DaemonConnection::connect(&config).await.with_context(|| {
        format!(
            "Failed to connect to daemon at {}",
            config.socket_path.display()
        )
    })?;
    let connection = Arc::new(connection);

    let result = run(cli.command, &connection, &config).await;
    connection.close().await;
    result
}

async fn run(
    command: Command,
    connection: &Arc<DaemonConnection>,
    config: &ConnectionConfig,
) -> Result<()> {
    match command {
        Command::List => {
            let processes = connection
                .list_processes()
                .await
                .context("Failed to list processes")?;
            for process in &processes {
                println!("{}", format_process(process));
            }
        }
        Command::Start {
            script,
            user,
            group,
            name,
            instances,
            argv,
        } => {
            let script = absolute(&script)?;
            let options = StartOptions {
                user,
                group,
                name,
                instances,
                argv,
            };
            options
                .validate(&script)
                .with_context(|| format!("Cannot start {}", script.display()))?;

            let process = connection
                .start_process(script.clone(), options)
                .await
                .with_context(|| format!("Failed to start {}", script.display()))?;
            println!("{}", format_process(&process));
        }
        Command::Find(FindArgs { id, pid, name }) => {
            let process = match (id, pid, name) {
                (Some(id), _, _) => connection.find_process_info_by_id(&ProcessId::new(id)).await,
                (_, Some(pid), _) => connection.find_process_info_by_pid(pid).await,
                (_, _, Some(name)) => connection.find_process_info_by_name(&name).await,
                (None, None, None) => anyhow::bail!("One of --id, --pid or --name is required"),
            }
            .context("Failed to find process")?;
            println!("{}", format_process(&process));
        }
        Command::Watch => watch(connection, config.reconcile_interval).await?,
        Command::Kill => {
            connection.kill().await.context("Failed to stop daemon")?;
            println!("Daemon stopping");
        }
    }
    Ok(())
}

/// Prints translated events, keeping the registry reconciled, until Ctrl-C
/// or until the daemon goes away.
async fn watch(connection: &Arc<DaemonConnection>, reconcile_interval: Duration) -> Result<()> {
    let mut events = connection.subscribe();
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
        }
        shutdown_token.cancel();
    });

    for process in connection.list_processes().await.context("Failed to list processes")? {
        println!("{}", format_process(&process));
    }
    let reconcile = spawn_reconcile_task(
        Arc::clone(connection),
        reconcile_interval,
        cancel_token.clone(),
    );

    let mut daemon_gone = false;
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    let args = format_event_args(&event.args);
                    println!("{}\t{}\t{}", event.name, event.process.id(), args);
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("({skipped} events skipped)");
                }
                Err(RecvError::Closed) => {
                    daemon_gone = true;
                    break;
                }
            },
        }
    }

    cancel_token.cancel();
    if let Err(e) = reconcile.await {
        warn!(error = %e, "Reconcile task failed");
    }
    if daemon_gone {
        anyhow::bail!("Daemon closed the connection");
    }
    Ok(())
}

/// Resolves `script` against the current directory.
fn absolute(script: &Path) -> Result<PathBuf> {
    if script.is_absolute() {
        return Ok(script.to_path_buf());
    }
    let cwd = env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(script))
}

fn format_process(process: &ProcessRef) -> String {
    let descriptor = process.descriptor();
    let pid = descriptor
        .pid
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string());
    let name = descriptor.name.as_deref().unwrap_or("-");
    let manager = descriptor
        .manager()
        .map(|id| format!("\tworker of {id}"))
        .unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{}\t{}{}",
        process.id(),
        descriptor.kind,
        pid,
        name,
        descriptor.socket,
        manager
    )
}

fn format_event_args(args: &[EventArg]) -> String {
    args.iter()
        .map(|arg| match arg {
            EventArg::Process(process) => process.id().to_string(),
            EventArg::Value(value) => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
