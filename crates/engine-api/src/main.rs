//! `enginectl` -- CLI and minimal HTTP surface for the workflow and campaign
//! engine (spec.md §1). `serve` runs the REST API and the background job
//! worker side by side; `worker` runs the job worker alone (for a
//! deployment that splits API and worker processes); `completions` emits
//! shell completion scripts.

mod http;
mod state;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use engine_observe::tracing_setup::{init_tracing, shutdown_tracing};

use state::AppState;

#[derive(Parser)]
#[command(name = "enginectl", version, about = "Workflow/campaign engine CLI and API server")]
struct Cli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all but error-level logs.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON (production/container deployments).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API and the background job worker.
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run only the background job worker (no HTTP listener).
    Worker,
    /// Print shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "enginectl", &mut std::io::stdout());
        return Ok(());
    }

    let verbosity: i8 = if cli.quiet { -1 } else { cli.verbose as i8 };
    init_tracing(verbosity, cli.json_logs).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init().await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let worker = state.build_job_worker().await?;
            let worker_task = tokio::spawn(async move {
                if let Err(error) = worker.run().await {
                    tracing::error!(%error, "job worker stopped unexpectedly");
                }
            });

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "engine API listening");

            let router = http::router::build_router(state);
            axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

            worker_task.abort();
            tracing::info!("server stopped");
        }
        Commands::Worker => {
            tracing::info!("running job worker only (no HTTP listener)");
            let worker = state.build_job_worker().await?;
            worker.run().await?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    shutdown_tracing();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
