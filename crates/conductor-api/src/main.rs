//! Conductor CLI and REST API entry point.
//!
//! Binary name: `conductor`
//!
//! Parses CLI arguments, initializes tracing and application state, then
//! dispatches to a command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use conductor_types::workflow::RunStatus;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,conductor=debug",
        _ => "trace",
    };
    if let Err(e) = conductor_observe::init_tracing(filter, cli.log_format, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    // Validation is pure parsing; no config or engine needed.
    if let Commands::Validate { file } = &cli.command {
        let valid = cli::validate::validate_file(file, cli.json)?;
        return Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let state = AppState::init(cli.data_dir.as_deref()).await?;

    let code = match cli.command {
        Commands::Run {
            file,
            input,
            follow,
            correlation_id,
        } => {
            let status = cli::run::run_workflow(
                &state,
                &file,
                input.as_deref(),
                follow,
                correlation_id,
                cli.json,
            )
            .await?;
            if status == RunStatus::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }

        Commands::Serve { host, port } => {
            let addr = format!("{host}:{port}");
            let router = http::router::build_router(state.clone());
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!();
                println!(
                    "  {} Conductor API listening on {}",
                    console::style("▶").green().bold(),
                    console::style(format!("http://{addr}/api/v1")).cyan()
                );
                println!();
            }
            tracing::info!(%addr, data_dir = %state.data_dir.display(), "REST API server started");

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            ExitCode::SUCCESS
        }

        Commands::Validate { .. } | Commands::Completions { .. } => ExitCode::SUCCESS,
    };

    state.shutdown();
    conductor_observe::shutdown_tracing();
    Ok(code)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
