//! Bistro CLI and REST API entry point.
//!
//! Binary name: `bistro`
//!
//! Parses CLI arguments, wires the conversation engine from configuration,
//! then dispatches to a command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if matches!(cli.command, Commands::Serve { .. }) => "info",
        0 => "warn",
        1 => "info,bistro_core=debug,bistro_infra=debug,bistro_api=debug",
        _ => "trace",
    };
    bistro_observe::init_tracing(filter, cli.log_json, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    bistro_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.ephemeral).await?;

    match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Bistro API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}/api/v1")).cyan()
            );
            println!(
                "  {} {}",
                console::style("Data:").bold(),
                console::style(state.data_dir.display()).dim()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Chat { thread } => {
            cli::chat::run_chat_loop(&state, thread).await?;
        }

        Commands::Show { thread } => {
            cli::thread::show_thread(&state, &thread, cli.json).await?;
        }

        Commands::Retire { thread, force } => {
            cli::thread::retire_thread(&state, &thread, force, cli.json).await?;
        }

        Commands::Threads => {
            cli::thread::list_threads(&state, cli.json).await?;
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
///
/// If a handler cannot be installed, that signal is ignored and the other
/// one still stops the server.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
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
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
