mod cli;
mod commands;
mod config;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::cli::{Args, Commands};
use crate::config::Config;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    dotenvy::dotenv().ok();

    if let Err(e) = run(args).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Cancelled on SIGTERM or ctrl-c for a graceful drain.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let path = args
        .config
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--config is required for this command"))?;
    Config::load(path)
}

async fn run(args: Args) -> anyhow::Result<()> {
    match &args.command {
        Commands::Downloader => {
            let config = load_config(&args)?;
            commands::run_downloader(config, shutdown_token()).await
        }
        Commands::Backfiller => {
            let config = load_config(&args)?;
            commands::run_backfiller(config, shutdown_token()).await
        }
        Commands::Serve => {
            let config = load_config(&args)?;
            commands::run_serve(config, shutdown_token()).await
        }
        Commands::Cut {
            channel,
            quality,
            start,
            end,
            mode,
            allow_holes,
            encoder_args,
            output,
            rewrite_ts,
        } => {
            let config = load_config(&args)?;
            let request = commands::cut_request(
                channel.clone(),
                quality.clone(),
                start,
                end,
                encoder_args.as_deref(),
            )?;
            commands::run_cut(config, request, *mode, *allow_holes, output.clone(), *rewrite_ts)
                .await
        }
        Commands::Fixts { start_time } => commands::run_fixts(*start_time).await,
    }
}
