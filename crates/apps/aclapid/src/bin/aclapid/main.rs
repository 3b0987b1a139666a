use std::path::PathBuf;
use std::sync::Arc;

use aclapi_daemon::{bootstrap, logging, Settings};
use aclapi_rpc::ShutdownOutcome;
use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "aclapid", version, about = "Unprivileged ACL API front-end")]
struct Args {
    /// TOML settings file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Verbose logging and RPC reflection.
    #[arg(long)]
    debug: bool,
    /// Overrides `server.host` and `server.grpc_port`.
    #[arg(long, value_name = "HOST:PORT")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if args.debug {
        settings.daemon.debug_mode = true;
    }
    if let Some(listen) = &args.listen {
        settings.override_listen(listen)?;
    }
    let settings = Arc::new(settings.normalize()?);

    logging::init(&settings).context("installing logger")?;
    match &settings.log_file {
        Some(path) => {
            log::info!("logger initialised at {} to {}", settings.log_level, path.display())
        }
        None => log::info!("logger initialised at {}", settings.log_level),
    }
    for advisory in &settings.advisories {
        log::warn!("{}", advisory.message());
    }

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("received SIGINT, shutting down"),
            _ = terminate.recv() => log::info!("received SIGTERM, shutting down"),
        }
        trigger.cancel();
    });

    let server = bootstrap(settings.clone()).await.context("starting RPC server")?;
    match server.serve(shutdown).await {
        ShutdownOutcome::Graceful => log::info!("aclapid stopped"),
        ShutdownOutcome::Forced { aborted } => {
            log::warn!("aclapid stopped after aborting {aborted} in-flight connection(s)")
        }
    }
    Ok(())
}
