use std::process;

use clap::Parser;
use tracing::{error, info, warn};

use bizdata_mcp::config::{Cli, Config, TargetId};
use bizdata_mcp::context::AppContext;
use bizdata_mcp::{mcp, observability};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bizdata-mcp: configuration error: {}", e);
            process::exit(1);
        }
    };

    observability::init(&config.logging.level);

    let ctx = match AppContext::from_config(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "failed to initialize");
            process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        direct = config.direct.url.is_some(),
        tarms = config.targets.get(TargetId::Tarms).is_configured(),
        mis = config.targets.get(TargetId::Mis).is_configured(),
        "bizdata-mcp starting"
    );

    tokio::select! {
        () = mcp::run_stdio(&ctx) => info!("stdin closed"),
        signal = shutdown_signal() => info!(signal, "shutdown signal received"),
    }

    ctx.shutdown().await;
}

/// Resolves on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                () = ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "ctrl-c"
    }
}

/// Ctrl-C, or never if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
