pub mod core;

use std::path::PathBuf;
use std::process::ExitCode;

use crate::core::config::load_config;

pub fn run() -> ExitCode {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let loaded = match load_config(explicit.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            init_logging(true);
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(loaded.config.verbose_logging);
    if loaded.created_default {
        log::info!(
            "wrote default configuration to {}; edit it and restart",
            loaded.path.display()
        );
    } else {
        log::info!("loaded configuration from {}", loaded.path.display());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(crate::core::run_bot(loaded.config, shutdown_signal())) {
        Ok(()) => {
            log::info!("bot stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("bot stopped: {err}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` overrides the level picked from the config.
fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => log::warn!("failed to install SIGTERM handler: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
