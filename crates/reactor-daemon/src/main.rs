use anyhow::Context;
use reactor_core::into_error;
use reactor_daemon::supervisor::{ShutdownOutcome, shutdown_within, wait_for_signal};
use reactor_daemon::{config_path, logging};
use reactor_hosting::{Reactor, ReactorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::install()?;

    let path = config_path(std::env::args_os().skip(1))?;
    let config = ReactorConfig::from_path(&path).map_err(|error| {
        let error = into_error!(error);
        tracing::error!(code = error.code(), "configuration rejected:\n{error:#}");
        error
    })?;
    let grace = config.shutdown_grace();
    tracing::info!(config = %path.display(), grace_ms = grace.as_millis() as u64, "booting reactor");

    // 插件初始化会阻塞等待引擎就绪。
    let reactor = tokio::task::spawn_blocking(move || Reactor::boot(config))
        .await
        .context("boot task panicked")?
        .map_err(|error| {
            tracing::error!(code = error.code(), "boot failed:\n{error:#}");
            error
        })?;

    let signal = wait_for_signal()
        .await
        .context("failed to install signal handlers")?;
    tracing::info!(signal, "termination requested, shutting down");

    let interrupt = async {
        match wait_for_signal().await {
            Ok(signal) => signal,
            Err(_) => std::future::pending().await,
        }
    };
    match shutdown_within(reactor, grace, interrupt).await {
        ShutdownOutcome::Completed(report) => {
            tracing::info!(
                modules = report.modules.len(),
                leaked = report.leaked(),
                elapsed_ms = report.elapsed_ms,
                "shutdown finished"
            );
            Ok(())
        }
        outcome => {
            tracing::error!(?outcome, "orderly shutdown did not finish, aborting");
            std::process::abort();
        }
    }
}
