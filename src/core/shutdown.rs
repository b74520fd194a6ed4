//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves on the first of:
//! - **Unix**: `SIGINT`, `SIGTERM`, `SIGQUIT`, or Ctrl-C
//! - **elsewhere**: Ctrl-C

/// Completes when a termination signal arrives; `Err` if listeners cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
    tracing::info!("termination signal received");
    Ok(())
}

/// Completes on Ctrl-C; `Err` if the listener cannot be installed.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("termination signal received");
    Ok(())
}
