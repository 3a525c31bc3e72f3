/// Termination signals for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM both ask the service to drain in-flight
/// requests, stop the worker if it is running, and exit.
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for the first SIGINT or SIGTERM delivered to this process.
pub async fn wait_for_shutdown() -> std::io::Result<ShutdownSignal> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let received = tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
    };
    Ok(received)
}

/// Resolves once a termination signal arrives. If the handlers cannot be
/// installed this never resolves and the default signal disposition applies.
pub async fn shutdown_requested() {
    match wait_for_shutdown().await {
        Ok(sig) => tracing::info!(signal = %sig, "shutdown requested"),
        Err(e) => {
            tracing::error!("failed to install signal handlers: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
