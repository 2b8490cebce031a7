use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Host signals that stop the sidecar. The job in flight is cancelled by
/// [`Node::run`](crate::node::Node::run) once the API has drained.
pub const SHUTDOWN_SIGNALS: [Signal; 2] = [Signal::SIGTERM, Signal::SIGINT];

/// Returns a token cancelled on the first of [`SHUTDOWN_SIGNALS`].
///
/// If the handlers cannot be registered the error is logged and the token
/// is never cancelled by a signal.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    if let Err(e) = cancel_on_signals(&SHUTDOWN_SIGNALS, token.clone()) {
        tracing::error!(error = %e, "Failed to install shutdown signal handlers");
    }
    token
}

/// Cancel `token` when any of `signals` is delivered to this process.
///
/// Handlers are registered before this returns, so a signal raised right
/// after the call is not lost.
pub fn cancel_on_signals(signals: &[Signal], token: CancellationToken) -> std::io::Result<()> {
    let streams = signals
        .iter()
        .map(|&sig| signal(SignalKind::from_raw(sig as i32)).map(|stream| (sig, stream)))
        .collect::<std::io::Result<Vec<_>>>()?;

    for (sig, mut stream) in streams {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = stream.recv() => {
                    tracing::info!(signal = ?sig, "Shutdown signal received, draining requests");
                    token.cancel();
                }
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn raised_signal_cancels_token() {
        let token = CancellationToken::new();
        cancel_on_signals(&[Signal::SIGUSR1], token.clone()).unwrap();

        nix::sys::signal::raise(Signal::SIGUSR1).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("token should be cancelled by the signal");
    }
}
