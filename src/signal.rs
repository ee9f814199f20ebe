//! Relays OS termination signals to the supervisor as shutdown messages.
//!
//! SIGKILL cannot be caught, so only SIGINT and SIGTERM (Ctrl-C elsewhere)
//! are subscribed. The supervisor forwards a single SIGTERM to its live
//! worker and stops; the relay itself never restarts anything.

use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::handle::{ShutdownReason, SupervisorHandle};

/// Signal subscriptions made before the supervisor starts, so a signal that
/// arrives during startup is not handled by the default disposition.
pub struct SignalRelay {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalRelay {
    /// Subscribes to the termination signals. Must run inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Forwards the first signal received to `handle` as a shutdown.
    pub fn forward_to(self, handle: SupervisorHandle) -> RelayGuard {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            let reason = tokio::select! {
                reason = self.recv() => reason,
                _ = cancelled.cancelled() => return,
            };
            info!(%reason, "termination signal received");
            if let Err(err) = handle.shutdown_with(reason) {
                warn!(error = %err, "supervisor already gone, nothing to relay");
            }
        });
        RelayGuard { token, task }
    }

    #[cfg(unix)]
    async fn recv(mut self) -> ShutdownReason {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownReason::Interrupt,
            _ = self.terminate.recv() => ShutdownReason::Terminate,
        }
    }

    #[cfg(not(unix))]
    async fn recv(self) -> ShutdownReason {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownReason::Interrupt,
            Err(err) => {
                warn!(error = %err, "cannot listen for ctrl-c");
                std::future::pending().await
            }
        }
    }
}

/// Keeps the relay task alive; [`RelayGuard::stop`] ends it.
pub struct RelayGuard {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayGuard {
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}
