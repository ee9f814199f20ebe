use std::sync::{Arc, Mutex, PoisonError};

use tokio::{
    sync::{mpsc, oneshot, OnceCell},
    task::JoinHandle,
};

use crate::{
    child::ChildHandle,
    supervisor::{SupervisorError, SupervisorExit},
};

/// Why the supervisor was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// [`SupervisorHandle::shutdown`] was called.
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum SupervisorMessage {
    /// Terminate the live worker, if any, then stop supervising.
    Shutdown(ShutdownReason),
    /// Report the live worker, if any.
    CurrentChild(oneshot::Sender<Option<ChildHandle>>),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorHandleError {
    #[error("failed to send message to supervisor: {0}")]
    SendError(String),
    #[error("failed to receive response from supervisor: {0}")]
    RecvError(#[from] oneshot::error::RecvError),
}

impl<T> From<mpsc::error::SendError<T>> for SupervisorHandleError {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        Self::SendError(err.to_string())
    }
}

type SupervisorResult = Result<SupervisorExit, SupervisorError>;

/// Controls a running [`Supervisor`](crate::Supervisor). Cheap to clone.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    join_handle: Arc<Mutex<Option<JoinHandle<SupervisorResult>>>>,
    result: Arc<OnceCell<SupervisorResult>>,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        join_handle: JoinHandle<SupervisorResult>,
        tx: mpsc::UnboundedSender<SupervisorMessage>,
    ) -> Self {
        Self {
            join_handle: Arc::new(Mutex::new(Some(join_handle))),
            result: Arc::new(OnceCell::new()),
            tx,
        }
    }

    /// Waits for the supervisor loop to end. Every caller, and every later
    /// call, sees the same outcome.
    pub async fn wait(&self) -> SupervisorResult {
        self.result
            .get_or_init(|| async {
                let join_handle = self
                    .join_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match join_handle {
                    Some(join_handle) => join_handle
                        .await
                        .unwrap_or_else(|err| Err(SupervisorError::Aborted(err.to_string()))),
                    None => Err(SupervisorError::Aborted(
                        "supervisor task handle already taken".to_string(),
                    )),
                }
            })
            .await
            .clone()
    }

    /// Terminates the live worker and stops the supervisor.
    pub fn shutdown(&self) -> Result<(), SupervisorHandleError> {
        self.shutdown_with(ShutdownReason::Requested)
    }

    pub fn shutdown_with(&self, reason: ShutdownReason) -> Result<(), SupervisorHandleError> {
        self.tx.send(SupervisorMessage::Shutdown(reason))?;
        Ok(())
    }

    /// The worker the supervisor is currently waiting on, if any.
    pub async fn current_child(&self) -> Result<Option<ChildHandle>, SupervisorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SupervisorMessage::CurrentChild(tx))?;
        Ok(rx.await?)
    }

    pub fn is_finished(&self) -> bool {
        if self.result.initialized() {
            return true;
        }
        self.join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
    }
}
