pub(crate) mod builder;
pub(crate) mod handle;

use std::{ffi::OsString, path::Path, sync::Arc, time::Duration};

use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    child::{ChildHandle, ChildProcess, ExitOutcome, LaunchCommand, OsSpawner, Spawner},
    image::{remove_copy, DuplicationError, ExecutableImage},
    policy::RestartDecision,
    role::Role,
    supervisor::{
        builder::{CleanupPolicy, SupervisorConfig},
        handle::{ShutdownReason, SupervisorHandle, SupervisorMessage},
    },
};

/// How a supervisor that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// A worker exited with code 0.
    CleanShutdown,
    /// A shutdown was relayed; the live worker, if any, was asked to terminate.
    ShutDown(ShutdownReason),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    #[error("cannot prepare the worker copy: {0}")]
    Duplication(#[source] Arc<DuplicationError>),
    #[error("cannot wait for worker: {0}")]
    Wait(#[source] Arc<std::io::Error>),
    #[error("worker kept failing after {attempts} restarts, last with {last}")]
    RestartLimitExceeded { attempts: u32, last: ExitOutcome },
    #[error("supervisor task aborted: {0}")]
    Aborted(String),
}

/// What ended one `running` phase.
enum Watched {
    Exited(ExitOutcome),
    Shutdown(ShutdownReason),
}

/// The watchdog: spawns worker copies one at a time and restarts them until
/// one exits cleanly or a shutdown arrives.
///
/// The loop task alone owns the live worker. Everything else, the signal relay
/// included, talks to it through [`SupervisorHandle`] messages.
pub struct Supervisor<S: Spawner = OsSpawner> {
    config: SupervisorConfig,
    image: ExecutableImage,
    spawner: S,
    args: Vec<OsString>,
    restart_attempts: u32,
    generation: u64,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    rx: mpsc::UnboundedReceiver<SupervisorMessage>,
}

impl<S: Spawner> Supervisor<S> {
    /// `args` are the supervisor's own arguments, binary path excluded.
    pub fn new(config: SupervisorConfig, image: ExecutableImage, spawner: S, args: Vec<OsString>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            image,
            spawner,
            args,
            restart_attempts: 0,
            generation: 0,
            tx,
            rx,
        }
    }

    /// Runs the supervisor, consuming it and returning a handle for external control.
    pub fn run(self) -> SupervisorHandle {
        let tx = self.tx.clone();
        let join_handle = tokio::spawn(self.run_and_supervise());
        SupervisorHandle::new(join_handle, tx)
    }

    async fn run_and_supervise(mut self) -> Result<SupervisorExit, SupervisorError> {
        info!(image = %self.image.path().display(), "supervisor started");
        let mut last_outcome = ExitOutcome::Unknown;
        loop {
            // spawning
            let command = self.prepare_worker().await?;
            if let Some(reason) = self.drain_messages(None) {
                info!(%reason, "shutdown before spawning, worker abandoned");
                self.discard_worker_copy(&command.program);
                return Ok(SupervisorExit::ShutDown(reason));
            }

            let decision = match self.spawner.spawn(&command).await {
                Ok(child) => {
                    self.generation += 1;
                    let handle = ChildHandle {
                        pid: child.id(),
                        started_at: Instant::now(),
                        generation: self.generation,
                    };
                    info!(pid = ?handle.pid, generation = handle.generation, "worker started");

                    // running
                    let watched = self.watch(child, handle).await;
                    self.discard_worker_copy(&command.program);
                    match watched? {
                        Watched::Exited(outcome) => {
                            last_outcome = outcome;
                            self.decide(outcome, handle)
                        }
                        Watched::Shutdown(reason) => return Ok(SupervisorExit::ShutDown(reason)),
                    }
                }
                Err(err) => {
                    error!(
                        program = %command.program.display(),
                        error = %err,
                        "error when starting worker process, retrying"
                    );
                    self.config.restart_policy.on_spawn_failure()
                }
            };

            match decision {
                RestartDecision::Stop => return Ok(SupervisorExit::CleanShutdown),
                RestartDecision::Restart { delay } | RestartDecision::RetrySpawn { delay } => {
                    if let Some(reason) = self.pause(delay).await {
                        info!(%reason, "shutdown while waiting to spawn, worker abandoned");
                        self.discard_worker_copy(&command.program);
                        return Ok(SupervisorExit::ShutDown(reason));
                    }
                }
                RestartDecision::GiveUp => {
                    return Err(SupervisorError::RestartLimitExceeded {
                        attempts: self.restart_attempts,
                        last: last_outcome,
                    });
                }
            }
        }
    }

    /// Duplicates the image as a worker copy and builds its command line.
    async fn prepare_worker(&self) -> Result<LaunchCommand, SupervisorError> {
        let image = self.image.clone();
        let copy_dir = self.config.copy_dir.clone();
        let program = tokio::task::spawn_blocking(move || image.duplicate(Role::Worker, copy_dir.as_deref()))
            .await
            .map_err(|err| SupervisorError::Aborted(err.to_string()))?
            .map_err(|err| {
                error!(error = %err, "cannot duplicate executable for worker");
                SupervisorError::Duplication(Arc::new(err))
            })?;
        debug!(program = %program.display(), "worker copy ready");
        Ok(self
            .config
            .launch_command(&self.image, program, &self.args, Role::Worker))
    }

    /// Blocks until the worker terminates or a shutdown is relayed to it.
    async fn watch(
        &mut self,
        mut child: Box<dyn ChildProcess>,
        handle: ChildHandle,
    ) -> Result<Watched, SupervisorError> {
        loop {
            tokio::select! {
                outcome = child.wait() => {
                    return outcome
                        .map(Watched::Exited)
                        .map_err(|err| SupervisorError::Wait(Arc::new(err)));
                }
                Some(msg) = self.rx.recv() => {
                    let Some(reason) = Self::handle_message(msg, Some(handle)) else {
                        continue;
                    };
                    info!(pid = ?handle.pid, %reason, "relaying termination to worker");
                    if let Err(err) = child.terminate() {
                        warn!(pid = ?handle.pid, error = %err, "failed to signal worker");
                    }
                    return Ok(Watched::Shutdown(reason));
                }
            }
        }
    }

    /// deciding: the worker is gone, pick the next state.
    fn decide(&mut self, outcome: ExitOutcome, handle: ChildHandle) -> RestartDecision {
        let policy = &self.config.restart_policy;
        if policy.is_stable(handle.started_at.elapsed()) {
            self.restart_attempts = 0;
        }
        let decision = policy.decide(&outcome, self.restart_attempts);
        match decision {
            RestartDecision::Stop => {
                info!(generation = handle.generation, "process finished with code 0, supervisor shutting down");
            }
            RestartDecision::Restart { delay } => {
                warn!(
                    generation = handle.generation,
                    ?delay,
                    "process finished with {outcome}, restarting"
                );
                self.restart_attempts = self.restart_attempts.saturating_add(1);
            }
            RestartDecision::GiveUp => {
                error!(
                    attempts = self.restart_attempts,
                    "process finished with {outcome}, restart limit reached"
                );
            }
            RestartDecision::RetrySpawn { .. } => {}
        }
        decision
    }

    /// Waits `delay` while still answering messages. Returns the shutdown
    /// reason if one arrived.
    async fn pause(&mut self, delay: Duration) -> Option<ShutdownReason> {
        if delay.is_zero() {
            return self.drain_messages(None);
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return self.drain_messages(None),
                Some(msg) = self.rx.recv() => {
                    if let Some(reason) = Self::handle_message(msg, None) {
                        return Some(reason);
                    }
                }
            }
        }
    }

    /// Handles every queued message without waiting for new ones.
    fn drain_messages(&mut self, current: Option<ChildHandle>) -> Option<ShutdownReason> {
        while let Ok(msg) = self.rx.try_recv() {
            if let Some(reason) = Self::handle_message(msg, current) {
                return Some(reason);
            }
        }
        None
    }

    fn handle_message(msg: SupervisorMessage, current: Option<ChildHandle>) -> Option<ShutdownReason> {
        match msg {
            SupervisorMessage::Shutdown(reason) => Some(reason),
            SupervisorMessage::CurrentChild(reply) => {
                let _ = reply.send(current);
                None
            }
        }
    }

    fn discard_worker_copy(&self, program: &Path) {
        if self.config.cleanup != CleanupPolicy::RemoveWorkerCopies {
            return;
        }
        if let Err(err) = remove_copy(program) {
            warn!(program = %program.display(), error = %err, "cannot remove worker copy");
        }
    }
}
