use std::{env, ffi::OsString, io, path::PathBuf};

use tracing::{error, info};

use crate::{
    child::{OsSpawner, Spawner},
    image::{DuplicationError, ExecutableImage},
    logging,
    role::Role,
    signal::SignalRelay,
    supervisor::{builder::SupervisorConfig, Supervisor, SupervisorError, SupervisorExit},
};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Duplication(#[from] DuplicationError),
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open log sink: {0}")]
    Logging(#[source] io::Error),
    #[error("cannot start async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("cannot subscribe to termination signals: {0}")]
    Signals(#[source] io::Error),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Entry point for a self-supervising binary. Call it first thing in `main`,
/// before starting any async runtime of your own.
///
/// Returns the role when this process should run the application:
/// [`Role::Worker`] under a supervisor, or [`Role::Bypass`] when the bypass
/// token was given. A launcher or supervisor never returns `Ok`: it exits the
/// process with status 0 once its job is done. Errors are setup failures the
/// caller should treat as fatal.
///
/// ```rust,no_run
/// use self_supervisor::{init, SupervisorBuilder};
///
/// fn main() -> anyhow::Result<()> {
///     init(SupervisorBuilder::new().with_log_file("log_supervisor.txt").build())?;
///     // application logic
///     Ok(())
/// }
/// ```
pub fn init(config: SupervisorConfig) -> Result<Role, BootstrapError> {
    let args: Vec<OsString> = env::args_os().skip(1).collect();
    let role = config.markers.resolve(&args);
    if role.runs_application() {
        return Ok(role);
    }

    logging::install(config.log_file.as_deref()).map_err(BootstrapError::Logging)?;
    info!(?args, pid = std::process::id(), %role, "self-supervisor init");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(BootstrapError::Runtime)?;
    match runtime.block_on(run_role(role, config, args)) {
        Ok(()) => {
            drop(runtime);
            std::process::exit(0)
        }
        Err(err) => {
            error!(error = %err, %role, "fatal error");
            Err(err)
        }
    }
}

/// Performs the launcher or supervisor part of [`init`] inside an existing
/// runtime. Returns once the role is done; application roles return at once.
pub async fn run_role(role: Role, config: SupervisorConfig, args: Vec<OsString>) -> Result<(), BootstrapError> {
    match role {
        Role::Launcher => {
            let image = ExecutableImage::resolve(role)?;
            launch(&config, &image, &args, &OsSpawner).await.map(|_| ())
        }
        Role::Supervisor => supervise(config, args).await,
        Role::Worker | Role::Bypass => Ok(()),
    }
}

/// Hands off to a supervisor copy of `image` and returns its pid without
/// waiting for it.
pub async fn launch<S: Spawner>(
    config: &SupervisorConfig,
    image: &ExecutableImage,
    args: &[OsString],
    spawner: &S,
) -> Result<Option<u32>, BootstrapError> {
    let program = image.duplicate(Role::Supervisor, config.copy_dir.as_deref())?;
    let command = config.launch_command(image, program, args, Role::Supervisor);
    let child = spawner
        .spawn(&command)
        .await
        .map_err(|source| BootstrapError::Spawn {
            program: command.program.clone(),
            source,
        })?;
    let pid = child.id();
    info!(?pid, program = %command.program.display(), "handed off to supervisor");
    Ok(pid)
}

async fn supervise(config: SupervisorConfig, args: Vec<OsString>) -> Result<(), BootstrapError> {
    let image = ExecutableImage::resolve(Role::Supervisor)?;
    let config = config.inherit_copy_dir(Role::Supervisor);
    let relay = SignalRelay::install().map_err(BootstrapError::Signals)?;
    let handle = Supervisor::new(config, image, OsSpawner, args).run();
    let guard = relay.forward_to(handle.clone());

    let exit = handle.wait().await;
    guard.stop().await;
    match exit? {
        SupervisorExit::CleanShutdown => info!("supervisor exiting after clean worker shutdown"),
        SupervisorExit::ShutDown(reason) => info!(%reason, "supervisor exiting after relayed shutdown"),
    }
    Ok(())
}
