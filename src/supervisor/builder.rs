use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    child::LaunchCommand,
    image::{ExecutableImage, COPY_DIR_ENV, ORIGINAL_PATH_ENV},
    policy::RestartPolicy,
    role::{Role, RoleMarkers},
};

/// Working directory of spawned copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkingDir {
    /// The directory the copy lives in, so paths relative to the binary keep working.
    #[default]
    CopyDir,
    /// Whatever directory the spawning process runs in.
    Inherit,
}

/// What happens to worker copies once they are no longer executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Leave the latest worker copy on disk. The next generation replaces it.
    #[default]
    Keep,
    /// Delete a worker's copy as soon as that worker has exited.
    RemoveWorkerCopies,
}

/// Settings shared by the launcher and the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub markers: RoleMarkers,
    pub copy_dir: Option<PathBuf>,
    pub working_dir: WorkingDir,
    pub cleanup: CleanupPolicy,
    pub restart_policy: RestartPolicy,
    /// Append log lines to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorBuilder::new().build()
    }
}

impl SupervisorConfig {
    /// Command that starts `program`, a copy of `image`, in role `next`.
    ///
    /// `program` comes from [`ExecutableImage::copy_path`] and is absolute, so
    /// moving the child into the copy directory cannot break its lookup.
    pub fn launch_command<S: AsRef<OsStr>>(
        &self,
        image: &ExecutableImage,
        program: PathBuf,
        args: &[S],
        next: Role,
    ) -> LaunchCommand {
        let copy_dir = program.parent().map(Path::to_path_buf);
        let current_dir = match self.working_dir {
            WorkingDir::CopyDir => copy_dir.clone(),
            WorkingDir::Inherit => None,
        };
        let mut command = LaunchCommand::new(program, self.markers.rewrite_for(args, next))
            .with_current_dir(current_dir)
            .with_env(ORIGINAL_PATH_ENV, OsString::from(image.path()));
        if let (Some(_), Some(dir)) = (&self.copy_dir, copy_dir) {
            command = command.with_env(COPY_DIR_ENV, dir.into_os_string());
        }
        command
    }

    /// Adopts the copy directory a launcher resolved for this process, if any.
    ///
    /// A relative `copy_dir` means relative to where the launcher was started;
    /// the supervisor runs elsewhere and must not resolve it a second time.
    pub fn inherit_copy_dir(mut self, role: Role) -> Self {
        if role != Role::Launcher {
            if let Some(dir) = std::env::var_os(COPY_DIR_ENV) {
                self.copy_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }
}

/// Builds a [`SupervisorConfig`].
///
/// Defaults restart crashed workers immediately and forever, wait one second
/// after a failed spawn, keep copies next to the original binary and log to
/// stderr.
pub struct SupervisorBuilder {
    markers: RoleMarkers,
    copy_dir: Option<PathBuf>,
    working_dir: WorkingDir,
    cleanup: CleanupPolicy,
    restart_policy: RestartPolicy,
    log_file: Option<PathBuf>,
}

impl SupervisorBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self {
            markers: RoleMarkers::default(),
            copy_dir: None,
            working_dir: WorkingDir::default(),
            cleanup: CleanupPolicy::default(),
            restart_policy: RestartPolicy::default(),
            log_file: None,
        }
    }

    /// Replaces the argument tokens that select roles.
    pub fn with_markers(mut self, markers: RoleMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Writes role-tagged copies into `dir` instead of next to the binary.
    pub fn with_copy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.copy_dir = Some(dir.into());
        self
    }

    pub fn with_working_dir(mut self, working_dir: WorkingDir) -> Self {
        self.working_dir = working_dir;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Sets the maximum number of restarts. Unlimited unless called.
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.restart_policy.max_restarts = Some(max_restarts);
        self
    }

    /// Sets the base delay for restarts, used in exponential backoff.
    pub fn with_base_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_policy.base_delay = delay;
        self
    }

    /// Sets the fixed wait after a worker failed to spawn.
    pub fn with_spawn_retry_delay(mut self, delay: Duration) -> Self {
        self.restart_policy.spawn_retry_delay = delay;
        self
    }

    /// Appends timestamped log lines to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn build(self) -> SupervisorConfig {
        SupervisorConfig {
            markers: self.markers,
            copy_dir: self.copy_dir,
            working_dir: self.working_dir,
            cleanup: self.cleanup,
            restart_policy: self.restart_policy,
            log_file: self.log_file,
        }
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
