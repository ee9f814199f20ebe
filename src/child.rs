use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use tokio::time::Instant;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with the given code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
    /// The platform reported neither a code nor a signal.
    Unknown,
}

impl ExitOutcome {
    /// Exit code 0 is an intentional shutdown; everything else is a crash.
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Unknown
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "signal {signal}"),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// The worker currently owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: Option<u32>,
    pub started_at: Instant,
    /// 1 for the first worker of a supervisor, incremented on every spawn.
    pub generation: u64,
}

/// Everything needed to start one copy of the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(OsString, OsString)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: None,
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.current_dir = dir;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// A started child the supervisor can wait on and stop.
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Resolves once the child has terminated.
    async fn wait(&mut self) -> io::Result<ExitOutcome>;

    /// Asks the child to terminate without waiting for it.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Starts child processes. The OS implementation is [`OsSpawner`].
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    async fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>>;
}

/// Spawns real processes with stdin detached and stdout/stderr inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

#[async_trait]
impl Spawner for OsSpawner {
    async fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;
        Ok(Box::new(OsChild { child }))
    }
}

struct OsChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for OsChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        self.child.wait().await.map(ExitOutcome::from)
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::{
            errno::Errno,
            sys::signal::{kill, Signal},
            unistd::Pid,
        };

        // `id()` is None once the child has been reaped.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exit_code_zero_is_clean() {
        assert!(ExitOutcome::Exited(0).is_clean());
        assert!(!ExitOutcome::Exited(1).is_clean());
        assert!(!ExitOutcome::Signaled(15).is_clean());
        assert!(!ExitOutcome::Unknown.is_clean());
    }

    #[cfg(unix)]
    #[test]
    fn outcome_from_raw_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(0)), ExitOutcome::Exited(0));
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(3 << 8)), ExitOutcome::Exited(3));
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(9)), ExitOutcome::Signaled(9));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn os_child_can_be_terminated() {
        let command = LaunchCommand::new("sleep", vec!["30".into()]);
        let mut child = OsSpawner.spawn(&command).await.unwrap();
        assert!(child.id().is_some());
        child.terminate().unwrap();
        let outcome = child.wait().await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled(libc_sigterm()));
    }

    #[cfg(unix)]
    fn libc_sigterm() -> i32 {
        nix::sys::signal::Signal::SIGTERM as i32
    }
}
