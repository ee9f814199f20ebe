//! # self-supervisor
//!
//! `self-supervisor` makes a binary restart itself when it crashes, without
//! an external process manager.
//!
//! Started normally, the binary copies itself to `app.supervisor` and hands
//! off to that copy. The supervisor copies the binary again to `app.worker`,
//! runs it, and waits. A worker that exits with code 0 ends the whole lineage;
//! any other exit, or death by signal, gets a fresh worker. SIGINT and SIGTERM
//! received by the supervisor are forwarded to the worker as SIGTERM before the
//! supervisor exits.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use self_supervisor::{init, SupervisorBuilder};
//!
//! fn main() -> anyhow::Result<()> {
//!     // Returns only in the worker (or bypass) role.
//!     init(SupervisorBuilder::new().with_log_file("log_supervisor.txt").build())?;
//!
//!     println!("doing the actual work");
//!     Ok(())
//! }
//! ```
//!
//! ## Roles
//!
//! | Marker                | Role       | Does                                              |
//! | --------------------- | ---------- | ------------------------------------------------- |
//! | none                  | launcher   | duplicates itself as supervisor, exits 0          |
//! | `-supervisor`         | supervisor | spawns and restarts `-supervised` worker copies   |
//! | `-supervised`         | worker     | runs the application                              |
//! | `-without-supervisor` | bypass     | runs the application with no supervision at all   |
//!
//! ## Configuration
//!
//! [`SupervisorBuilder`] sets the restart policy (unlimited immediate restarts
//! by default, optional cap and exponential backoff), the spawn retry delay,
//! where copies are written, the working directory of copies, whether worker
//! copies are deleted after use, and the log file.

pub use bootstrap::{init, launch, run_role, BootstrapError};
pub use child::{ChildHandle, ChildProcess, ExitOutcome, LaunchCommand, OsSpawner, Spawner};
pub use image::{DuplicationError, ExecutableImage, COPY_DIR_ENV, ORIGINAL_PATH_ENV};
pub use policy::{RestartDecision, RestartPolicy};
pub use role::{Role, RoleMarkers};
pub use signal::{RelayGuard, SignalRelay};
pub use supervisor::{
    builder::{CleanupPolicy, SupervisorBuilder, SupervisorConfig, WorkingDir},
    handle::{ShutdownReason, SupervisorHandle, SupervisorHandleError},
    Supervisor, SupervisorError, SupervisorExit,
};

mod bootstrap;
mod child;
mod image;
mod logging;
mod policy;
mod role;
mod signal;
mod supervisor;
