use std::{
    fs::OpenOptions,
    io,
    path::Path,
    sync::Mutex,
};

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the log sink for the launcher and supervisor roles.
///
/// Lines are timestamped and appended to `log_file` when one is given, or
/// written to stderr. `RUST_LOG` overrides the default `info` level. A
/// subscriber the application already installed is left in place.
pub fn install(log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = open_append(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    if installed.is_err() {
        debug!("global subscriber already set, keeping it");
    }
    Ok(())
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
