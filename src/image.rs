//! Self-duplication of the running binary.
//!
//! A binary that is being executed cannot always be rewritten or re-executed
//! in place, so every role transition runs from a fresh, role-tagged copy:
//! `app` becomes `app.supervisor` and `app.worker`, `app.exe` becomes
//! `app.supervisor.exe`.

use std::{
    env,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use crate::role::Role;

/// Environment variable through which the launcher tells its descendants
/// where the original binary lives.
pub const ORIGINAL_PATH_ENV: &str = "SELF_SUPERVISOR_ORIGINAL";

/// Environment variable carrying the absolute copy directory from the
/// launcher to the supervisor, whose working directory may differ.
pub const COPY_DIR_ENV: &str = "SELF_SUPERVISOR_COPY_DIR";

const EXE_EXTENSION: &str = ".exe";

#[cfg(unix)]
const COPY_MODE: u32 = 0o754;

#[derive(Debug, thiserror::Error)]
pub enum DuplicationError {
    #[error("cannot resolve the running executable: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("executable path {0} has no usable file name")]
    InvalidPath(PathBuf),
    #[error("role {0} does not run from a copy")]
    NoCopyForRole(Role),
    #[error("cannot resolve copy directory {path}: {source}")]
    CopyDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot copy into {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("incomplete copy into {path}: {copied} of {expected} bytes")]
    Incomplete {
        path: PathBuf,
        copied: u64,
        expected: u64,
    },
    #[error("cannot make {path} executable: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The on-disk binary every copy is made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    path: PathBuf,
}

impl ExecutableImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locates the original binary of a process running in `role`.
    ///
    /// Supervisors and workers read it from [`ORIGINAL_PATH_ENV`], which the
    /// launcher sets for its descendants. A launcher, or a descendant without
    /// the variable, uses the current executable with any role suffix removed.
    pub fn resolve(role: Role) -> Result<Self, DuplicationError> {
        if role != Role::Launcher {
            if let Some(original) = env::var_os(ORIGINAL_PATH_ENV) {
                return Ok(Self::new(original));
            }
        }
        let current = env::current_exe().map_err(DuplicationError::CurrentExe)?;
        Ok(Self::new(strip_role_suffix(&current)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the copy for `role` goes: next to the original unless `copy_dir` is set.
    ///
    /// The result is absolute. A relative directory is taken relative to the
    /// current working directory, so the path stays valid for a child started
    /// in another one.
    pub fn copy_path(&self, role: Role, copy_dir: Option<&Path>) -> Result<PathBuf, DuplicationError> {
        let suffix = role.suffix().ok_or(DuplicationError::NoCopyForRole(role))?;
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DuplicationError::InvalidPath(self.path.clone()))?;
        let dir = match copy_dir {
            Some(dir) => dir,
            None => self.path.parent().unwrap_or_else(|| Path::new("")),
        };
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let dir = std::path::absolute(dir).map_err(|source| DuplicationError::CopyDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(dir.join(with_role_suffix(file_name, suffix)))
    }

    /// Copies the image byte for byte into a brand-new file tagged for `role`
    /// and returns its path.
    ///
    /// A file already sitting at the target path is unlinked first, so a copy
    /// still being executed by an older process is never written to.
    pub fn duplicate(&self, role: Role, copy_dir: Option<&Path>) -> Result<PathBuf, DuplicationError> {
        let target = self.copy_path(role, copy_dir)?;

        let mut source = File::open(&self.path).map_err(|source| DuplicationError::Open {
            path: self.path.clone(),
            source,
        })?;
        let expected = source
            .metadata()
            .map_err(|source| DuplicationError::Open {
                path: self.path.clone(),
                source,
            })?
            .len();

        remove_copy(&target).map_err(|source| DuplicationError::Create {
            path: target.clone(),
            source,
        })?;
        let mut destination = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|source| DuplicationError::Create {
                path: target.clone(),
                source,
            })?;

        let copied = io::copy(&mut source, &mut destination).map_err(|source| DuplicationError::Copy {
            path: target.clone(),
            source,
        })?;
        if copied != expected {
            return Err(DuplicationError::Incomplete {
                path: target,
                copied,
                expected,
            });
        }
        destination.sync_all().map_err(|source| DuplicationError::Copy {
            path: target.clone(),
            source,
        })?;
        // The descriptor must be closed before anything executes the file.
        drop(destination);

        make_executable(&target).map_err(|source| DuplicationError::Permissions {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }
}

/// Removes a previously made copy. A missing file is not an error.
pub(crate) fn remove_copy(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(COPY_MODE))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Inserts `.{suffix}` before a trailing `.exe`, or appends it otherwise.
pub(crate) fn with_role_suffix(file_name: &str, suffix: &str) -> String {
    match file_name.strip_suffix(EXE_EXTENSION) {
        Some(stem) => format!("{stem}.{suffix}{EXE_EXTENSION}"),
        None => format!("{}.{suffix}", file_name.trim_end_matches('.')),
    }
}

/// Maps a role-tagged copy back to the original file name.
pub(crate) fn strip_role_suffix(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return path.to_path_buf();
    };
    for suffix in [Role::Supervisor, Role::Worker].iter().filter_map(Role::suffix) {
        let tagged_exe = format!(".{suffix}{EXE_EXTENSION}");
        if let Some(stem) = file_name.strip_suffix(&tagged_exe) {
            return path.with_file_name(format!("{stem}{EXE_EXTENSION}"));
        }
        if let Some(stem) = file_name.strip_suffix(&format!(".{suffix}")) {
            return path.with_file_name(stem);
        }
    }
    path.to_path_buf()
}
