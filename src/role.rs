use std::ffi::{OsStr, OsString};

/// The part a running copy of the binary plays in the supervision lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Started by a user without any marker: hands off to a supervisor copy.
    Launcher,
    /// The watchdog that keeps respawning workers.
    Supervisor,
    /// The application itself, running under a supervisor.
    Worker,
    /// Supervision disabled for this invocation.
    Bypass,
}

impl Role {
    /// Filename tag of the copy executed in this role, if the role runs from a copy.
    pub const fn suffix(&self) -> Option<&'static str> {
        match self {
            Self::Supervisor => Some("supervisor"),
            Self::Worker => Some("worker"),
            Self::Launcher | Self::Bypass => None,
        }
    }

    /// Whether the application logic should run in this process.
    pub const fn runs_application(&self) -> bool {
        matches!(self, Self::Worker | Self::Bypass)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Launcher => write!(f, "launcher"),
            Self::Supervisor => write!(f, "supervisor"),
            Self::Worker => write!(f, "worker"),
            Self::Bypass => write!(f, "bypass"),
        }
    }
}

/// The literal argument tokens that select a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMarkers {
    pub supervisor: String,
    pub supervised: String,
    pub bypass: String,
}

impl Default for RoleMarkers {
    fn default() -> Self {
        Self {
            supervisor: "-supervisor".to_string(),
            supervised: "-supervised".to_string(),
            bypass: "-without-supervisor".to_string(),
        }
    }
}

impl RoleMarkers {
    /// Classifies an invocation from its arguments (binary path excluded).
    ///
    /// The bypass token wins wherever it appears. Otherwise the first role
    /// marker found decides, and no marker at all means [`Role::Launcher`].
    pub fn resolve<I, S>(&self, args: I) -> Role
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut role = None;
        for arg in args {
            let arg = arg.as_ref();
            if arg == OsStr::new(&self.bypass) {
                return Role::Bypass;
            }
            if role.is_none() {
                if arg == OsStr::new(&self.supervisor) {
                    role = Some(Role::Supervisor);
                } else if arg == OsStr::new(&self.supervised) {
                    role = Some(Role::Worker);
                }
            }
        }
        role.unwrap_or(Role::Launcher)
    }

    /// Token that makes a process assume `role`.
    pub fn marker_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Supervisor => Some(&self.supervisor),
            Role::Worker => Some(&self.supervised),
            Role::Launcher | Role::Bypass => None,
        }
    }

    fn is_role_marker(&self, arg: &OsStr) -> bool {
        arg == OsStr::new(&self.supervisor) || arg == OsStr::new(&self.supervised)
    }

    /// Arguments for the next hop: every role marker is dropped and the marker
    /// for `next` is appended. Other arguments keep their order.
    pub fn rewrite_for<S: AsRef<OsStr>>(&self, args: &[S], next: Role) -> Vec<OsString> {
        let mut rewritten: Vec<OsString> = args
            .iter()
            .map(AsRef::as_ref)
            .filter(|arg| !self.is_role_marker(arg))
            .map(OsStr::to_os_string)
            .collect();
        if let Some(marker) = self.marker_for(next) {
            rewritten.push(marker.into());
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn absent_or_unknown_marker_is_launcher() {
        let markers = RoleMarkers::default();
        assert_eq!(markers.resolve(args(&[])), Role::Launcher);
        assert_eq!(markers.resolve(args(&["--port", "80", "supervisor"])), Role::Launcher);
    }

    #[test]
    fn first_marker_decides() {
        let markers = RoleMarkers::default();
        assert_eq!(markers.resolve(args(&["a", "-supervisor"])), Role::Supervisor);
        assert_eq!(markers.resolve(args(&["-supervised", "b"])), Role::Worker);
        assert_eq!(
            markers.resolve(args(&["-supervised", "-supervisor"])),
            Role::Worker
        );
    }

    #[test]
    fn bypass_wins_anywhere() {
        let markers = RoleMarkers::default();
        assert_eq!(
            markers.resolve(args(&["-supervisor", "-without-supervisor"])),
            Role::Bypass
        );
        assert_eq!(markers.resolve(args(&["-without-supervisor"])), Role::Bypass);
    }

    #[test]
    fn rewrite_keeps_order_and_single_marker() {
        let markers = RoleMarkers::default();
        let input = args(&["-v", "-supervisor", "serve", "-supervisor", "--fast"]);
        assert_eq!(
            markers.rewrite_for(&input, Role::Worker),
            args(&["-v", "serve", "--fast", "-supervised"])
        );

        let launched = markers.rewrite_for(&args(&["serve"]), Role::Supervisor);
        assert_eq!(launched, args(&["serve", "-supervisor"]));

        let again = markers.rewrite_for(&launched, Role::Supervisor);
        assert_eq!(again, launched);
    }

    #[test]
    fn custom_markers() {
        let markers = RoleMarkers {
            supervisor: "--watchdog".into(),
            supervised: "--child".into(),
            bypass: "--direct".into(),
        };
        assert_eq!(markers.resolve(args(&["--child"])), Role::Worker);
        assert_eq!(markers.resolve(args(&["-supervisor"])), Role::Launcher);
    }
}
