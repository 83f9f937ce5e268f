//! Command-line wrapping and output redaction

use vw_core::quote;

/// How a command gains superuser rights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Run as the login user
    None,
    /// `sudo -S` with the password written to stdin
    Password,
    /// `sudo -n`, relying on passwordless sudo
    NonInteractive,
}

impl Elevation {
    /// Pick the elevation mode for one command
    pub fn select(elevated: bool, is_root: bool, has_password: bool) -> Self {
        match (elevated, is_root, has_password) {
            (false, _, _) | (true, true, _) => Elevation::None,
            (true, false, true) => Elevation::Password,
            (true, false, false) => Elevation::NonInteractive,
        }
    }
}

/// Wrap a script for execution through a login shell
pub fn wrap(script: &str, elevation: Elevation) -> String {
    let shell = format!("bash -lc {}", quote(script));
    match elevation {
        Elevation::None => shell,
        Elevation::Password => format!("sudo -S -p '' {}", shell),
        Elevation::NonInteractive => format!("sudo -n {}", shell),
    }
}

/// Whether a terminal should be requested
///
/// A piped sudo password must never meet a terminal, which would echo it.
pub fn wants_pty(interactive: bool, elevation: Elevation) -> bool {
    interactive && elevation != Elevation::Password
}

/// Replace every occurrence of the secret with `***`
pub fn redact(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_selection() {
        assert_eq!(Elevation::select(false, false, true), Elevation::None);
        assert_eq!(Elevation::select(true, true, true), Elevation::None);
        assert_eq!(Elevation::select(true, false, true), Elevation::Password);
        assert_eq!(
            Elevation::select(true, false, false),
            Elevation::NonInteractive
        );
    }

    #[test]
    fn test_wrap_quotes_script() {
        assert_eq!(
            wrap("systemctl is-active wg-quick@wg0 || true", Elevation::None),
            "bash -lc 'systemctl is-active wg-quick@wg0 || true'"
        );
        assert_eq!(
            wrap("echo 'hi'", Elevation::Password),
            r"sudo -S -p '' bash -lc 'echo '\''hi'\'''"
        );
        assert_eq!(
            wrap("true", Elevation::NonInteractive),
            "sudo -n bash -lc true"
        );
    }

    #[test]
    fn test_no_pty_when_piping_password() {
        assert!(!wants_pty(true, Elevation::Password));
        assert!(wants_pty(true, Elevation::NonInteractive));
        assert!(!wants_pty(false, Elevation::None));
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("[sudo] hunter2 incorrect hunter2", Some("hunter2")),
            "[sudo] *** incorrect ***"
        );
        assert_eq!(redact("plain", Some("")), "plain");
        assert_eq!(redact("plain", None), "plain");
    }
}
