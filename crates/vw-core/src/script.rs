//! Typed remote scripts
//!
//! Every remote operation with a known shape is a [`Script`] variant built
//! from structured fields. Rendering quotes every path and value through
//! [`quote`], so the generated shell text only ever contains literals the
//! builder placed there.

use std::fmt;

/// Heredoc delimiter for file bodies written by [`Script::WriteFile`]
pub const HEREDOC_DELIMITER: &str = "VPN_WIZARD_EOF";

/// A remote script with a fixed shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Print a file's contents
    ReadFile { path: String },

    /// Print `yes` if the regular file exists, `no` otherwise
    FileExists { path: String },

    /// Print the full paths of `*.<extension>` files in `dir`, C-locale sorted
    ListFiles { dir: String, extension: String },

    /// Print the concatenation of all `*.<extension>` files in `dir`
    ConcatFiles { dir: String, extension: String },

    /// Atomically replace `path` with `contents` and set its mode
    WriteFile {
        path: String,
        contents: String,
        mode: u32,
    },

    /// Append `block` to an existing file unless `marker` already occurs in it
    AppendIfMissing {
        path: String,
        marker: String,
        block: String,
    },

    /// Remove files, ignoring ones that do not exist
    RemoveFiles { paths: Vec<String> },

    /// Create a directory and its parents
    MakeDir { path: String },

    /// Generate a key pair with `<tool> genkey | <tool> pubkey` unless the private key exists
    GenerateKeyPair {
        tool: String,
        private_key: String,
        public_key: String,
    },

    /// Copy `source` to `<prefix>.<timestamp>` if it exists and print the new path
    Backup { source: String, prefix: String },

    /// Print `<prefix>.*` paths, newest first
    ListBackups { prefix: String },

    /// Copy a backup over the live file and restrict its permissions
    Restore { backup: String, target: String },

    /// Restart a systemd unit, optionally detached after a delay in seconds
    RestartService { unit: String, delay: Option<u32> },

    /// A fixed-shape command assembled from quoted pieces
    Shell(String),
}

impl Script {
    /// Render the script as shell text
    pub fn render(&self) -> String {
        match self {
            Script::ReadFile { path } => format!("cat -- {}", quote(path)),

            Script::FileExists { path } => {
                format!("test -f {} && echo yes || echo no", quote(path))
            }

            Script::ListFiles { dir, extension } => format!(
                "if [ -d {dir} ]; then find {dir} -maxdepth 1 -type f -name {pattern} | LC_ALL=C sort; fi",
                dir = quote(dir),
                pattern = quote(&format!("*.{}", extension)),
            ),

            Script::ConcatFiles { dir, extension } => format!(
                "if [ -d {dir} ]; then find {dir} -maxdepth 1 -type f -name {pattern} | LC_ALL=C sort | xargs -r cat --; fi",
                dir = quote(dir),
                pattern = quote(&format!("*.{}", extension)),
            ),

            Script::WriteFile {
                path,
                contents,
                mode,
            } => {
                let mut body = contents.clone();
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                format!(
                    "set -e\n\
                     umask 077\n\
                     tmp=$(mktemp {template})\n\
                     cat > \"$tmp\" <<'{eof}'\n\
                     {body}{eof}\n\
                     chmod {mode:o} \"$tmp\"\n\
                     mv -f \"$tmp\" {path}",
                    template = quote(&format!("{}.XXXXXX", path)),
                    eof = HEREDOC_DELIMITER,
                    body = body,
                    mode = mode,
                    path = quote(path),
                )
            }

            Script::AppendIfMissing {
                path,
                marker,
                block,
            } => {
                let mut body = block.clone();
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                format!(
                    "if [ -f {path} ] && ! grep -qF {marker} {path}; then\n\
                     cat >> {path} <<'{eof}'\n\
                     {body}{eof}\n\
                     fi",
                    path = quote(path),
                    marker = quote(marker),
                    eof = HEREDOC_DELIMITER,
                    body = body,
                )
            }

            Script::RemoveFiles { paths } => {
                let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
                format!("rm -f -- {}", quoted.join(" "))
            }

            Script::MakeDir { path } => format!("mkdir -p -- {}", quote(path)),

            Script::GenerateKeyPair {
                tool,
                private_key,
                public_key,
            } => format!(
                "if [ ! -f {private} ]; then\n  umask 077\n  {tool} genkey | tee {private} | {tool} pubkey > {public}\nfi",
                private = quote(private_key),
                public = quote(public_key),
                tool = quote(tool),
            ),

            Script::Backup { source, prefix } => format!(
                concat!(
                    "if [ -f {source} ]; then\n",
                    "  ts=$(date +%Y%m%d%H%M%S)\n",
                    "  dest={prefix}.\"$ts\"\n",
                    "  n=0\n",
                    "  while [ -e \"$dest\" ]; do\n",
                    "    n=$((n + 1))\n",
                    "    dest={prefix}.\"$ts\"-$(printf '%03d' \"$n\")\n",
                    "  done\n",
                    "  cp -p {source} \"$dest\"\n",
                    "  echo \"$dest\"\n",
                    "fi",
                ),
                source = quote(source),
                prefix = quote(prefix),
            ),

            Script::ListBackups { prefix } => format!(
                "ls -1d -- {}.* 2>/dev/null | LC_ALL=C sort -r || true",
                quote(prefix)
            ),

            Script::Restore { backup, target } => format!(
                "cp -f -- {backup} {target} && chmod 600 {target}",
                backup = quote(backup),
                target = quote(target),
            ),

            Script::RestartService { unit, delay: None } => {
                format!("systemctl restart {}", quote(unit))
            }

            Script::RestartService {
                unit,
                delay: Some(secs),
            } => {
                let inner = format!("sleep {}; systemctl restart {}", secs, quote(unit));
                format!("nohup sh -c {} >/dev/null 2>&1 &", quote(&inner))
            }

            Script::Shell(text) => text.clone(),
        }
    }

    /// One-line description safe for logs and error messages
    ///
    /// File bodies are never included since they may carry private keys.
    pub fn summary(&self) -> String {
        match self {
            Script::WriteFile { path, .. } => format!("write {}", path),
            Script::AppendIfMissing { path, marker, .. } => {
                format!("append block '{}' to {}", marker, path)
            }
            Script::Shell(text) => text.lines().next().unwrap_or_default().to_string(),
            other => {
                let rendered = other.render();
                rendered.lines().next().unwrap_or_default().to_string()
            }
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Quote a value for POSIX shells
///
/// Values made only of characters that are never special to the shell are
/// returned as is; anything else is wrapped in single quotes with embedded
/// single quotes spliced as `'\''`.
pub fn quote(value: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !value.is_empty() && value.chars().all(is_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_values_untouched() {
        assert_eq!(quote("/etc/wireguard/wg0.conf"), "/etc/wireguard/wg0.conf");
        assert_eq!(quote("10.10.0.1/24"), "10.10.0.1/24");
    }

    #[test]
    fn test_quote_special_values() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote("*.conf"), "'*.conf'");
    }

    #[test]
    fn test_write_file_uses_quoted_heredoc() {
        let script = Script::WriteFile {
            path: "/etc/wireguard/wg0.conf".into(),
            contents: "[Interface]\nPrivateKey = $abc".into(),
            mode: 0o600,
        };
        let text = script.render();
        assert!(text.contains("<<'VPN_WIZARD_EOF'"));
        assert!(text.contains("PrivateKey = $abc\nVPN_WIZARD_EOF\n"));
        assert!(text.contains("chmod 600"));
        assert!(text.ends_with("mv -f \"$tmp\" /etc/wireguard/wg0.conf"));
    }

    #[test]
    fn test_summary_hides_file_body() {
        let script = Script::WriteFile {
            path: "/etc/wireguard/clients/a.conf".into(),
            contents: "PrivateKey = secret".into(),
            mode: 0o600,
        };
        assert_eq!(script.summary(), "write /etc/wireguard/clients/a.conf");
        assert!(!script.to_string().contains("secret"));
    }

    #[test]
    fn test_delayed_restart_is_detached() {
        let script = Script::RestartService {
            unit: "wg-quick@wg0".into(),
            delay: Some(1),
        };
        assert_eq!(
            script.render(),
            "nohup sh -c 'sleep 1; systemctl restart wg-quick@wg0' >/dev/null 2>&1 &"
        );
    }

    #[test]
    fn test_backup_never_overwrites_same_second_copy() {
        let script = Script::Backup {
            source: "/etc/wireguard/wg0.conf".into(),
            prefix: "/etc/wireguard/wg0.conf.bak".into(),
        };
        let rendered = script.render();
        assert!(rendered.contains("dest=/etc/wireguard/wg0.conf.bak.\"$ts\"\n"));
        assert!(rendered.contains("while [ -e \"$dest\" ]; do"));
        assert!(rendered.contains("dest=/etc/wireguard/wg0.conf.bak.\"$ts\"-$(printf '%03d' \"$n\")"));
        assert!(rendered.contains("cp -p /etc/wireguard/wg0.conf \"$dest\""));
        assert!(rendered.ends_with("echo \"$dest\"\nfi"));
    }

    #[test]
    fn test_list_backups_newest_first() {
        let script = Script::ListBackups {
            prefix: "/etc/wireguard/wg0.conf.bak".into(),
        };
        assert_eq!(
            script.render(),
            "ls -1d -- /etc/wireguard/wg0.conf.bak.* 2>/dev/null | LC_ALL=C sort -r || true"
        );
    }
}
