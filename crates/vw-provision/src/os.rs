//! Remote operating system classification

use std::collections::HashMap;

use vw_core::{OsClass, ProvisionError, RemoteCommand, RemoteExec, Script};

/// Descriptor read from the remote host
pub const OS_RELEASE: &str = "/etc/os-release";

const DEBIAN_LIKE: &[&str] = &["debian", "ubuntu"];
const RHEL_LIKE: &[&str] = &["rhel", "centos", "fedora", "almalinux", "rocky"];

/// Parse `KEY=value` lines, stripping surrounding quotes
pub fn parse_os_release(raw: &str) -> Result<HashMap<String, String>, ProvisionError> {
    let info: HashMap<String, String> = raw
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (key.trim().to_string(), value.to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect();

    if info.is_empty() {
        return Err(ProvisionError::Detection(format!(
            "no key=value pairs in {}",
            OS_RELEASE
        )));
    }
    Ok(info)
}

/// Bucket a parsed descriptor by `ID`, then by the tokens of `ID_LIKE`
pub fn classify(info: &HashMap<String, String>) -> OsClass {
    let id = info.get("ID").map(|s| s.to_lowercase()).unwrap_or_default();
    let like = info
        .get("ID_LIKE")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let candidates: Vec<&str> = std::iter::once(id.as_str())
        .chain(like.split_whitespace())
        .collect();

    if candidates.iter().any(|c| DEBIAN_LIKE.contains(c)) {
        OsClass::Debian
    } else if candidates.iter().any(|c| RHEL_LIKE.contains(c)) {
        OsClass::Rhel
    } else {
        OsClass::Unsupported(id)
    }
}

/// Read and classify the remote OS
pub async fn detect<R: RemoteExec + ?Sized>(exec: &R) -> Result<OsClass, ProvisionError> {
    let raw = exec
        .run(RemoteCommand::new(Script::ReadFile {
            path: OS_RELEASE.to_string(),
        }))
        .await?;
    let info = parse_os_release(&raw)?;
    let class = classify(&info);
    tracing::debug!(
        "Remote OS: {} ({})",
        class,
        info.get("PRETTY_NAME").map(String::as_str).unwrap_or("?")
    );
    Ok(class)
}
