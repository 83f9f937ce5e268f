//! In-memory remote host for provisioner tests
//!
//! Typed scripts are interpreted against a file map. Free shell commands are
//! answered by the first registered responder whose pattern occurs in the
//! command text, or succeed with empty output.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vw_core::config::ProvisionConfig;
use vw_core::{CommandError, CommandOutput, Protocol, RemoteCommand, RemoteExec, Script};
use vw_provision::{ObfuscationParams, Provisioner};

pub const HOST: &str = "203.0.113.7";

pub const DEBIAN_OS_RELEASE: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\nVERSION_ID=\"12\"\n";

type Responder = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

#[derive(Default)]
struct State {
    files: BTreeMap<String, String>,
    keys: u32,
    backups: u32,
    log: Vec<String>,
    closed: bool,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
    responders: Mutex<Vec<(String, Responder)>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A Debian host with no tunnel installed
    pub fn debian() -> Self {
        let host = Self::new();
        host.set_file("/etc/os-release", DEBIAN_OS_RELEASE);
        host
    }

    pub fn set_file(&self, path: &str, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Answer shell commands containing `pattern`
    pub fn respond(
        &self,
        pattern: &str,
        responder: impl Fn(&str) -> CommandOutput + Send + Sync + 'static,
    ) {
        self.responders
            .lock()
            .unwrap()
            .push((pattern.to_string(), Box::new(responder)));
    }

    /// Answer shell commands containing `pattern` with fixed stdout
    pub fn respond_text(&self, pattern: &str, stdout: &str) {
        let stdout = stdout.to_string();
        self.respond(pattern, move |_| CommandOutput::success(stdout.clone()));
    }

    /// Fail shell commands containing `pattern` with the given stderr
    pub fn respond_failure(&self, pattern: &str, exit_code: u32, stderr: &str) {
        let stderr = stderr.to_string();
        self.respond(pattern, move |_| failure(exit_code, &stderr));
    }

    /// Every command run so far, rendered
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn count_exact(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }

    /// Make every later command fail as a dropped channel would
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    fn interpret(&self, script: &Script) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        match script {
            Script::ReadFile { path } => match state.files.get(path) {
                Some(contents) => CommandOutput::success(contents.clone()),
                None => failure(1, &format!("cat: {}: No such file or directory", path)),
            },
            Script::FileExists { path } => {
                let answer = if state.files.contains_key(path) { "yes\n" } else { "no\n" };
                CommandOutput::success(answer)
            }
            Script::ListFiles { dir, extension } => {
                let listing: String = files_in(&state.files, dir, extension)
                    .map(|(path, _)| format!("{}\n", path))
                    .collect();
                CommandOutput::success(listing)
            }
            Script::ConcatFiles { dir, extension } => {
                let body: String = files_in(&state.files, dir, extension)
                    .map(|(_, contents)| contents.clone())
                    .collect();
                CommandOutput::success(body)
            }
            Script::WriteFile { path, contents, .. } => {
                let mut body = contents.clone();
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                state.files.insert(path.clone(), body);
                CommandOutput::success("")
            }
            Script::AppendIfMissing {
                path,
                marker,
                block,
            } => {
                if let Some(existing) = state.files.get_mut(path) {
                    if !existing.contains(marker.as_str()) {
                        existing.push_str(block);
                    }
                }
                CommandOutput::success("")
            }
            Script::RemoveFiles { paths } => {
                for path in paths {
                    state.files.remove(path);
                }
                CommandOutput::success("")
            }
            Script::MakeDir { .. } => CommandOutput::success(""),
            Script::GenerateKeyPair {
                private_key,
                public_key,
                ..
            } => {
                if !state.files.contains_key(private_key) {
                    state.keys += 1;
                    let n = state.keys;
                    state.files.insert(private_key.clone(), format!("priv-{}\n", n));
                    state.files.insert(public_key.clone(), format!("pub-{}\n", n));
                }
                CommandOutput::success("")
            }
            Script::Backup { source, prefix } => match state.files.get(source).cloned() {
                Some(contents) => {
                    state.backups += 1;
                    let path = format!("{}.{}", prefix, 20260101000000u64 + state.backups as u64);
                    state.files.insert(path.clone(), contents);
                    CommandOutput::success(format!("{}\n", path))
                }
                None => CommandOutput::success(""),
            },
            Script::ListBackups { prefix } => {
                let marker = format!("{}.", prefix);
                let mut found: Vec<&String> =
                    state.files.keys().filter(|p| p.starts_with(&marker)).collect();
                found.sort_by(|a, b| b.cmp(a));
                let listing: String = found.iter().map(|p| format!("{}\n", p)).collect();
                CommandOutput::success(listing)
            }
            Script::Restore { backup, target } => match state.files.get(backup).cloned() {
                Some(contents) => {
                    state.files.insert(target.clone(), contents);
                    CommandOutput::success("")
                }
                None => failure(1, "cp: cannot stat backup"),
            },
            Script::RestartService { .. } => CommandOutput::success(""),
            Script::Shell(text) => {
                drop(state);
                let responders = self.responders.lock().unwrap();
                responders
                    .iter()
                    .find(|(pattern, _)| text.contains(pattern.as_str()))
                    .map(|(_, responder)| responder(text))
                    .unwrap_or_else(|| CommandOutput::success(""))
            }
        }
    }
}

fn files_in<'a>(
    files: &'a BTreeMap<String, String>,
    dir: &'a str,
    extension: &'a str,
) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
    let suffix = format!(".{}", extension);
    files.iter().filter(move |(path, _)| {
        path.rsplit_once('/')
            .map(|(parent, file)| parent == dir && file.ends_with(&suffix))
            .unwrap_or(false)
    })
}

pub fn failure(exit_code: u32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

#[async_trait]
impl RemoteExec for FakeHost {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, CommandError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(CommandError::Channel("channel closed".to_string()));
            }
            state.log.push(command.render());
        }
        let output = self.interpret(&command.script);
        if command.check {
            output.into_checked(command)
        } else {
            Ok(output)
        }
    }

    fn host(&self) -> &str {
        HOST
    }
}

/// Counts calls and answers the first `failures` of them with a failure
pub fn flaky(
    failures: u32,
    stderr: &'static str,
    calls: Arc<AtomicU32>,
) -> impl Fn(&str) -> CommandOutput + Send + Sync + 'static {
    move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            failure(100, stderr)
        } else {
            CommandOutput::success("")
        }
    }
}

/// Fixed parameters so generated configs are predictable
pub fn obfuscation() -> ObfuscationParams {
    ObfuscationParams {
        jc: 2,
        jmin: 40,
        jmax: 70,
        s1: 20,
        s2: 30,
        h1: 111_111_111,
        h2: 222_222_222,
        h3: 333_333_333,
        h4: 444_444_444,
    }
}

pub fn params(protocol: Protocol) -> ProvisionConfig {
    ProvisionConfig {
        protocol,
        auto_mtu: false,
        ..ProvisionConfig::default()
    }
}

pub fn provisioner(host: Arc<FakeHost>, protocol: Protocol) -> Provisioner<Arc<FakeHost>> {
    Provisioner::with_obfuscation(host, params(protocol), obfuscation())
}

/// A host after a successful provision run
pub async fn provisioned(protocol: Protocol) -> (Arc<FakeHost>, Provisioner<Arc<FakeHost>>) {
    let host = Arc::new(FakeHost::debian());
    host.respond_text("command -v awg", "installed");
    let mut prov = provisioner(host.clone(), protocol);
    prov.provision().await.expect("provision");
    (host, prov)
}

/// Public keys of the peer blocks of an interface file
pub fn peer_keys(conf: &str) -> Vec<String> {
    conf.lines()
        .filter_map(|line| line.strip_prefix("PublicKey = "))
        .map(str::to_string)
        .collect()
}
