//! Module server management for `startservers`, `stopservers` and
//! `listservers`.
//!
//! Servers started from this host are detached child processes. What is
//! needed to address and stop them again (module id, endpoint, pid) is kept
//! in `<root>/.orthos-servers.json`; nothing else is persisted.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use orthos_client::ModuleClient;
use orthos_common::{ErrorKind, LoadSample, OrthosError, Result};
use orthos_modules::Endpoint;

use crate::server_handle::ServerHandle;

pub const REGISTRY_FILE: &str = ".orthos-servers.json";

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// The operating system's name for this machine, lowercased.
pub fn local_hostname() -> Option<String> {
    let name = gethostname::gethostname().into_string().ok()?;
    let name = name.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Whether `host` names this machine.
///
/// Loopback names and addresses always match, as does `explicit` (from
/// `--host`) when given. Otherwise `host` is compared with the OS hostname,
/// either whole or by its first label so that a fully qualified name of a
/// short hostname matches too.
pub fn is_local_host(host: &str, explicit: Option<&str>) -> bool {
    let host = host.trim().to_lowercase();
    if LOOPBACK_HOSTS.contains(&host.as_str()) {
        return true;
    }
    if host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback()) {
        return true;
    }
    if explicit.is_some_and(|h| h.trim().to_lowercase() == host) {
        return true;
    }
    local_hostname().is_some_and(|name| same_machine(&host, &name))
}

fn same_machine(host: &str, hostname: &str) -> bool {
    if host == hostname {
        return true;
    }
    let short = |name: &str| name.split('.').next().unwrap_or(name).to_string();
    // only compare short names when one side is unqualified
    (!host.contains('.') || !hostname.contains('.')) && short(host) == short(hostname)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub module: String,
    pub endpoint: Endpoint,
    pub pid: u32,
}

/// Servers started from this root, persisted between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRegistry {
    #[serde(skip)]
    path: PathBuf,
    servers: Vec<ServerRecord>,
}

impl ServerRegistry {
    /// Opens the registry under `root`. A missing file is an empty registry.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(REGISTRY_FILE);
        let mut registry = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<ServerRegistry>(&contents).map_err(|e| {
                OrthosError::ConfigInvalid(format!("corrupt server registry {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerRegistry::default(),
            Err(e) => return Err(e.into()),
        };
        registry.path = path;
        Ok(registry)
    }

    /// Writes the registry back, removing the file once it is empty.
    pub fn save(&self) -> Result<()> {
        if self.servers.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn records(&self) -> &[ServerRecord] {
        &self.servers
    }

    pub fn find(&self, endpoint: &Endpoint) -> Option<&ServerRecord> {
        self.servers.iter().find(|r| &r.endpoint == endpoint)
    }

    /// Records a server, replacing any earlier record for its endpoint.
    pub fn insert(&mut self, record: ServerRecord) {
        self.servers.retain(|r| r.endpoint != record.endpoint);
        self.servers.push(record);
    }

    pub fn remove(&mut self, endpoint: &Endpoint) -> Option<ServerRecord> {
        let index = self.servers.iter().position(|r| &r.endpoint == endpoint)?;
        Some(self.servers.remove(index))
    }
}

/// How `startservers` launches a server process.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Executable that understands `<config> serve <id> --bind <addr>`
    pub program: PathBuf,
    pub config_path: PathBuf,
    /// Extra name for this host
    pub host: Option<String>,
    /// How long a new server has to answer its first load query
    pub startup_timeout: Duration,
}

impl StartOptions {
    pub fn new(program: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
            host: None,
            startup_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerOutcome {
    Started { pid: u32 },
    Stopped,
    NotRunning,
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerAction {
    pub module: String,
    pub endpoint: Endpoint,
    pub outcome: ServerOutcome,
}

/// Per-endpoint breakdown of `startservers` or `stopservers`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerReport {
    pub actions: Vec<ServerAction>,
}

impl ServerReport {
    pub fn record(&mut self, module: &str, endpoint: &Endpoint, outcome: ServerOutcome) {
        self.actions.push(ServerAction {
            module: module.to_string(),
            endpoint: endpoint.clone(),
            outcome,
        });
    }

    pub fn record_error(&mut self, module: &str, endpoint: &Endpoint, error: &OrthosError) {
        tracing::error!(module, %endpoint, error = %error, "server action failed");
        self.record(
            module,
            endpoint,
            ServerOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        );
    }

    pub fn is_success(&self) -> bool {
        !self
            .actions
            .iter()
            .any(|a| matches!(a.outcome, ServerOutcome::Failed { .. }))
    }

    pub fn outcome(&self, endpoint: &Endpoint) -> Option<&ServerOutcome> {
        self.actions
            .iter()
            .find(|a| &a.endpoint == endpoint)
            .map(|a| &a.outcome)
    }
}

impl fmt::Display for ServerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            return writeln!(f, "no local servers configured");
        }
        for action in &self.actions {
            write!(f, "  {:<16} {:<22} ", action.module, action.endpoint.to_string())?;
            match &action.outcome {
                ServerOutcome::Started { pid } => writeln!(f, "started (pid {})", pid)?,
                ServerOutcome::Stopped => writeln!(f, "stopped")?,
                ServerOutcome::NotRunning => writeln!(f, "not running")?,
                ServerOutcome::Failed { kind, message } => writeln!(f, "FAILED [{}] {}", kind, message)?,
            }
        }
        Ok(())
    }
}

/// Live state of one configured endpoint.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub module: String,
    pub handle: ServerHandle,
    /// Process id when started from this root
    pub pid: Option<u32>,
}

impl ServerStatus {
    pub fn load(&self) -> Option<LoadSample> {
        self.handle.load
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} {}", self.module, self.handle)?;
        if let Some(pid) = self.pid {
            write!(f, " [pid {}]", pid)?;
        }
        Ok(())
    }
}

/// Fails with `PortInUse` if something already listens on `endpoint`.
pub async fn ensure_port_free(endpoint: &Endpoint) -> Result<()> {
    match tokio::net::TcpListener::bind(endpoint.address()).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            Err(OrthosError::PortInUse(endpoint.address()))
        }
        Err(e) => Err(OrthosError::Connection(format!("cannot bind {}: {}", endpoint, e))),
    }
}

/// Launches a detached server for `module` on `endpoint` and waits until it
/// answers a load query. Returns its pid.
pub async fn spawn_server(module: &str, endpoint: &Endpoint, options: &StartOptions) -> Result<u32> {
    ensure_port_free(endpoint).await?;

    let mut child = Command::new(&options.program)
        .arg(&options.config_path)
        .arg("serve")
        .arg(module)
        .arg("--bind")
        .arg(endpoint.address())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| OrthosError::Transport(format!("cannot launch {}: {}", options.program.display(), e)))?;
    let pid = child.id();
    tracing::info!(module, %endpoint, pid, "server process launched");

    let client = ModuleClient::new(endpoint.address());
    let deadline = Instant::now() + options.startup_timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(OrthosError::Transport(format!(
                "server for '{}' exited during startup ({})",
                module, status
            )));
        }
        if client.load(Duration::from_millis(200)).await.is_ok() {
            return Ok(pid);
        }
        if Instant::now() >= deadline {
            // best effort, the process may already be gone
            let _ = child.kill();
            return Err(OrthosError::Unreachable {
                endpoint: endpoint.to_string(),
                message: format!(
                    "server did not answer within {}ms",
                    options.startup_timeout.as_millis()
                ),
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Sends `Shutdown` to the server on `endpoint`. A server that cannot be
/// reached is reported as not running.
pub async fn stop_server(endpoint: &Endpoint, force: bool, timeout: Duration) -> Result<ServerOutcome> {
    match ModuleClient::new(endpoint.address()).shutdown(force, timeout).await {
        Ok(()) => Ok(ServerOutcome::Stopped),
        Err(OrthosError::Unreachable { .. }) | Err(OrthosError::Connection(_)) => Ok(ServerOutcome::NotRunning),
        Err(e) => Err(e),
    }
}
