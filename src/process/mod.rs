//! Lookup and resource usage of the monitored node process.

pub mod connections;

pub use connections::{ConnectionTable, ProcNetConnections, TcpConnection, TcpState};

use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use sysinfo::{Pid, System};
use tracing::debug;

use crate::config::NodeConfig;
use crate::epoch::now_unix_secs;
use crate::error::AppError;

/// Binaries that never expose the node port on their command line
const PID_FILE_REQUIRED: &[&str] = &["amaru"];

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub uptime_secs: u64,
    pub cmdline: Vec<String>,
}

impl ProcessSnapshot {
    /// Value following `flag` on the command line, e.g. `--config <file>`
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.cmdline
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.cmdline.get(idx + 1))
            .map(String::as_str)
    }
}

/// How the node process is identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSelector {
    Pid(u32),
    PidFile(String),
    NameAndPort { binary: String, port: u16 },
}

impl ProcessSelector {
    pub fn from_config(node: &NodeConfig) -> Result<Self, AppError> {
        if let Some(pid) = node.pid {
            return Ok(ProcessSelector::Pid(pid));
        }
        if let Some(pid_file) = node.pid_file.as_ref().filter(|p| !p.is_empty()) {
            return Ok(ProcessSelector::PidFile(pid_file.clone()));
        }
        if PID_FILE_REQUIRED.contains(&node.binary.as_str()) {
            return Err(AppError::Config(format!(
                "a pid file is required for {}",
                node.binary
            )));
        }
        Ok(ProcessSelector::NameAndPort {
            binary: node.binary.clone(),
            port: node.port,
        })
    }
}

pub fn read_pid_file(path: &Path) -> Result<u32, AppError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| AppError::Process(format!("cannot read pid file {}: {}", path.display(), e)))?;
    contents.trim().parse().map_err(|_| {
        AppError::Process(format!(
            "pid file {} does not contain a pid: {:?}",
            path.display(),
            contents.trim()
        ))
    })
}

/// True when `cmdline` mentions `port` as a standalone argument
fn cmdline_has_port(cmdline: &[String], port: u16) -> bool {
    let port = port.to_string();
    cmdline
        .iter()
        .any(|arg| arg == &port || arg.ends_with(&format!("={}", port)))
}

/// Keeps one `sysinfo::System` alive so CPU usage has a previous sample
pub struct ProcessMonitor {
    selector: ProcessSelector,
    system: Mutex<System>,
}

impl ProcessMonitor {
    pub fn new(selector: ProcessSelector) -> Self {
        Self {
            selector,
            system: Mutex::new(System::new()),
        }
    }

    /// Blocking; call from `spawn_blocking`
    pub fn refresh(&self) -> Result<ProcessSnapshot, AppError> {
        let mut system = self.system.lock();
        system.refresh_processes();

        let pid = match &self.selector {
            ProcessSelector::Pid(pid) => Pid::from_u32(*pid),
            ProcessSelector::PidFile(path) => Pid::from_u32(read_pid_file(Path::new(path))?),
            ProcessSelector::NameAndPort { binary, port } => system
                .processes()
                .iter()
                .find(|(_, p)| p.name().contains(binary.as_str()) && cmdline_has_port(p.cmd(), *port))
                .map(|(pid, _)| *pid)
                .ok_or_else(|| {
                    AppError::Process(format!("no {} process listening on port {}", binary, port))
                })?,
        };

        let process = system
            .process(pid)
            .ok_or_else(|| AppError::Process(format!("process {} not found", pid)))?;

        let snapshot = ProcessSnapshot {
            pid: pid.as_u32(),
            name: process.name().to_string(),
            cpu_percent: process.cpu_usage(),
            rss_bytes: process.memory(),
            uptime_secs: now_unix_secs().saturating_sub(process.start_time()),
            cmdline: process.cmd().to_vec(),
        };
        debug!(pid = snapshot.pid, cpu = snapshot.cpu_percent, "Refreshed process");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_precedence() {
        let mut node = NodeConfig::default();
        assert_eq!(
            ProcessSelector::from_config(&node).unwrap(),
            ProcessSelector::NameAndPort {
                binary: "cardano-node".to_string(),
                port: 3001
            }
        );

        node.pid_file = Some("/run/node.pid".to_string());
        assert_eq!(
            ProcessSelector::from_config(&node).unwrap(),
            ProcessSelector::PidFile("/run/node.pid".to_string())
        );

        node.pid = Some(42);
        assert_eq!(
            ProcessSelector::from_config(&node).unwrap(),
            ProcessSelector::Pid(42)
        );
    }

    #[test]
    fn test_amaru_requires_pid_file() {
        let node = NodeConfig {
            binary: "amaru".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ProcessSelector::from_config(&node),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_read_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.pid");
        fs::write(&path, "12345\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), 12345);

        fs::write(&path, "garbage").unwrap();
        assert!(matches!(read_pid_file(&path), Err(AppError::Process(_))));
        assert!(read_pid_file(&dir.path().join("missing.pid")).is_err());
    }

    #[test]
    fn test_cmdline_has_port() {
        let cmd: Vec<String> = ["cardano-node", "run", "--port", "3001"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(cmdline_has_port(&cmd, 3001));
        assert!(!cmdline_has_port(&cmd, 300));
        assert!(cmdline_has_port(&["--port=6000".to_string()], 6000));
    }

    #[test]
    fn test_arg_value() {
        let snapshot = ProcessSnapshot {
            pid: 1,
            name: "cardano-node".to_string(),
            cpu_percent: 0.0,
            rss_bytes: 0,
            uptime_secs: 0,
            cmdline: vec![
                "cardano-node".into(),
                "run".into(),
                "--config".into(),
                "/etc/cardano/config.json".into(),
            ],
        };
        assert_eq!(snapshot.arg_value("--config"), Some("/etc/cardano/config.json"));
        assert_eq!(snapshot.arg_value("--topology"), None);
    }

    #[test]
    fn test_refresh_own_process_by_pid() {
        let monitor = ProcessMonitor::new(ProcessSelector::Pid(std::process::id()));
        let snapshot = monitor.refresh().unwrap();
        assert_eq!(snapshot.pid, std::process::id());
        assert!(snapshot.rss_bytes > 0);
    }

    #[test]
    fn test_refresh_missing_process_fails() {
        let monitor = ProcessMonitor::new(ProcessSelector::NameAndPort {
            binary: "definitely-not-a-node-binary".to_string(),
            port: 1,
        });
        assert!(matches!(monitor.refresh(), Err(AppError::Process(_))));
    }
}
