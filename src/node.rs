//! Facts about the monitored node that change rarely: version, role, P2P mode,
//! and our own public address.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::AppError;
use crate::metrics::NodeMetrics;
use crate::network_type::NetworkType;
use crate::process::ProcessSnapshot;

pub const NOT_AVAILABLE: &str = "N/A";

const PUBLIC_IP_ENDPOINT: &str = "https://api.ipify.org";
const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersion {
    pub version: String,
    /// First 8 characters of the git revision
    pub revision: String,
}

impl NodeVersion {
    /// Parse `<binary> version` output, e.g.
    /// `cardano-node 8.7.3 - linux-x86_64 - ghc-8.10\ngit rev a5e7d8...`
    pub fn parse(output: &str) -> Option<Self> {
        let mut lines = output.lines();
        let version = lines.next()?.split_whitespace().nth(1)?.to_string();
        let revision = lines
            .find_map(|line| {
                let mut words = line.split_whitespace();
                words
                    .by_ref()
                    .find(|w| *w == "rev")
                    .and_then(|_| words.next())
            })
            .map(|rev| rev.chars().take(8).collect())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        Some(Self { version, revision })
    }

    pub async fn query(binary: &str) -> Result<Self, AppError> {
        let output = Command::new(binary)
            .arg("version")
            .output()
            .await
            .map_err(|e| AppError::Process(format!("cannot run {} version: {}", binary, e)))?;
        if !output.status.success() {
            return Err(AppError::Process(format!(
                "{} version exited with {}",
                binary, output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse(&stdout).ok_or_else(|| {
            AppError::Process(format!("unrecognised version output: {:?}", stdout.trim()))
        })
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rev {})", self.version, self.revision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Relay,
    Core,
}

impl Role {
    pub fn detect(block_producer: bool, metrics: Option<&NodeMetrics>) -> Self {
        let leads = metrics.map(|m| m.about_to_lead > 0).unwrap_or(false);
        if block_producer || leads {
            Role::Core
        } else {
            Role::Relay
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Relay => write!(f, "Relay"),
            Role::Core => write!(f, "Core"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeConfigFile {
    #[serde(rename = "EnableP2P", default)]
    enable_p2p: bool,
}

/// P2P mode of the node. Only mainnet nodes may still run the legacy
/// topology; there the node's own JSON config decides. `current` is kept
/// when nothing conclusive can be read.
pub fn detect_p2p(network: NetworkType, process: Option<&ProcessSnapshot>, current: bool) -> bool {
    if network != NetworkType::Mainnet {
        return current;
    }
    let Some(process) = process else {
        return current;
    };
    if process.cmdline.iter().any(|arg| arg.contains("p2p")) {
        return current;
    }
    match process.arg_value("--config") {
        Some(path) => read_enable_p2p(Path::new(path)).unwrap_or(current),
        None => current,
    }
}

/// `None` when the file cannot be read; unparsable content means disabled
fn read_enable_p2p(path: &Path) -> Option<bool> {
    let contents = fs::read_to_string(path).ok()?;
    Some(
        serde_json::from_str::<NodeConfigFile>(&contents)
            .map(|c| c.enable_p2p)
            .unwrap_or(false),
    )
}

/// Our public address as seen from the internet, best effort
pub async fn fetch_public_ip() -> Result<IpAddr, AppError> {
    let client = reqwest::Client::builder()
        .timeout(PUBLIC_IP_TIMEOUT)
        .build()?;
    let body = client
        .get(PUBLIC_IP_ENDPOINT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let ip = body
        .trim()
        .parse()
        .map_err(|_| AppError::Process(format!("invalid public ip response: {:?}", body.trim())))?;
    debug!(%ip, "Resolved public IP");
    Ok(ip)
}
