//! Builds the deduplicated peer working set from established connections.
//!
//! A connection is inbound when its local port is the node port, outbound when
//! the local port is none of node/EKG/Prometheus. Peers are keyed by IP only,
//! so one address seen in both directions collapses to a single `Duplex`
//! record. The published snapshot is replaced only when the number of peers
//! changes.

use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::debug;

use super::{Direction, DiscoveredPeer};
use crate::config::Config;
use crate::process::{TcpConnection, TcpState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub node_port: u16,
    pub prometheus_port: u16,
    pub ekg_port: u16,
    /// Our own public address; `None` until resolved
    pub public_ip: Option<IpAddr>,
}

impl DiscoveryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            node_port: config.node.port,
            prometheus_port: config.prometheus.port,
            ekg_port: config.node.ekg_port,
            public_ip: None,
        }
    }

    fn is_self(&self, ip: IpAddr, port: u16) -> bool {
        ip.is_loopback()
            || ip == IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            || (self.public_ip == Some(ip) && port == self.node_port)
    }
}

/// Split established connections into (inbound, outbound) remote endpoints.
/// Self-connections are dropped here.
pub fn partition(
    connections: &[TcpConnection],
    config: &DiscoveryConfig,
) -> (Vec<(IpAddr, u16)>, Vec<(IpAddr, u16)>) {
    let mut inbound = Vec::new();
    let mut outbound = Vec::new();

    for conn in connections.iter().filter(|c| c.state == TcpState::Established) {
        let ip = conn.remote.ip().to_canonical();
        let port = conn.remote.port();
        if config.is_self(ip, port) {
            continue;
        }

        let local_port = conn.local.port();
        if local_port == config.node_port {
            inbound.push((ip, port));
        } else if local_port != config.ekg_port && local_port != config.prometheus_port {
            outbound.push((ip, port));
        }
    }
    (inbound, outbound)
}

/// Merge inbound then outbound endpoints into a set keyed by IP
pub fn dedup(inbound: &[(IpAddr, u16)], outbound: &[(IpAddr, u16)]) -> Vec<DiscoveredPeer> {
    let mut peers: Vec<DiscoveredPeer> = Vec::new();

    let tagged = inbound
        .iter()
        .map(|endpoint| (endpoint, Direction::In))
        .chain(outbound.iter().map(|endpoint| (endpoint, Direction::Out)));

    for (&(ip, port), direction) in tagged {
        match peers.iter().position(|p| p.ip == ip) {
            None => peers.push(DiscoveredPeer {
                ip,
                port,
                direction,
            }),
            Some(idx) if peers[idx].direction != direction => {
                // latest port wins; the merged record moves to the back
                let merged = peers[idx].direction.merge(direction);
                peers.remove(idx);
                peers.push(DiscoveredPeer {
                    ip,
                    port,
                    direction: merged,
                });
            }
            Some(_) => {}
        }
    }
    peers
}

pub struct PeerDiscovery {
    config: RwLock<DiscoveryConfig>,
    snapshot: RwLock<Arc<Vec<DiscoveredPeer>>>,
}

impl PeerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config: RwLock::new(config),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn set_public_ip(&self, ip: Option<IpAddr>) {
        self.config.write().public_ip = ip.map(|ip| ip.to_canonical());
    }

    pub fn public_ip(&self) -> Option<IpAddr> {
        self.config.read().public_ip
    }

    /// Recompute the working set; returns true when the published snapshot changed
    pub fn refresh(&self, connections: &[TcpConnection]) -> bool {
        let (inbound, outbound) = {
            let config = self.config.read();
            partition(connections, &config)
        };
        if inbound.is_empty() && outbound.is_empty() {
            return false;
        }

        let peers = dedup(&inbound, &outbound);
        let mut snapshot = self.snapshot.write();
        if peers.len() == snapshot.len() {
            return false;
        }
        debug!(
            previous = snapshot.len(),
            current = peers.len(),
            inbound = inbound.len(),
            outbound = outbound.len(),
            "Peer set changed"
        );
        *snapshot = Arc::new(peers);
        true
    }

    /// Readers always get a complete list, old or new
    pub fn snapshot(&self) -> Arc<Vec<DiscoveredPeer>> {
        self.snapshot.read().clone()
    }

    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(Vec::new());
    }
}
