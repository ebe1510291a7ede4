//! Shared state owned by `main` and handed to every task as `Arc<AppState>`.
//!
//! Background tasks publish whole values (metrics snapshot, process snapshot,
//! peer list); the render loop only reads them.

use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::epoch::{self, ChainPosition, TipStatus};
use crate::failure::FailureCounter;
use crate::genesis::GenesisModel;
use crate::log_buffer::LogBuffer;
use crate::metrics::NodeMetrics;
use crate::node::{NodeVersion, Role};
use crate::peers::{LatencyProber, PeerDiscovery};
use crate::process::ProcessSnapshot;

pub struct AppState {
    pub config: Config,
    pub genesis: GenesisModel,
    pub failures: FailureCounter,
    pub discovery: PeerDiscovery,
    pub prober: LatencyProber,
    pub log_buffer: Arc<LogBuffer>,
    metrics: RwLock<Option<Arc<NodeMetrics>>>,
    process: RwLock<Option<ProcessSnapshot>>,
    node_version: RwLock<Option<NodeVersion>>,
    chain: RwLock<ChainPosition>,
    role: RwLock<Role>,
    p2p: AtomicBool,
}

impl AppState {
    pub fn new(
        config: Config,
        genesis: GenesisModel,
        discovery: PeerDiscovery,
        prober: LatencyProber,
        log_buffer: Arc<LogBuffer>,
    ) -> Self {
        let failures = FailureCounter::new(config.app.retries);
        let role = Role::detect(config.node.block_producer, None);
        let chain = ChainPosition::at(&genesis, epoch::now_unix_secs());
        Self {
            config,
            genesis,
            failures,
            discovery,
            prober,
            log_buffer,
            metrics: RwLock::new(None),
            process: RwLock::new(None),
            node_version: RwLock::new(None),
            chain: RwLock::new(chain),
            role: RwLock::new(role),
            p2p: AtomicBool::new(true),
        }
    }

    pub fn metrics(&self) -> Option<Arc<NodeMetrics>> {
        self.metrics.read().clone()
    }

    pub fn set_metrics(&self, metrics: NodeMetrics) {
        let metrics = Arc::new(metrics);
        *self.metrics.write() = Some(metrics.clone());
        self.refresh_role_with(Some(&metrics));
    }

    pub fn process(&self) -> Option<ProcessSnapshot> {
        self.process.read().clone()
    }

    pub fn set_process(&self, snapshot: ProcessSnapshot) {
        *self.process.write() = Some(snapshot);
    }

    pub fn node_version(&self) -> Option<NodeVersion> {
        self.node_version.read().clone()
    }

    pub fn set_node_version(&self, version: NodeVersion) {
        *self.node_version.write() = Some(version);
    }

    pub fn chain(&self) -> ChainPosition {
        *self.chain.read()
    }

    pub fn update_chain(&self, now: u64) {
        *self.chain.write() = ChainPosition::at(&self.genesis, now);
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn refresh_role(&self) -> Role {
        let metrics = self.metrics();
        self.refresh_role_with(metrics.as_deref())
    }

    fn refresh_role_with(&self, metrics: Option<&NodeMetrics>) -> Role {
        let role = Role::detect(self.config.node.block_producer, metrics);
        *self.role.write() = role;
        role
    }

    pub fn p2p(&self) -> bool {
        self.p2p.load(Ordering::Relaxed)
    }

    pub fn set_p2p(&self, enabled: bool) {
        self.p2p.store(enabled, Ordering::Relaxed);
    }

    pub fn public_ip(&self) -> Option<IpAddr> {
        self.discovery.public_ip()
    }

    /// Operator-requested restart of the peer analysis; every peer is probed again
    pub fn restart_peer_analysis(&self) {
        self.prober.invalidate();
        self.discovery.clear();
    }

    /// Current epoch progress from reported metrics, 0 before the first fetch
    pub fn epoch_progress(&self) -> f64 {
        self.metrics()
            .map(|m| epoch::epoch_progress_percent(&self.genesis, m.epoch_num, m.slot_in_epoch))
            .unwrap_or(0.0)
    }

    /// Sync diagnosis against the wall-clock tip estimate; `None` before the first fetch
    pub fn tip_status(&self, now: u64) -> Option<TipStatus> {
        let tip_ref = epoch::current_slot_estimate(&self.genesis, now);
        self.metrics().map(|m| epoch::tip_status(m.slot_num, tip_ref))
    }
}
