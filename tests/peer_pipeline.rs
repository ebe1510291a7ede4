//! Connection table -> discovery -> latency analysis, wired the way the
//! background tasks wire it, with the network replaced by fixed tables.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nodeview::config::Config;
use nodeview::genesis::GenesisModel;
use nodeview::log_buffer::LogBuffer;
use nodeview::peers::{
    Direction, DiscoveryConfig, GeoLocator, LatencyProber, PeerDiscovery, ProbePhase, Rtt,
    RttBucket, RttProbe,
};
use nodeview::process::{ConnectionTable, ProcessSnapshot, TcpConnection};
use nodeview::tasks::{self, TaskOutcome};
use nodeview::{AppError, AppState};

const LOCAL: &str = "10.0.2.15";

struct FixedRtt {
    table: HashMap<IpAddr, Rtt>,
    calls: AtomicUsize,
}

#[async_trait]
impl RttProbe for FixedRtt {
    async fn probe(&self, addr: SocketAddr) -> Rtt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table.get(&addr.ip()).copied().unwrap_or(Rtt::Unreachable)
    }
}

struct FixedGeo;

#[async_trait]
impl GeoLocator for FixedGeo {
    async fn locate(&self, ip: IpAddr) -> Option<String> {
        match ip.to_string().as_str() {
            "10.0.0.5" => Some("Zurich, CH".to_string()),
            _ => None,
        }
    }
}

struct SharedTable(parking_lot::Mutex<Vec<TcpConnection>>);

impl ConnectionTable for SharedTable {
    fn connections(&self, _pid: u32) -> Result<Vec<TcpConnection>, AppError> {
        Ok(self.0.lock().clone())
    }
}

fn conn(local_port: u16, remote: &str) -> TcpConnection {
    TcpConnection::established(
        format!("{}:{}", LOCAL, local_port).parse().unwrap(),
        remote.parse().unwrap(),
    )
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn setup(probe: Arc<FixedRtt>) -> Arc<AppState> {
    let config = Config::default();
    let genesis = GenesisModel::resolve(&config).unwrap();
    let discovery = PeerDiscovery::new(DiscoveryConfig::from_config(&config));
    let prober = LatencyProber::new(probe, Arc::new(FixedGeo));
    let state = Arc::new(AppState::new(
        config,
        genesis,
        discovery,
        prober,
        Arc::new(LogBuffer::new(50)),
    ));
    state.set_process(ProcessSnapshot {
        pid: 4242,
        name: "cardano-node".to_string(),
        cpu_percent: 3.5,
        rss_bytes: 8 << 30,
        uptime_secs: 3_600,
        cmdline: vec!["cardano-node".to_string(), "run".to_string()],
    });
    state
}

fn fixed_probe() -> Arc<FixedRtt> {
    let mut table = HashMap::new();
    table.insert(ip("10.0.0.5"), Rtt::Reachable(12));
    table.insert(ip("10.0.0.6"), Rtt::Reachable(180));
    table.insert(ip("10.0.0.7"), Rtt::Reachable(75));
    Arc::new(FixedRtt {
        table,
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn test_full_analysis_cycle() {
    let probe = fixed_probe();
    let state = setup(probe.clone());
    let table: Arc<dyn ConnectionTable> = Arc::new(SharedTable(parking_lot::Mutex::new(vec![
        // inbound on the node port
        conn(3001, "10.0.0.5:41000"),
        // outbound from an ephemeral port, same peer: duplex
        conn(50000, "10.0.0.5:3001"),
        conn(50001, "10.0.0.6:3001"),
        conn(50002, "10.0.0.7:6000"),
        conn(50003, "10.0.0.8:3001"),
        // metrics scrapers and loopback are not peers
        conn(12798, "10.0.0.9:55555"),
        conn(50004, "127.0.0.1:3001"),
    ])));

    assert_eq!(
        tasks::discover_peers(&state, table.clone()).await.unwrap(),
        TaskOutcome::Success
    );
    let peers = state.discovery.snapshot();
    assert_eq!(peers.len(), 4);
    let first = peers.iter().find(|p| p.ip == ip("10.0.0.5")).unwrap();
    assert_eq!(first.direction, Direction::Duplex);

    assert_eq!(tasks::probe_peers(&state).await.unwrap(), TaskOutcome::Success);
    assert_eq!(state.prober.phase(), ProbePhase::Done);

    let stats = state.prober.snapshot();
    assert_eq!(stats.checked, 4);
    assert_eq!(stats.count(RttBucket::Under50), 1);
    assert_eq!(stats.count(RttBucket::Under100), 1);
    assert_eq!(stats.count(RttBucket::Under200), 1);
    assert_eq!(stats.count(RttBucket::Unreachable), 1);
    assert_eq!(stats.average_rtt_ms, Some((12 + 75 + 180) / 3));

    let ranked: Vec<IpAddr> = state.prober.peers().iter().map(|p| p.ip).collect();
    assert_eq!(
        ranked,
        vec![ip("10.0.0.5"), ip("10.0.0.7"), ip("10.0.0.6"), ip("10.0.0.8")]
    );
    assert_eq!(state.prober.peers()[0].location_or_placeholder(), "Zurich, CH");
    assert_eq!(state.prober.peers()[3].location_or_placeholder(), "---");

    // Done: further passes do nothing
    assert_eq!(tasks::probe_peers(&state).await.unwrap(), TaskOutcome::Idle);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_new_peer_restarts_analysis() {
    let probe = fixed_probe();
    let state = setup(probe.clone());
    let shared = Arc::new(SharedTable(parking_lot::Mutex::new(vec![
        conn(50000, "10.0.0.5:3001"),
        conn(50001, "10.0.0.6:3001"),
    ])));
    let table: Arc<dyn ConnectionTable> = shared.clone();

    tasks::discover_peers(&state, table.clone()).await.unwrap();
    tasks::probe_peers(&state).await.unwrap();
    assert_eq!(state.prober.phase(), ProbePhase::Done);

    // Same count: the working set is kept
    *shared.0.lock() = vec![conn(50000, "10.0.0.5:3001"), conn(50001, "10.0.0.7:3001")];
    tasks::discover_peers(&state, table.clone()).await.unwrap();
    assert_eq!(state.prober.phase(), ProbePhase::Done);

    shared.0.lock().push(conn(3001, "10.0.0.8:40000"));
    tasks::discover_peers(&state, table).await.unwrap();
    assert_eq!(state.prober.phase(), ProbePhase::Idle);
    assert_eq!(state.prober.snapshot().checked, 0);

    tasks::probe_peers(&state).await.unwrap();
    let stats = state.prober.snapshot();
    assert_eq!(stats.phase, ProbePhase::Done);
    assert_eq!(stats.checked, 3);
}

#[tokio::test]
async fn test_growing_peer_set_reuses_fresh_rtts() {
    let probe = fixed_probe();
    let state = setup(probe.clone());
    let shared = Arc::new(SharedTable(parking_lot::Mutex::new(vec![
        conn(50000, "10.0.0.5:3001"),
        conn(50001, "10.0.0.6:3001"),
    ])));
    let table: Arc<dyn ConnectionTable> = shared.clone();

    tasks::discover_peers(&state, table.clone()).await.unwrap();
    tasks::probe_peers(&state).await.unwrap();
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

    shared.0.lock().push(conn(50002, "10.0.0.7:3001"));
    tasks::discover_peers(&state, table).await.unwrap();
    assert_eq!(state.prober.phase(), ProbePhase::Idle);

    tasks::probe_peers(&state).await.unwrap();
    let stats = state.prober.snapshot();
    assert_eq!(stats.phase, ProbePhase::Done);
    assert_eq!(stats.checked, 3);
    assert_eq!(stats.average_rtt_ms, Some((12 + 180 + 75) / 3));
    // only the new peer went out on the wire
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_operator_restart_clears_working_set() {
    let probe = fixed_probe();
    let state = setup(probe.clone());
    let table: Arc<dyn ConnectionTable> = Arc::new(SharedTable(parking_lot::Mutex::new(vec![
        conn(50000, "10.0.0.5:3001"),
    ])));

    tasks::discover_peers(&state, table.clone()).await.unwrap();
    tasks::probe_peers(&state).await.unwrap();
    assert_eq!(state.prober.snapshot().checked, 1);

    state.restart_peer_analysis();
    assert!(state.discovery.snapshot().is_empty());
    assert_eq!(state.prober.phase(), ProbePhase::Idle);

    // Next discovery round repopulates and the analysis starts over
    assert!(state.discovery.refresh(&table.connections(4242).unwrap()));
    tasks::probe_peers(&state).await.unwrap();
    assert_eq!(state.prober.snapshot().checked, 1);
    // operator restart measures again instead of reusing the cache
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
}
