//! Peer latency prober.
//!
//! One analysis cycle goes `Idle -> Probing -> Done`. [`LatencyProber::reset`]
//! returns to `Idle` and bumps a generation counter; results from a pass that
//! started before the reset carry the old generation and are discarded, so a
//! reset never interleaves with the counter updates of a running pass.
//!
//! Probes of distinct peers run concurrently. Every result is folded into the
//! shared state under one short lock: bucket counter, RTT sum, sorted insert.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::geoip::{GeoLocator, LOCATION_UNKNOWN};
use super::rtt::{Rtt, RttBucket, RttProbe};
use super::{Direction, DiscoveredPeer};

/// Results younger than this are reused instead of probing again
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbePhase {
    Idle,
    Probing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerRecord {
    pub ip: IpAddr,
    pub port: u16,
    pub direction: Direction,
    pub rtt: Rtt,
    pub location: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl PeerRecord {
    pub fn location_or_placeholder(&self) -> &str {
        self.location.as_deref().unwrap_or(LOCATION_UNKNOWN)
    }
}

/// Aggregate view of the current analysis cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatSnapshot {
    pub phase: ProbePhase,
    /// Indexed by [`RttBucket::index`]
    pub counts: [usize; 5],
    /// Peers with a result in this cycle
    pub checked: usize,
    /// Peers the cycle was started for
    pub expected: usize,
    pub average_rtt_ms: Option<u64>,
}

impl PeerStatSnapshot {
    pub fn count(&self, bucket: RttBucket) -> usize {
        self.counts[bucket.index()]
    }

    pub fn reachable(&self) -> usize {
        self.checked - self.count(RttBucket::Unreachable)
    }

    /// Share of reachable peers in `bucket`; `None` without reachable peers
    pub fn percent(&self, bucket: RttBucket) -> Option<f64> {
        if bucket == RttBucket::Unreachable {
            return None;
        }
        let reachable = self.reachable();
        if reachable == 0 {
            return None;
        }
        Some(self.count(bucket) as f64 / reachable as f64 * 100.0)
    }
}

#[derive(Debug)]
struct ProberState {
    phase: ProbePhase,
    generation: u64,
    expected: usize,
    counts: [usize; 5],
    rtt_sum: u64,
    /// Sorted ascending by RTT, unreachable last
    results: Vec<PeerRecord>,
}

impl ProberState {
    fn new() -> Self {
        Self {
            phase: ProbePhase::Idle,
            generation: 0,
            expected: 0,
            counts: [0; 5],
            rtt_sum: 0,
            results: Vec::new(),
        }
    }
}

/// Last known result per IP, kept across cycles
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Cleared by a reset so the next cycle measures again
    rtt: Option<Rtt>,
    location: Option<String>,
    probed_at: DateTime<Utc>,
}

pub struct LatencyProber {
    state: Mutex<ProberState>,
    cache: DashMap<IpAddr, CacheEntry>,
    probe: Arc<dyn RttProbe>,
    geo: Arc<dyn GeoLocator>,
    freshness: Duration,
}

impl LatencyProber {
    pub fn new(probe: Arc<dyn RttProbe>, geo: Arc<dyn GeoLocator>) -> Self {
        Self::with_freshness(probe, geo, DEFAULT_FRESHNESS)
    }

    pub fn with_freshness(
        probe: Arc<dyn RttProbe>,
        geo: Arc<dyn GeoLocator>,
        freshness: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(ProberState::new()),
            cache: DashMap::new(),
            probe,
            geo,
            freshness,
        }
    }

    pub fn phase(&self) -> ProbePhase {
        self.state.lock().phase
    }

    /// Back to `Idle` for a new cycle; any pass still running loses its writes.
    /// RTTs younger than the freshness window are reused by the next cycle.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.phase = ProbePhase::Idle;
        state.expected = 0;
        state.counts = [0; 5];
        state.rtt_sum = 0;
        state.results.clear();
        debug!("Peer analysis reset");
    }

    /// Like [`reset`](Self::reset), but every peer is probed again.
    /// Cached locations are kept.
    pub fn invalidate(&self) {
        self.reset();
        for mut entry in self.cache.iter_mut() {
            entry.rtt = None;
        }
    }

    /// Probe every peer of `peers` without a result in the current cycle.
    /// No-op once the cycle is `Done`.
    pub async fn run_pass(&self, peers: &[DiscoveredPeer]) {
        if peers.is_empty() {
            return;
        }

        let (generation, pending) = {
            let mut state = self.state.lock();
            match state.phase {
                ProbePhase::Done => return,
                ProbePhase::Idle => {
                    state.phase = ProbePhase::Probing;
                    state.expected = peers.len();
                    info!(peers = peers.len(), "🔍 Peer analysis started");
                }
                ProbePhase::Probing => {}
            }
            let seen: HashSet<IpAddr> = state.results.iter().map(|r| r.ip).collect();
            let pending: Vec<DiscoveredPeer> = peers
                .iter()
                .filter(|p| !seen.contains(&p.ip))
                .copied()
                .collect();
            (state.generation, pending)
        };

        join_all(pending.iter().map(|peer| async move {
            let record = self.check(peer).await;
            self.record(generation, record);
        }))
        .await;
    }

    async fn check(&self, peer: &DiscoveredPeer) -> PeerRecord {
        let now = Utc::now();
        let cached = self.cache.get(&peer.ip).map(|entry| entry.clone());

        let fresh_rtt = cached.as_ref().and_then(|entry| {
            let age = now.signed_duration_since(entry.probed_at).num_seconds();
            entry
                .rtt
                .filter(|_| age >= 0 && (age as u64) < self.freshness.as_secs())
        });

        let (rtt, probed_at) = match fresh_rtt {
            Some(rtt) => (rtt, cached.as_ref().map(|e| e.probed_at).unwrap_or(now)),
            None => (
                self.probe.probe(SocketAddr::new(peer.ip, peer.port)).await,
                Utc::now(),
            ),
        };

        let location = match cached.and_then(|entry| entry.location) {
            Some(location) => Some(location),
            None => self.geo.locate(peer.ip).await,
        };

        self.cache.insert(
            peer.ip,
            CacheEntry {
                rtt: Some(rtt),
                location: location.clone(),
                probed_at,
            },
        );

        PeerRecord {
            ip: peer.ip,
            port: peer.port,
            direction: peer.direction,
            rtt,
            location,
            last_updated: probed_at,
        }
    }

    /// Fold one result into the cycle; false when it was dropped
    fn record(&self, generation: u64, record: PeerRecord) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.phase != ProbePhase::Probing {
            return false;
        }
        if state.results.iter().any(|r| r.ip == record.ip) {
            return false;
        }

        state.counts[record.rtt.bucket().index()] += 1;
        if let Some(ms) = record.rtt.millis() {
            state.rtt_sum += ms;
        }
        let idx = state.results.partition_point(|r| r.rtt <= record.rtt);
        state.results.insert(idx, record);

        if state.results.len() >= state.expected {
            state.phase = ProbePhase::Done;
            info!(
                peers = state.results.len(),
                unreachable = state.counts[RttBucket::Unreachable.index()],
                "✅ Peer analysis complete"
            );
        }
        true
    }

    pub fn snapshot(&self) -> PeerStatSnapshot {
        let state = self.state.lock();
        let checked = state.results.len();
        let reachable = checked - state.counts[RttBucket::Unreachable.index()];
        PeerStatSnapshot {
            phase: state.phase,
            counts: state.counts,
            checked,
            expected: state.expected,
            average_rtt_ms: (reachable > 0).then(|| state.rtt_sum / reachable as u64),
        }
    }

    /// Working set sorted by RTT ascending
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.state.lock().results.clone()
    }
}
