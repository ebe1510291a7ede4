//! Peer discovery from the connection table and RTT classification.

pub mod discovery;
pub mod geoip;
pub mod prober;
pub mod rtt;

pub use discovery::{DiscoveryConfig, PeerDiscovery};
pub use geoip::{DisabledGeoLocator, GeoLocator, HttpGeoLocator, LOCATION_UNKNOWN};
pub use prober::{LatencyProber, PeerRecord, PeerStatSnapshot, ProbePhase};
pub use rtt::{Rtt, RttBucket, RttProbe, TcpInfoProbe};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    /// Seen both inbound and outbound
    Duplex,
}

impl Direction {
    /// Union of two observed directions
    pub fn merge(self, other: Direction) -> Direction {
        if self == other {
            self
        } else {
            Direction::Duplex
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "i"),
            Direction::Out => write!(f, "o"),
            Direction::Duplex => write!(f, "i+o"),
        }
    }
}

/// One remote address in the deduplicated working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    pub ip: IpAddr,
    pub port: u16,
    pub direction: Direction,
}
