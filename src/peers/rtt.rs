//! Single TCP round-trip-time probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::trace;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rtt {
    Reachable(u64),
    Unreachable,
}

impl Rtt {
    pub fn millis(&self) -> Option<u64> {
        match self {
            Rtt::Reachable(ms) => Some(*ms),
            Rtt::Unreachable => None,
        }
    }

    pub fn bucket(&self) -> RttBucket {
        match self {
            Rtt::Unreachable => RttBucket::Unreachable,
            Rtt::Reachable(ms) if *ms < 50 => RttBucket::Under50,
            Rtt::Reachable(ms) if *ms < 100 => RttBucket::Under100,
            Rtt::Reachable(ms) if *ms < 200 => RttBucket::Under200,
            Rtt::Reachable(_) => RttBucket::Over200,
        }
    }
}

/// Ascending by latency, unreachable last
impl Ord for Rtt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Rtt::Reachable(a), Rtt::Reachable(b)) => a.cmp(b),
            (Rtt::Reachable(_), Rtt::Unreachable) => Ordering::Less,
            (Rtt::Unreachable, Rtt::Reachable(_)) => Ordering::Greater,
            (Rtt::Unreachable, Rtt::Unreachable) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Rtt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rtt::Reachable(ms) => write!(f, "{}", ms),
            Rtt::Unreachable => write!(f, "---"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RttBucket {
    Under50,
    Under100,
    Under200,
    Over200,
    Unreachable,
}

impl RttBucket {
    pub const ALL: [RttBucket; 5] = [
        RttBucket::Under50,
        RttBucket::Under100,
        RttBucket::Under200,
        RttBucket::Over200,
        RttBucket::Unreachable,
    ];

    pub fn index(&self) -> usize {
        match self {
            RttBucket::Under50 => 0,
            RttBucket::Under100 => 1,
            RttBucket::Under200 => 2,
            RttBucket::Over200 => 3,
            RttBucket::Unreachable => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RttBucket::Under50 => "0-50ms",
            RttBucket::Under100 => "50-100ms",
            RttBucket::Under200 => "100-200ms",
            RttBucket::Over200 => "200ms+",
            RttBucket::Unreachable => "unreachable",
        }
    }
}

#[async_trait]
pub trait RttProbe: Send + Sync {
    /// Never fails; any error is reported as [`Rtt::Unreachable`]
    async fn probe(&self, addr: SocketAddr) -> Rtt;
}

/// Connects once and reads the kernel's smoothed RTT for the socket
pub struct TcpInfoProbe {
    connect_timeout: Duration,
}

impl TcpInfoProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpInfoProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl RttProbe for TcpInfoProbe {
    async fn probe(&self, addr: SocketAddr) -> Rtt {
        let started = Instant::now();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "Probe connect failed");
                return Rtt::Unreachable;
            }
            Err(_) => {
                trace!(%addr, "Probe connect timed out");
                return Rtt::Unreachable;
            }
        };
        let handshake = started.elapsed();

        let rtt = match socket_rtt(&stream, handshake) {
            Some(rtt) => Rtt::Reachable(rtt.as_millis() as u64),
            None => Rtt::Unreachable,
        };

        // RST instead of FIN so probing leaves no TIME_WAIT sockets behind
        let socket = socket2::SockRef::from(&stream);
        if let Err(e) = socket.set_linger(Some(Duration::ZERO)) {
            trace!(%addr, error = %e, "Failed to set SO_LINGER");
        }
        rtt
    }
}

#[cfg(target_os = "linux")]
fn socket_rtt(stream: &TcpStream, _handshake: Duration) -> Option<Duration> {
    use std::os::fd::AsRawFd;

    // SAFETY: tcp_info is a plain C struct of integers; all-zero bytes are a valid value
    let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;
    // SAFETY: fd is a live TCP socket and `info`/`len` describe a writable buffer
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut libc::tcp_info as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }
    Some(Duration::from_micros(info.tcpi_rtt as u64))
}

/// Without TCP_INFO the connect handshake is the best available estimate
#[cfg(not(target_os = "linux"))]
fn socket_rtt(_stream: &TcpStream, handshake: Duration) -> Option<Duration> {
    Some(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_buckets() {
        assert_eq!(Rtt::Reachable(0).bucket(), RttBucket::Under50);
        assert_eq!(Rtt::Reachable(49).bucket(), RttBucket::Under50);
        assert_eq!(Rtt::Reachable(50).bucket(), RttBucket::Under100);
        assert_eq!(Rtt::Reachable(199).bucket(), RttBucket::Under200);
        assert_eq!(Rtt::Reachable(200).bucket(), RttBucket::Over200);
        assert_eq!(Rtt::Reachable(99_998).bucket(), RttBucket::Over200);
        assert_eq!(Rtt::Unreachable.bucket(), RttBucket::Unreachable);
    }

    #[test]
    fn test_ordering_puts_unreachable_last() {
        let mut rtts = vec![
            Rtt::Unreachable,
            Rtt::Reachable(120),
            Rtt::Reachable(5),
            Rtt::Unreachable,
            Rtt::Reachable(60),
        ];
        rtts.sort();
        assert_eq!(
            rtts,
            vec![
                Rtt::Reachable(5),
                Rtt::Reachable(60),
                Rtt::Reachable(120),
                Rtt::Unreachable,
                Rtt::Unreachable
            ]
        );
    }

    #[tokio::test]
    async fn test_probe_local_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let rtt = TcpInfoProbe::default().probe(addr).await;
        assert!(matches!(rtt, Rtt::Reachable(ms) if ms < 1_000), "got {:?}", rtt);
    }

    #[tokio::test]
    async fn test_probe_refused_is_unreachable() {
        // bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let rtt = TcpInfoProbe::new(Duration::from_millis(500)).probe(addr).await;
        assert_eq!(rtt, Rtt::Unreachable);
    }
}
