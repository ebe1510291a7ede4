//! TCP connection table of a single process, read from procfs.

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    Listen,
    Other(u8),
}

impl TcpState {
    fn from_hex(s: &str) -> Option<Self> {
        match u8::from_str_radix(s, 16).ok()? {
            0x01 => Some(TcpState::Established),
            0x0A => Some(TcpState::Listen),
            other => Some(TcpState::Other(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
}

impl TcpConnection {
    pub fn established(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            state: TcpState::Established,
        }
    }
}

pub trait ConnectionTable: Send + Sync {
    fn connections(&self, pid: u32) -> Result<Vec<TcpConnection>, AppError>;
}

/// Linux procfs implementation
pub struct ProcNetConnections {
    proc_root: PathBuf,
}

impl ProcNetConnections {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Socket inodes held open by `pid`
    fn socket_inodes(&self, pid: u32) -> Result<HashSet<u64>, AppError> {
        let fd_dir = self.proc_root.join(pid.to_string()).join("fd");
        let entries = fs::read_dir(&fd_dir).map_err(|e| {
            AppError::Process(format!("cannot list {}: {}", fd_dir.display(), e))
        })?;

        let mut inodes = HashSet::new();
        for entry in entries.flatten() {
            if let Ok(target) = fs::read_link(entry.path()) {
                if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
                    inodes.insert(inode);
                }
            }
        }
        Ok(inodes)
    }
}

impl Default for ProcNetConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable for ProcNetConnections {
    fn connections(&self, pid: u32) -> Result<Vec<TcpConnection>, AppError> {
        let inodes = self.socket_inodes(pid)?;
        let net_dir = self.proc_root.join(pid.to_string()).join("net");

        let mut connections = Vec::new();
        for table in ["tcp", "tcp6"] {
            // tcp6 is absent when IPv6 is disabled
            let Ok(contents) = fs::read_to_string(net_dir.join(table)) else {
                continue;
            };
            connections.extend(
                parse_proc_net_tcp(&contents)
                    .into_iter()
                    .filter(|(_, inode)| inodes.contains(inode))
                    .map(|(conn, _)| conn),
            );
        }
        Ok(connections)
    }
}

/// `socket:[12345]` -> 12345
pub fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Rows of `/proc/net/tcp{,6}` with their socket inode; unparsable rows are skipped
pub fn parse_proc_net_tcp(contents: &str) -> Vec<(TcpConnection, u64)> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let local = parse_hex_socket_addr(fields[1])?;
            let remote = parse_hex_socket_addr(fields[2])?;
            let state = TcpState::from_hex(fields[3])?;
            let inode = fields[9].parse().ok()?;
            Some((TcpConnection { local, remote, state }, inode))
        })
        .collect()
}

/// Kernel hex notation: address words in host byte order, port big-endian
pub fn parse_hex_socket_addr(s: &str) -> Option<SocketAddr> {
    let (addr, port) = s.split_once(':')?;
    if !addr.is_ascii() {
        return None;
    }
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}
