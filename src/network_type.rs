use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;

/// Networks with built-in genesis parameters
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Preprod,
    Preview,
    Sancho,
}

impl NetworkType {
    pub const ALL: [NetworkType; 4] = [
        NetworkType::Mainnet,
        NetworkType::Preprod,
        NetworkType::Preview,
        NetworkType::Sancho,
    ];

    pub fn network_magic(&self) -> u32 {
        match self {
            NetworkType::Mainnet => 764824073,
            NetworkType::Preprod => 1,
            NetworkType::Preview => 2,
            NetworkType::Sancho => 4,
        }
    }

    /// Unix time of the first Byron slot
    pub fn byron_start_time(&self) -> u64 {
        match self {
            NetworkType::Mainnet => 1506203091, // 2017-09-23 21:44:51 UTC
            NetworkType::Preprod => 1654041600,
            NetworkType::Preview => 1666656000,
            NetworkType::Sancho => 1686789000,
        }
    }

    /// Byron security parameter; the Byron epoch is `10 * k` slots
    pub fn byron_k(&self) -> u64 {
        match self {
            NetworkType::Mainnet | NetworkType::Preprod => 2160,
            NetworkType::Preview | NetworkType::Sancho => 432,
        }
    }

    pub fn byron_slot_length_ms(&self) -> u64 {
        20_000
    }

    pub fn shelley_epoch_length(&self) -> u64 {
        match self {
            NetworkType::Mainnet | NetworkType::Preprod => 432_000,
            NetworkType::Preview | NetworkType::Sancho => 86_400,
        }
    }

    pub fn shelley_slot_length_ms(&self) -> u64 {
        1_000
    }

    pub fn slots_per_kes_period(&self) -> u64 {
        129_600
    }

    /// First epoch of the Shelley era
    pub fn shelley_transition_epoch(&self) -> u64 {
        match self {
            NetworkType::Mainnet => 208,
            NetworkType::Preprod => 4,
            NetworkType::Preview | NetworkType::Sancho => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Preprod => "preprod",
            NetworkType::Preview => "preview",
            NetworkType::Sancho => "sancho",
        }
    }
}

impl FromStr for NetworkType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "preprod" => Ok(NetworkType::Preprod),
            "preview" => Ok(NetworkType::Preview),
            "sancho" | "sanchonet" => Ok(NetworkType::Sancho),
            other => Err(AppError::UnknownNetwork(other.to_string())),
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "Mainnet"),
            NetworkType::Preprod => write!(f, "Preprod"),
            NetworkType::Preview => write!(f, "Preview"),
            NetworkType::Sancho => write!(f, "Sancho"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_networks() {
        for network in NetworkType::ALL {
            assert_eq!(network.as_str().parse::<NetworkType>().unwrap(), network);
        }
        assert_eq!(
            "  MainNet ".parse::<NetworkType>().unwrap(),
            NetworkType::Mainnet
        );
    }

    #[test]
    fn test_unknown_network_is_error() {
        let err = "guild".parse::<NetworkType>().unwrap_err();
        assert!(matches!(err, AppError::UnknownNetwork(ref n) if n == "guild"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_byron_epoch_lengths() {
        assert_eq!(NetworkType::Mainnet.byron_k() * 10, 21_600);
        assert_eq!(NetworkType::Preview.byron_k() * 10, 4_320);
    }
}
