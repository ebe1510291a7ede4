//! Genesis parameters for the two timing eras and the boundary between them.
//!
//! Resolved once from the network table and any explicit overrides in the
//! configuration; read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::network_type::NetworkType;

/// Default active slot coefficient (probability a slot has a leader)
pub const DEFAULT_ACTIVE_SLOT_COEFF: f64 = 0.05;
/// Decentralisation parameter fixed after it was removed from protocol params
pub const DEFAULT_DECENTRALISATION: f64 = 0.5;

/// Timing constants of one era
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenesisParameters {
    /// Unix time of epoch 0 of this era
    pub start_time_secs: u64,
    pub slot_length_ms: u64,
    pub epoch_length_slots: u64,
    pub security_param_k: u64,
    /// Only meaningful for the Shelley-style era
    pub slots_per_kes_period: Option<u64>,
}

/// First epoch of the new era
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EraTransition {
    Unresolved,
    /// `AtEpoch(0)` means the network has always been in the new era
    AtEpoch(u64),
}

impl EraTransition {
    /// From the configuration representation, where `-1` means unresolved
    pub fn from_raw(epoch: i64) -> Self {
        if epoch < 0 {
            EraTransition::Unresolved
        } else {
            EraTransition::AtEpoch(epoch as u64)
        }
    }

    pub fn epoch(&self) -> Option<u64> {
        match self {
            EraTransition::Unresolved => None,
            EraTransition::AtEpoch(epoch) => Some(*epoch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisModel {
    pub network: NetworkType,
    pub network_magic: u32,
    pub byron: GenesisParameters,
    pub shelley: GenesisParameters,
    pub transition: EraTransition,
}

impl GenesisModel {
    /// Built-in parameters of a named network
    pub fn for_network(network: NetworkType) -> Self {
        let k = network.byron_k();
        let byron = GenesisParameters {
            start_time_secs: network.byron_start_time(),
            slot_length_ms: network.byron_slot_length_ms(),
            epoch_length_slots: 10 * k,
            security_param_k: k,
            slots_per_kes_period: None,
        };
        let shelley = GenesisParameters {
            start_time_secs: 0,
            slot_length_ms: network.shelley_slot_length_ms(),
            epoch_length_slots: network.shelley_epoch_length(),
            security_param_k: k,
            slots_per_kes_period: Some(network.slots_per_kes_period()),
        };
        let transition = EraTransition::AtEpoch(network.shelley_transition_epoch());
        Self::assemble(network, network.network_magic(), byron, shelley, transition)
    }

    /// Resolve from configuration; an unknown network name is fatal
    pub fn resolve(config: &Config) -> Result<Self, AppError> {
        let network = config.network_type()?;
        let defaults = Self::for_network(network);
        let node = &config.node;

        let k = node.byron.k.unwrap_or(defaults.byron.security_param_k);
        let byron = GenesisParameters {
            start_time_secs: node
                .byron
                .start_time
                .unwrap_or(defaults.byron.start_time_secs),
            slot_length_ms: node
                .byron
                .slot_length
                .unwrap_or(defaults.byron.slot_length_ms),
            epoch_length_slots: node.byron.epoch_length.unwrap_or(10 * k),
            security_param_k: k,
            slots_per_kes_period: None,
        };
        let shelley = GenesisParameters {
            start_time_secs: 0,
            slot_length_ms: node
                .shelley
                .slot_length
                .unwrap_or(defaults.shelley.slot_length_ms),
            epoch_length_slots: node
                .shelley
                .epoch_length
                .unwrap_or(defaults.shelley.epoch_length_slots),
            security_param_k: k,
            slots_per_kes_period: Some(
                node.shelley
                    .slots_per_kes_period
                    .unwrap_or(network.slots_per_kes_period()),
            ),
        };

        if byron.slot_length_ms == 0 || byron.epoch_length_slots == 0 {
            return Err(AppError::Config(
                "byron slot and epoch length must be > 0".into(),
            ));
        }
        if shelley.slot_length_ms == 0 || shelley.epoch_length_slots == 0 {
            return Err(AppError::Config(
                "shelley slot and epoch length must be > 0".into(),
            ));
        }

        let transition = match EraTransition::from_raw(node.shelley_trans_epoch) {
            EraTransition::Unresolved => defaults.transition,
            explicit => explicit,
        };
        let magic = node.network_magic.unwrap_or(network.network_magic());

        Ok(Self::assemble(network, magic, byron, shelley, transition))
    }

    fn assemble(
        network: NetworkType,
        network_magic: u32,
        byron: GenesisParameters,
        mut shelley: GenesisParameters,
        transition: EraTransition,
    ) -> Self {
        let mut model = Self {
            network,
            network_magic,
            byron,
            shelley,
            transition,
        };
        shelley.start_time_secs = model.byron_end_time();
        model.shelley = shelley;
        model
    }

    /// Epoch used as the era boundary for arithmetic; unresolved counts as 0
    pub fn transition_epoch_or_zero(&self) -> u64 {
        self.transition.epoch().unwrap_or(0)
    }

    /// Unix time at which the legacy era ends
    pub fn byron_end_time(&self) -> u64 {
        self.byron.start_time_secs
            + (self.transition_epoch_or_zero()
                * self.byron.epoch_length_slots
                * self.byron.slot_length_ms)
                / 1000
    }

    /// Total number of slots produced under the legacy era
    pub fn byron_slots(&self) -> u64 {
        self.transition_epoch_or_zero() * self.byron.epoch_length_slots
    }
}

impl Default for GenesisModel {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}
