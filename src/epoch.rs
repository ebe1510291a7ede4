//! Slot and epoch arithmetic across the Byron/Shelley boundary.
//!
//! Everything here is a pure function of a [`GenesisModel`] and a wall-clock
//! time in Unix seconds. Results are estimates; the node's own metrics are
//! ground truth and the difference between the two is the sync signal.

use chrono::{DateTime, TimeZone, Utc};

use crate::genesis::{GenesisModel, DEFAULT_ACTIVE_SLOT_COEFF, DEFAULT_DECENTRALISATION};

/// Tip difference (in slots) still considered in sync
pub const TIP_DIFF_HEALTHY: u64 = 20;
/// Tip difference (in slots) above which the node is reported as syncing
pub const TIP_DIFF_LAGGING: u64 = 600;

pub fn now_unix_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Estimated absolute slot number at `now`
pub fn current_slot_estimate(genesis: &GenesisModel, now: u64) -> u64 {
    let byron_end = genesis.byron_end_time();
    if now < byron_end {
        return (now.saturating_sub(genesis.byron.start_time_secs) * 1000)
            / genesis.byron.slot_length_ms;
    }
    genesis.byron_slots() + ((now - byron_end) * 1000) / genesis.shelley.slot_length_ms
}

/// Percentage of the reported epoch already elapsed, in `[0, 100)` for valid input
pub fn epoch_progress_percent(genesis: &GenesisModel, epoch: u64, slot_in_epoch: u64) -> f64 {
    let Some(transition) = genesis.transition.epoch() else {
        return 0.0;
    };
    let epoch_length = if epoch >= transition {
        genesis.shelley.epoch_length_slots
    } else {
        genesis.byron.epoch_length_slots
    };
    if epoch_length == 0 {
        return 0.0;
    }
    100.0 * slot_in_epoch as f64 / epoch_length as f64
}

/// Expected gap between blocks in milliseconds, using default protocol coefficients
pub fn slot_interval_threshold(genesis: &GenesisModel) -> u64 {
    let slot_ms = genesis.shelley.slot_length_ms as f64;
    (slot_ms / DEFAULT_ACTIVE_SLOT_COEFF / DEFAULT_DECENTRALISATION + 0.5) as u64
}

/// Estimated epoch number at `now`
pub fn current_epoch_estimate(genesis: &GenesisModel, now: u64) -> u64 {
    let byron_end = genesis.byron_end_time();
    if now < byron_end {
        let epoch_ms = genesis.byron.epoch_length_slots * genesis.byron.slot_length_ms;
        return (now.saturating_sub(genesis.byron.start_time_secs) * 1000) / epoch_ms;
    }
    let epoch_ms = genesis.shelley.epoch_length_slots * genesis.shelley.slot_length_ms;
    genesis.transition_epoch_or_zero() + ((now - byron_end) * 1000) / epoch_ms
}

/// Seconds until the next epoch boundary after `now`
pub fn time_until_next_epoch(genesis: &GenesisModel, now: u64) -> u64 {
    if now < genesis.byron.start_time_secs {
        return genesis.byron.start_time_secs - now;
    }
    let byron_end = genesis.byron_end_time();
    let (era_start, epoch_ms) = if now < byron_end {
        (
            genesis.byron.start_time_secs,
            genesis.byron.epoch_length_slots * genesis.byron.slot_length_ms,
        )
    } else {
        (
            byron_end,
            genesis.shelley.epoch_length_slots * genesis.shelley.slot_length_ms,
        )
    };
    let elapsed_ms = (now - era_start) * 1000;
    (epoch_ms - elapsed_ms % epoch_ms).div_ceil(1000)
}

/// KES period the node should currently be signing in
pub fn current_kes_period(genesis: &GenesisModel, now: u64) -> u64 {
    match genesis.shelley.slots_per_kes_period {
        Some(slots) if slots > 0 => current_slot_estimate(genesis, now) / slots,
        _ => 0,
    }
}

/// Wall-clock time at which the operational certificate's KES key expires
pub fn kes_expiry(genesis: &GenesisModel, now: u64, remaining_periods: u64) -> Option<DateTime<Utc>> {
    let slots_per_period = genesis.shelley.slots_per_kes_period.filter(|s| *s > 0)?;
    let slot_in_period = current_slot_estimate(genesis, now) % slots_per_period;
    let remaining_slots = (remaining_periods * slots_per_period).saturating_sub(slot_in_period);
    let expiry = now + remaining_slots * genesis.shelley.slot_length_ms / 1000;
    Utc.timestamp_opt(expiry as i64, 0).single()
}

/// Qualitative sync diagnosis from reported slot versus estimated tip
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TipStatus {
    /// Node has not reported a slot yet
    Starting,
    Healthy(u64),
    Lagging(u64),
    /// Percentage of the estimated tip reached
    Syncing(f64),
}

pub fn tip_status(slot_num: u64, tip_ref: u64) -> TipStatus {
    if slot_num == 0 {
        return TipStatus::Starting;
    }
    let diff = tip_ref.saturating_sub(slot_num);
    if diff <= TIP_DIFF_HEALTHY {
        TipStatus::Healthy(diff)
    } else if diff <= TIP_DIFF_LAGGING {
        TipStatus::Lagging(diff)
    } else {
        TipStatus::Syncing(slot_num as f64 / tip_ref as f64 * 100.0)
    }
}

/// Wall-clock derived chain position, refreshed by the bookkeeping task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPosition {
    /// Shown until the node reports its epoch
    pub epoch_estimate: u64,
    /// Compared against the KES period the node reports
    pub kes_period: u64,
}

impl ChainPosition {
    pub fn at(genesis: &GenesisModel, now: u64) -> Self {
        Self {
            epoch_estimate: current_epoch_estimate(genesis, now),
            kes_period: current_kes_period(genesis, now),
        }
    }
}

/// `[Nd ]HH:MM:SS`
pub fn format_duration(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs / 3_600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
