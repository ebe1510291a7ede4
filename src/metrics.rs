//! Node metrics from the Prometheus endpoint.
//!
//! The text exposition is flattened into `name -> value` (labels dropped,
//! last sample wins) and then deserialized into [`NodeMetrics`], so a metric
//! the node does not export simply stays at zero.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::PrometheusConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetrics {
    #[serde(rename = "cardano_node_metrics_blockNum_int")]
    pub block_num: u64,
    #[serde(rename = "cardano_node_metrics_epoch_int")]
    pub epoch_num: u64,
    #[serde(rename = "cardano_node_metrics_slotInEpoch_int")]
    pub slot_in_epoch: u64,
    #[serde(rename = "cardano_node_metrics_slotNum_int")]
    pub slot_num: u64,
    #[serde(rename = "cardano_node_metrics_density_real")]
    pub density: f64,
    #[serde(rename = "cardano_node_metrics_txsProcessedNum_int")]
    pub tx_processed: u64,
    #[serde(rename = "cardano_node_metrics_txsInMempool_int")]
    pub mempool_tx: u64,
    #[serde(rename = "cardano_node_metrics_mempoolBytes_int")]
    pub mempool_bytes: u64,
    #[serde(rename = "cardano_node_metrics_currentKESPeriod_int")]
    pub kes_period: u64,
    #[serde(rename = "cardano_node_metrics_remainingKESPeriods_int")]
    pub remaining_kes_periods: u64,
    #[serde(rename = "cardano_node_metrics_Forge_node_is_leader_int")]
    pub is_leader: u64,
    #[serde(rename = "cardano_node_metrics_Forge_adopted_int")]
    pub adopted: u64,
    #[serde(rename = "cardano_node_metrics_Forge_didnt_adopt_int")]
    pub didnt_adopt: u64,
    #[serde(rename = "cardano_node_metrics_Forge_forge_about_to_lead_int")]
    pub about_to_lead: u64,
    #[serde(rename = "cardano_node_metrics_slotsMissedNum_int")]
    pub missed_slots: u64,
    #[serde(rename = "cardano_node_metrics_RTS_gcLiveBytes_int")]
    pub mem_live: u64,
    #[serde(rename = "cardano_node_metrics_RTS_gcHeapBytes_int")]
    pub mem_heap: u64,
    #[serde(rename = "cardano_node_metrics_RTS_gcMinorNum_int")]
    pub gc_minor: u64,
    #[serde(rename = "cardano_node_metrics_RTS_gcMajorNum_int")]
    pub gc_major: u64,
    #[serde(rename = "cardano_node_metrics_forks_int")]
    pub forks: u64,
    #[serde(rename = "cardano_node_metrics_blockfetchclient_blockdelay_s")]
    pub block_delay: f64,
    #[serde(rename = "cardano_node_metrics_served_block_count_int")]
    pub blocks_served: u64,
    #[serde(rename = "cardano_node_metrics_blockfetchclient_lateblocks")]
    pub blocks_late: u64,
    #[serde(rename = "cardano_node_metrics_blockfetchclient_blockdelay_cdfOne")]
    pub blocks_within_1s: f64,
    #[serde(rename = "cardano_node_metrics_blockfetchclient_blockdelay_cdfThree")]
    pub blocks_within_3s: f64,
    #[serde(rename = "cardano_node_metrics_blockfetchclient_blockdelay_cdfFive")]
    pub blocks_within_5s: f64,
    #[serde(rename = "cardano_node_metrics_peerSelection_cold")]
    pub peers_cold: u64,
    #[serde(rename = "cardano_node_metrics_peerSelection_warm")]
    pub peers_warm: u64,
    #[serde(rename = "cardano_node_metrics_peerSelection_hot")]
    pub peers_hot: u64,
    #[serde(rename = "cardano_node_metrics_connectionManager_incomingConns")]
    pub conn_incoming: u64,
    #[serde(rename = "cardano_node_metrics_connectionManager_outgoingConns")]
    pub conn_outgoing: u64,
    #[serde(rename = "cardano_node_metrics_connectionManager_unidirectionalConns")]
    pub conn_unidirectional: u64,
    #[serde(rename = "cardano_node_metrics_connectionManager_duplexConns")]
    pub conn_bidirectional: u64,
    #[serde(rename = "cardano_node_metrics_connectionManager_prunableConns")]
    pub conn_prunable: u64,
}

impl NodeMetrics {
    /// Typed view of flattened samples; absent keys default to zero.
    /// NaN and infinite samples count as absent.
    pub fn from_samples(samples: &HashMap<String, f64>) -> Result<Self, AppError> {
        let mut map = Map::with_capacity(samples.len());
        for (name, value) in samples {
            if !value.is_finite() {
                debug!(metric = %name, value, "Ignoring non-finite sample");
                continue;
            }
            let value = if INTEGER_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                integral_json(*value)
            } else {
                sample_to_json(*value)
            };
            map.insert(name.clone(), value);
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    pub fn parse(body: &str) -> Result<Self, AppError> {
        Self::from_samples(&parse_exposition(body)?)
    }

    /// Percentage of scheduled leader slots that were missed
    pub fn missed_slots_percent(&self) -> f64 {
        if self.about_to_lead == 0 {
            return 0.0;
        }
        self.missed_slots as f64 / (self.about_to_lead + self.missed_slots) as f64 * 100.0
    }
}

/// Metric name endings of counters and gauges read into `u64` fields
const INTEGER_SUFFIXES: &[&str] = &[
    "_int",
    "_lateblocks",
    "_cold",
    "_warm",
    "_hot",
    "Conns",
];

/// Truncated towards zero and clamped at zero for a `u64` field
fn integral_json(value: f64) -> Value {
    Value::Number(Number::from(value.max(0.0).trunc() as u64))
}

/// Integral samples become JSON integers so they land in `u64` fields
fn sample_to_json(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value <= u64::MAX as f64 {
        Value::Number(Number::from(value as u64))
    } else if value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value < 0.0 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Parse Prometheus text exposition into a flat map keyed by metric name
pub fn parse_exposition(body: &str) -> Result<HashMap<String, f64>, AppError> {
    let mut samples = HashMap::new();
    for (lineno, raw) in body.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (name, rest) = match line.find(|c: char| c == '{' || c.is_whitespace()) {
            Some(idx) if line[idx..].starts_with('{') => {
                let close = line[idx..].find('}').ok_or_else(|| {
                    AppError::Metrics(format!("line {}: unterminated label set", lineno + 1))
                })?;
                (&line[..idx], &line[idx + close + 1..])
            }
            Some(idx) => (&line[..idx], &line[idx..]),
            None => {
                return Err(AppError::Metrics(format!(
                    "line {}: missing sample value",
                    lineno + 1
                )))
            }
        };

        if name.is_empty() || !name.chars().all(is_metric_name_char) {
            return Err(AppError::Metrics(format!(
                "line {}: invalid metric name {:?}",
                lineno + 1,
                name
            )));
        }

        let value_str = rest.split_whitespace().next().ok_or_else(|| {
            AppError::Metrics(format!("line {}: missing sample value", lineno + 1))
        })?;
        let value = parse_sample_value(value_str).ok_or_else(|| {
            AppError::Metrics(format!(
                "line {}: invalid sample value {:?}",
                lineno + 1,
                value_str
            ))
        })?;
        samples.insert(name.to_string(), value);
    }
    Ok(samples)
}

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn parse_sample_value(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

/// HTTP client for the node's metrics endpoint
pub struct MetricsClient {
    client: reqwest::Client,
    url: String,
}

impl MetricsClient {
    pub fn new(config: &PrometheusConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            url: config.metrics_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<NodeMetrics, AppError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Metrics(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }
        let body = response.text().await?;
        let metrics = NodeMetrics::parse(&body)?;
        debug!(
            slot = metrics.slot_num,
            block = metrics.block_num,
            "Fetched node metrics"
        );
        Ok(metrics)
    }
}
