//! Text helpers shared by the panels.

use crate::epoch::TipStatus;

/// Width of one histogram row at 100%
pub const HISTOGRAM_WIDTH: usize = 34;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Bar of `width * percent / 100` cells
pub fn histogram_bar(percent: f64, width: usize) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let cells = (clamped * width as f64 / 100.0) as usize;
    "▌".repeat(cells)
}

pub fn percent_or_na(percent: Option<f64>) -> String {
    percent
        .map(|p| format!("{:.0}%", p))
        .unwrap_or_else(|| crate::node::NOT_AVAILABLE.to_string())
}

pub fn tip_status_text(status: Option<TipStatus>) -> String {
    match status {
        None => crate::node::NOT_AVAILABLE.to_string(),
        Some(TipStatus::Starting) => "starting...".to_string(),
        Some(TipStatus::Healthy(diff)) => format!("{} :)", diff),
        Some(TipStatus::Lagging(diff)) => format!("{} :|", diff),
        Some(TipStatus::Syncing(pct)) => format!("syncing {:.1}%", pct),
    }
}

/// Number with thousands separators
pub fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
