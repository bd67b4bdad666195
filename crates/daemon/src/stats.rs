//! Aggregate encode statistics.
//!
//! Computed from the persisted ledger on demand; nothing here caches.

use crate::ledger::Ledger;
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Global encoding statistics over all finished jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeStats {
    /// Total number of encodes completed.
    pub total_encoded: i64,
    /// Total bytes saved across all encodes.
    pub total_saved_bytes: i64,
    /// Average bytes saved per item.
    pub avg_saved_bytes: f64,
    /// Median time spent encoding one item, in hours.
    pub median_time_spent_hours: f64,
    /// Average time spent encoding one item, in hours.
    pub avg_time_spent_hours: f64,
}

impl Default for EncodeStats {
    fn default() -> Self {
        Self {
            total_encoded: 0,
            total_saved_bytes: 0,
            avg_saved_bytes: 0.0,
            median_time_spent_hours: 0.0,
            avg_time_spent_hours: 0.0,
        }
    }
}

/// Aggregate statistics over every finished job in the ledger.
///
/// A ledger with no finished jobs yields all-zero statistics rather than an
/// error.
pub async fn collect_stats(ledger: &Ledger) -> Result<EncodeStats, sqlx::Error> {
    let finished = ledger.finished().await?;
    if finished.is_empty() {
        return Ok(EncodeStats::default());
    }

    let total_encoded = finished.len() as i64;

    let total_saved_bytes: i64 = finished
        .iter()
        .filter_map(|job| Some(job.initial_size? - job.final_size?))
        .sum();
    let avg_saved_bytes = total_saved_bytes as f64 / total_encoded as f64;

    let mut durations: Vec<f64> = finished
        .iter()
        .filter_map(|job| {
            let ended = job.ended_at?;
            Some((ended - job.started_at).num_seconds() as f64)
        })
        .collect();
    durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let avg_seconds = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    Ok(EncodeStats {
        total_encoded,
        total_saved_bytes,
        avg_saved_bytes,
        median_time_spent_hours: median(&durations) / SECONDS_PER_HOUR,
        avg_time_spent_hours: avg_seconds / SECONDS_PER_HOUR,
    })
}

/// Median of a sorted slice; the mean of the two middle values for even
/// lengths, 0 when empty.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
