//! Encode settings store.
//!
//! Settings live in a singleton database row owned by the host application's
//! settings UI. They are re-read at the start of every admission decision and
//! never cached across calls, so edits take effect on the next submission.
//! Stored values outside the allowed sets are normalized to documented
//! defaults rather than surfaced as errors.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// x264 speed presets accepted in the `speed_preset` column.
pub const VALID_SPEED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Speed preset substituted for values outside [`VALID_SPEED_PRESETS`].
pub const DEFAULT_SPEED_PRESET: &str = "medium";

/// Named quality tier mapped to an x264 Constant Rate Factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    High,
    Moderate,
    Low,
}

impl QualityPreset {
    /// Parse a stored preset name; anything unrecognized is `Moderate`.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "high" => QualityPreset::High,
            "moderate" => QualityPreset::Moderate,
            "low" => QualityPreset::Low,
            _ => QualityPreset::Moderate,
        }
    }

    /// The CRF value handed to the encoder for this tier.
    pub fn crf(self) -> u8 {
        match self {
            QualityPreset::High => 18,
            QualityPreset::Moderate => 21,
            QualityPreset::Low => 24,
        }
    }
}

/// Normalized encode settings for one admission decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeConfig {
    pub enabled: bool,
    pub quality: QualityPreset,
    pub speed_preset: String,
    pub maximum_encodes: u32,
    pub retry_on_fail: bool,
    pub timed_encoding: bool,
    pub hour_start: u32,
    pub hour_end: u32,
}

/// Raw row shape before normalization.
#[derive(sqlx::FromRow)]
struct EncodeConfigRow {
    enabled: bool,
    quality_preset: String,
    speed_preset: String,
    maximum_encodes: i64,
    retry_on_fail: bool,
    timed_encoding: bool,
    hour_start: i64,
    hour_end: i64,
}

impl EncodeConfig {
    /// Read the current settings, creating the default row on first use.
    ///
    /// Invalid stored values are normalized, never rejected: unknown quality
    /// presets map to moderate, speed presets outside the allowed set fall
    /// back to [`DEFAULT_SPEED_PRESET`] with a logged correction, the
    /// concurrency limit is clamped to at least 1, and window hours are
    /// clamped into `[0, 23]`.
    pub async fn refresh(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO encode_config (id) VALUES (0)")
            .execute(pool)
            .await?;

        let row: EncodeConfigRow = sqlx::query_as(
            "SELECT enabled, quality_preset, speed_preset, maximum_encodes, \
                    retry_on_fail, timed_encoding, hour_start, hour_end \
             FROM encode_config WHERE id = 0",
        )
        .fetch_one(pool)
        .await?;

        let config = Self::normalize(row);
        debug!(?config, "encode config refreshed");
        Ok(config)
    }

    fn normalize(row: EncodeConfigRow) -> Self {
        let speed_preset = if VALID_SPEED_PRESETS.contains(&row.speed_preset.as_str()) {
            row.speed_preset
        } else {
            warn!(
                stored = %row.speed_preset,
                "invalid speed preset, falling back to '{}'",
                DEFAULT_SPEED_PRESET
            );
            DEFAULT_SPEED_PRESET.to_string()
        };

        Self {
            enabled: row.enabled,
            quality: QualityPreset::from_stored(&row.quality_preset),
            speed_preset,
            maximum_encodes: if row.maximum_encodes > 0 {
                row.maximum_encodes as u32
            } else {
                1
            },
            retry_on_fail: row.retry_on_fail,
            timed_encoding: row.timed_encoding,
            hour_start: row.hour_start.clamp(0, 23) as u32,
            hour_end: row.hour_end.clamp(0, 23) as u32,
        }
    }
}
