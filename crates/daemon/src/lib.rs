//! shrinkd
//!
//! Post-download re-encode daemon: admits completed media entries, bounds
//! concurrent ffmpeg processes, tracks their progress over HTTP, replaces
//! originals with the encoded output, and keeps a durable job ledger.

pub mod command;
pub mod daemon;
pub mod encode_config;
pub mod finalize;
pub mod ledger;
pub mod probe;
pub mod progress;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod window;

pub use shrinkd_config as config;
pub use shrinkd_config::Config;

pub use command::{build_encode_command, encoded_path, progress_url, ENCODED_EXTENSION};
pub use daemon::{Daemon, DaemonError};
pub use encode_config::{EncodeConfig, QualityPreset, DEFAULT_SPEED_PRESET, VALID_SPEED_PRESETS};
pub use finalize::{finalize, FinalizeError};
pub use ledger::{EncodeJob, Ledger, MediaEntry, STATE_COMPLETED};
pub use probe::FfmpegProbe;
pub use progress::{EncodeProgress, ProgressParser, PROGRESS_END};
pub use scheduler::{ActiveEncode, Scheduler, SchedulerStatus};
pub use server::{create_router, run_server, ServerError};
pub use stats::{collect_stats, EncodeStats};
pub use window::{seconds_until, seconds_until_now};
