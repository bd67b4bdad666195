//! Encoder invocation builder.
//!
//! Builds the ffmpeg argument vector for one entry: all streams are copied,
//! only video is re-encoded to H.264 at the configured CRF and speed preset,
//! progress is streamed back to the daemon's callback route, and output goes
//! to a temporary-suffixed sibling of the input so the original is never
//! written in place. The invocation is always a discrete argument vector;
//! file paths and identifiers are never interpolated into a shell string.

use crate::encode_config::EncodeConfig;
use shrinkd_config::ServerConfig;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Extension given to in-flight encoder output files.
///
/// `show.mkv` encodes into `show.encoded.mkv` next to it; the finalizer
/// moves it back over the original on completion.
pub const ENCODED_EXTENSION: &str = "encoded.mkv";

/// Path the encoder writes to while the original stays untouched.
pub fn encoded_path(input: &Path) -> PathBuf {
    input.with_extension(ENCODED_EXTENSION)
}

/// Progress callback URL for one entry, served by this daemon.
pub fn progress_url(server: &ServerConfig, entry_id: i64) -> String {
    format!(
        "http://{}:{}/api/v1/encode/{}",
        server.host, server.port, entry_id
    )
}

/// Build the ffmpeg command for encoding one entry.
pub fn build_encode_command(
    entry_id: i64,
    input: &Path,
    config: &EncodeConfig,
    server: &ServerConfig,
    ffmpeg_path: &str,
) -> Command {
    let mut cmd = Command::new(ffmpeg_path);

    cmd.arg("-hide_banner");
    cmd.arg("-loglevel").arg("error");
    cmd.arg("-i").arg(input);

    // copy every stream, then re-encode only video
    cmd.arg("-map").arg("0");
    cmd.arg("-c").arg("copy");
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-crf").arg(config.quality.crf().to_string());
    cmd.arg("-tune").arg("animation");
    cmd.arg("-preset").arg(&config.speed_preset);
    cmd.arg("-c:a").arg("copy");

    cmd.arg("-progress").arg(progress_url(server, entry_id));

    cmd.arg("-y");
    cmd.arg(encoded_path(input));

    cmd
}
