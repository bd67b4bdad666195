//! Encoder capability probe.
//!
//! Checks once per process whether the configured ffmpeg binary is present
//! and built with libx264; the answer is cached for the process lifetime, so
//! installing ffmpeg requires a daemon restart to be picked up.

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::warn;

/// Build flag ffmpeg must advertise for H.264 encoding.
const REQUIRED_BUILD_FLAG: &str = "--enable-libx264";

/// One-time cached availability check for the external encoder.
#[derive(Debug, Default)]
pub struct FfmpegProbe {
    cached: OnceCell<bool>,
    assumed: Option<bool>,
}

impl FfmpegProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe that always reports a fixed answer. For tests.
    pub fn assume(available: bool) -> Self {
        Self {
            cached: OnceCell::new(),
            assumed: Some(available),
        }
    }

    /// Whether the encoder at `ffmpeg_path` is usable.
    ///
    /// The first call runs `<ffmpeg> -buildconf`; subsequent calls return the
    /// cached result.
    pub async fn available(&self, ffmpeg_path: &str) -> bool {
        if let Some(assumed) = self.assumed {
            return assumed;
        }

        *self
            .cached
            .get_or_init(|| probe_libx264(ffmpeg_path.to_string()))
            .await
    }
}

async fn probe_libx264(ffmpeg_path: String) -> bool {
    let output = match Command::new(&ffmpeg_path).arg("-buildconf").output().await {
        Ok(output) => output,
        Err(err) => {
            warn!(ffmpeg = %ffmpeg_path, error = %err, "ffmpeg is not runnable");
            return false;
        }
    };

    let buildconf = String::from_utf8_lossy(&output.stdout);
    let available = buildconf.contains(REQUIRED_BUILD_FLAG);
    if !available {
        warn!(ffmpeg = %ffmpeg_path, "ffmpeg found but built without libx264");
    }
    available
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assumed_probe_skips_process_check() {
        let probe = FfmpegProbe::assume(true);
        assert!(probe.available("/definitely/not/a/binary").await);

        let probe = FfmpegProbe::assume(false);
        assert!(!probe.available("/definitely/not/a/binary").await);
    }

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let probe = FfmpegProbe::new();
        assert!(!probe.available("/definitely/not/a/binary").await);
    }

    #[tokio::test]
    async fn test_result_is_cached_per_probe() {
        // `true` exits successfully but prints no build flags, so the first
        // probe caches `false` and later calls never re-run the binary.
        let probe = FfmpegProbe::new();
        assert!(!probe.available("true").await);
        assert!(!probe.available("true").await);
        assert_eq!(probe.cached.get(), Some(&false));
    }
}
