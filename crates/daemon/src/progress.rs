//! Progress protocol for spawned encoder processes.
//!
//! ffmpeg's `-progress` output is a stream of `key=value` lines; each update
//! block repeats the full set of counters and ends with a `progress` line
//! whose value is `continue` or, on the last block, `end`. Known keys map to
//! typed fields; unknown keys are ignored.

use serde::Serialize;

/// Terminal value of the `progress` key in the last update block.
pub const PROGRESS_END: &str = "end";

/// Latest progress snapshot reported by an encoder process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EncodeProgress {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub bitrate: Option<String>,
    pub total_size: Option<u64>,
    pub out_time: Option<String>,
    pub dup_frames: Option<u64>,
    pub drop_frames: Option<u64>,
    pub speed: Option<String>,
    pub progress: Option<String>,
}

impl EncodeProgress {
    /// Apply a single `key=value` line to the snapshot.
    ///
    /// Values may themselves contain `=`; only the first one separates the
    /// key. Lines without a separator and unknown keys are ignored.
    pub fn apply_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let value = value.trim();

        match key.trim() {
            "frame" => self.frame = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "bitrate" => self.bitrate = Some(value.to_string()),
            "total_size" => self.total_size = value.parse().ok(),
            "out_time" => self.out_time = Some(value.to_string()),
            "dup_frames" => self.dup_frames = value.parse().ok(),
            "drop_frames" => self.drop_frames = value.parse().ok(),
            "speed" => self.speed = Some(value.to_string()),
            "progress" => self.progress = Some(value.to_string()),
            _ => {}
        }
    }

    /// Whether the encoder reported the terminal `progress=end` marker.
    pub fn is_finished(&self) -> bool {
        self.progress.as_deref() == Some(PROGRESS_END)
    }
}

/// Incremental parser for a chunked progress stream.
///
/// Chunk boundaries do not align with line boundaries, so a partial trailing
/// line is buffered until the rest of it arrives.
#[derive(Debug, Default)]
pub struct ProgressParser {
    buf: String,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, applying every complete line to `snapshot`.
    pub fn feed(&mut self, chunk: &[u8], snapshot: &mut EncodeProgress) {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        while let Some(newline) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=newline).collect();
            let line = line.trim_end_matches('\n');
            if !line.is_empty() {
                snapshot.apply_line(line);
            }
        }
    }

    /// Apply any buffered trailing line; call once when the stream ends.
    pub fn finish(&mut self, snapshot: &mut EncodeProgress) {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            snapshot.apply_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("frame=1024");
        progress.apply_line("fps=59.94");
        progress.apply_line("bitrate=1843.2kbits/s");
        progress.apply_line("total_size=4718592");
        progress.apply_line("out_time=00:01:12.480000");
        progress.apply_line("speed=2.41x");
        progress.apply_line("progress=continue");

        assert_eq!(progress.frame, Some(1024));
        assert_eq!(progress.fps, Some(59.94));
        assert_eq!(progress.bitrate.as_deref(), Some("1843.2kbits/s"));
        assert_eq!(progress.total_size, Some(4718592));
        assert_eq!(progress.out_time.as_deref(), Some("00:01:12.480000"));
        assert_eq!(progress.speed.as_deref(), Some("2.41x"));
        assert!(!progress.is_finished());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("stream_0_0_q=28.0");
        progress.apply_line("out_time_us=72480000");

        assert_eq!(progress, EncodeProgress::default());
    }

    #[test]
    fn test_value_containing_equals() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("out_time=00:00:01=weird");

        assert_eq!(progress.out_time.as_deref(), Some("00:00:01=weird"));
    }

    #[test]
    fn test_line_without_separator_ignored() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("garbage");

        assert_eq!(progress, EncodeProgress::default());
    }

    #[test]
    fn test_end_marker() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("progress=end");

        assert!(progress.is_finished());
    }

    #[test]
    fn test_parser_single_chunk() {
        let mut parser = ProgressParser::new();
        let mut snapshot = EncodeProgress::default();
        parser.feed(b"frame=10\nfps=24.0\nprogress=continue\n", &mut snapshot);

        assert_eq!(snapshot.frame, Some(10));
        assert_eq!(snapshot.fps, Some(24.0));
        assert_eq!(snapshot.progress.as_deref(), Some("continue"));
    }

    #[test]
    fn test_parser_line_split_across_chunks() {
        let mut parser = ProgressParser::new();
        let mut snapshot = EncodeProgress::default();

        parser.feed(b"frame=42\nout_ti", &mut snapshot);
        assert_eq!(snapshot.frame, Some(42));
        // partial line not applied yet
        assert_eq!(snapshot.out_time, None);

        parser.feed(b"me=00:00:05.000000\n", &mut snapshot);
        assert_eq!(snapshot.out_time.as_deref(), Some("00:00:05.000000"));
    }

    #[test]
    fn test_parser_later_chunks_overwrite() {
        let mut parser = ProgressParser::new();
        let mut snapshot = EncodeProgress::default();

        parser.feed(b"frame=10\nprogress=continue\n", &mut snapshot);
        parser.feed(b"frame=20\nprogress=end\n", &mut snapshot);

        assert_eq!(snapshot.frame, Some(20));
        assert!(snapshot.is_finished());
    }

    #[test]
    fn test_parser_finish_flushes_unterminated_line() {
        let mut parser = ProgressParser::new();
        let mut snapshot = EncodeProgress::default();

        parser.feed(b"frame=7\nprogress=end", &mut snapshot);
        assert!(!snapshot.is_finished());

        parser.finish(&mut snapshot);
        assert!(snapshot.is_finished());
    }
}
