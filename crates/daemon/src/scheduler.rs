//! Encode admission, queueing, and process launching.
//!
//! The scheduler owns all mutable orchestration state: the FIFO of entries
//! waiting for a slot and the map of active jobs with their retained child
//! process handles. Both sit behind a single mutex; the lock is never held
//! across process spawns or ledger I/O, and a slot is reserved in the map
//! before launching so a concurrent submission of the same entry cannot
//! double-start it.

use crate::command::build_encode_command;
use crate::encode_config::EncodeConfig;
use crate::finalize;
use crate::ledger::{Ledger, STATE_COMPLETED};
use crate::probe::FfmpegProbe;
use crate::progress::EncodeProgress;
use crate::window::seconds_until_now;
use serde::Serialize;
use shrinkd_config::Config;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Launch attempts per submission when retry-on-fail is enabled.
///
/// Validation failures are usually stable (a file that is missing now will
/// still be missing a moment later), so retries are bounded instead of
/// looping until the condition clears.
const MAX_LAUNCH_ATTEMPTS: u32 = 3;

/// Slot occupant: reserved while launching, then the spawned process.
///
/// Handles are kept for the lifetime of the job rather than dropped at
/// spawn time, so outstanding processes remain enumerable.
enum EncodeHandle {
    Launching,
    Running(#[allow(dead_code)] Child),
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<i64>,
    active: HashMap<i64, EncodeHandle>,
}

/// A currently active encode and its latest reported progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveEncode {
    pub entry_id: i64,
    pub progress: EncodeProgress,
}

/// Point-in-time view of the scheduler for the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub active: Vec<ActiveEncode>,
    pub queued: Vec<i64>,
}

/// Admission controller and process launcher for encode jobs.
pub struct Scheduler {
    config: Config,
    ledger: Ledger,
    probe: FfmpegProbe,
    state: Mutex<SchedulerState>,
    snapshots: Mutex<HashMap<i64, EncodeProgress>>,
}

impl Scheduler {
    pub fn new(ledger: Ledger, config: Config) -> Self {
        Self::with_probe(ledger, config, FfmpegProbe::new())
    }

    /// Construct with a preset capability probe. Useful for testing without
    /// a real ffmpeg installation.
    pub fn with_probe(ledger: Ledger, config: Config, probe: FfmpegProbe) -> Self {
        Self {
            config,
            ledger,
            probe,
            state: Mutex::new(SchedulerState::default()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Request an encode for `entry_id`.
    ///
    /// Never fails from the caller's perspective: every outcome (launched,
    /// queued, skipped, rejected) is observable only through the ledger and
    /// logs. When timed encoding is enabled the call suspends until the
    /// window opens; the wait is computed once from the config read at
    /// submission and is not re-evaluated if settings change during it.
    pub async fn submit(&self, entry_id: i64) {
        let mut next = Some(entry_id);
        while let Some(id) = next.take() {
            next = self.admit(id).await;
        }
    }

    /// Promote the next queued entry, if any.
    pub async fn advance(&self) {
        let next = { self.state.lock().await.queue.pop_front() };
        if let Some(id) = next {
            debug!(entry_id = id, "promoting queued entry");
            self.submit(id).await;
        }
    }

    /// Re-submit every job the ledger still has open, oldest first.
    ///
    /// Called once at startup so work interrupted by a restart is retried or
    /// re-queued through the normal admission path.
    pub async fn resume(&self) {
        let leftovers = match self.ledger.unfinished().await {
            Ok(leftovers) => leftovers,
            Err(err) => {
                error!(error = %err, "failed to read unfinished jobs for resume");
                return;
            }
        };

        if !leftovers.is_empty() {
            info!(count = leftovers.len(), "resuming interrupted encodes");
        }
        for entry_id in leftovers {
            self.submit(entry_id).await;
        }
    }

    /// One admission pass for `entry_id`.
    ///
    /// Returns the next entry to admit when this one failed its launch and
    /// released a slot that a queued entry should take over.
    async fn admit(&self, entry_id: i64) -> Option<i64> {
        let config = match EncodeConfig::refresh(self.ledger.pool()).await {
            Ok(config) => config,
            Err(err) => {
                error!(entry_id, error = %err, "failed to refresh encode config");
                return None;
            }
        };

        if !config.enabled {
            debug!(entry_id, "encoding is disabled, skipping");
            return None;
        }
        if !self.probe.available(&self.config.encoder.ffmpeg_path).await {
            warn!(entry_id, "unable to encode: ffmpeg is not installed");
            return None;
        }

        if let Err(err) = self.ledger.create_job(entry_id).await {
            error!(entry_id, error = %err, "failed to create job record");
            return None;
        }

        if config.timed_encoding {
            let wait = seconds_until_now(config.hour_start, config.hour_end);
            if wait > 0 {
                debug!(entry_id, wait, "timed encoding enabled, waiting for window");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        }

        {
            let mut state = self.state.lock().await;
            if state.active.contains_key(&entry_id) || state.queue.contains(&entry_id) {
                debug!(entry_id, "entry already active or queued, skipping");
                return None;
            }
            if state.active.len() >= config.maximum_encodes as usize {
                debug!(entry_id, "reached maximum encodes, queueing");
                state.queue.push_back(entry_id);
                return None;
            }
            // reserve the slot before launching
            state.active.insert(entry_id, EncodeHandle::Launching);
        }

        let mut attempt = 1;
        loop {
            if self.launch(entry_id, &config).await {
                return None;
            }
            if config.retry_on_fail && attempt < MAX_LAUNCH_ATTEMPTS {
                attempt += 1;
                warn!(entry_id, attempt, "encode launch failed, retrying");
                continue;
            }
            break;
        }

        // Launch failed for good: free the slot, forget the attempt so the
        // entry can be tried again later, and hand the slot to the queue.
        let next = {
            let mut state = self.state.lock().await;
            state.active.remove(&entry_id);
            state.queue.pop_front()
        };
        if let Err(err) = self.ledger.delete_job(entry_id).await {
            error!(entry_id, error = %err, "failed to delete job record");
        }
        next
    }

    /// Validate the entry's file and spawn the encoder for it.
    ///
    /// Returns true when the process was started. All failures are terminal
    /// for this attempt: they are logged, not retried here.
    async fn launch(&self, entry_id: i64, config: &EncodeConfig) -> bool {
        let entry = match self.ledger.media_entry(entry_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(entry_id, "cannot encode: no such media entry");
                return false;
            }
            Err(err) => {
                error!(entry_id, error = %err, "failed to read media entry");
                return false;
            }
        };

        let Some(file_path) = entry.file_path else {
            warn!(entry_id, "cannot encode: file path is not set");
            return false;
        };
        if entry.current_state != STATE_COMPLETED {
            warn!(entry_id, state = %entry.current_state, "cannot encode a non-completed entry");
            return false;
        }

        let input = Path::new(&file_path);
        let metadata = match tokio::fs::symlink_metadata(input).await {
            Ok(metadata) => metadata,
            Err(_) => {
                warn!(entry_id, path = %input.display(), "cannot encode: input file does not exist");
                return false;
            }
        };
        if !metadata.is_file() || metadata.file_type().is_symlink() {
            warn!(
                entry_id,
                path = %input.display(),
                "cannot encode: input is not a regular file, or is a symlink"
            );
            return false;
        }

        debug!(entry_id, "starting new encode process");
        let mut cmd = build_encode_command(
            entry_id,
            input,
            config,
            &self.config.server,
            &self.config.encoder.ffmpeg_path,
        );

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(entry_id, error = %err, "failed to start encode process");
                return false;
            }
        };

        {
            let mut state = self.state.lock().await;
            state.active.insert(entry_id, EncodeHandle::Running(child));
        }
        if let Err(err) = self.ledger.set_initial_size(entry_id, metadata.len() as i64).await {
            error!(entry_id, error = %err, "failed to record initial size");
        }
        true
    }

    /// Retain the latest progress snapshot reported for an entry.
    pub async fn record_progress(&self, entry_id: i64, snapshot: EncodeProgress) {
        self.snapshots.lock().await.insert(entry_id, snapshot);
    }

    /// Handle the end of an entry's progress stream.
    ///
    /// Frees the slot exactly once, promotes the next queued entry, then
    /// either finalizes (on the terminal `progress=end` marker) or treats
    /// the stream as a failed attempt and applies the retry policy.
    pub async fn complete_stream(&self, entry_id: i64, last: EncodeProgress) {
        let was_active = {
            let mut state = self.state.lock().await;
            state.active.remove(&entry_id).is_some()
        };
        self.snapshots.lock().await.remove(&entry_id);

        if !was_active {
            warn!(entry_id, "progress stream ended for an entry that is not active");
            return;
        }

        self.advance().await;

        if last.is_finished() {
            debug!(entry_id, "encode finished");
            if let Err(err) = finalize::finalize(&self.ledger, entry_id).await {
                error!(entry_id, error = %err, "failed to finalize encode");
            }
        } else {
            warn!(entry_id, "encode stream ended without the end marker");
            let retry = match EncodeConfig::refresh(self.ledger.pool()).await {
                Ok(config) => config.retry_on_fail,
                Err(err) => {
                    error!(entry_id, error = %err, "failed to refresh encode config");
                    false
                }
            };
            if retry {
                self.submit(entry_id).await;
            } else if let Err(err) = self.ledger.delete_job(entry_id).await {
                error!(entry_id, error = %err, "failed to delete job record");
            }
        }
    }

    /// Current active and queued entries.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        let snapshots = self.snapshots.lock().await;

        let mut active: Vec<ActiveEncode> = state
            .active
            .keys()
            .map(|&entry_id| ActiveEncode {
                entry_id,
                progress: snapshots.get(&entry_id).cloned().unwrap_or_default(),
            })
            .collect();
        active.sort_by_key(|encode| encode.entry_id);

        SchedulerStatus {
            active,
            queued: state.queue.iter().copied().collect(),
        }
    }
}
