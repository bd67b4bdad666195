//! Completion handling for finished encodes.
//!
//! Once a progress stream ends with the terminal marker, the encoded output
//! is measured, the ledger row is closed, and the output replaces the
//! original file.

use crate::command::encoded_path;
use crate::ledger::Ledger;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while finalizing an encode.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The media entry record no longer exists.
    #[error("No media entry found for entry {0}")]
    EntryMissing(i64),

    /// The media entry has no file path set.
    #[error("Media entry {0} has no file path")]
    PathMissing(i64),

    /// The encoded output could not be read.
    #[error("Failed to read encoded output: {0}")]
    OutputUnreadable(io::Error),

    /// Moving the encoded output over the original failed.
    #[error("Failed to replace original file: {0}")]
    ReplaceFailed(io::Error),

    /// Ledger access failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),
}

/// Close out a finished encode for `entry_id`.
///
/// Reads the entry's file path, measures the temporary-suffixed output,
/// writes `ended_at` and `final_size` to the ledger in one statement, then
/// moves the output over the original path. A missing entry or path aborts
/// before any ledger write; a failed move is reported but never retried.
pub async fn finalize(ledger: &Ledger, entry_id: i64) -> Result<(), FinalizeError> {
    let entry = ledger
        .media_entry(entry_id)
        .await?
        .ok_or(FinalizeError::EntryMissing(entry_id))?;
    let original = entry
        .file_path
        .map(PathBuf::from)
        .ok_or(FinalizeError::PathMissing(entry_id))?;

    let encoded = encoded_path(&original);
    let encoded_size = fs::metadata(&encoded)
        .map_err(FinalizeError::OutputUnreadable)?
        .len();

    ledger.finish_job(entry_id, encoded_size as i64).await?;

    replace_file(&encoded, &original).map_err(FinalizeError::ReplaceFailed)?;
    debug!(entry_id, encoded_size, "encoded output moved into place");

    Ok(())
}

/// Move `encoded` over `original`.
///
/// Rename first (atomic on the same filesystem); fall back to copy plus
/// delete when the rename fails, e.g. across mount points.
fn replace_file(encoded: &Path, original: &Path) -> io::Result<()> {
    if fs::rename(encoded, original).is_ok() {
        return Ok(());
    }

    warn!(
        from = %encoded.display(),
        to = %original.display(),
        "rename failed, copying across filesystems"
    );
    fs::copy(encoded, original)?;
    fs::remove_file(encoded)?;
    Ok(())
}
