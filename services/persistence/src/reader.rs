//! Journal replay.
//!
//! Segments are read in index order. A corrupt or truncated record marks
//! the recovery point: everything before it is kept, everything after is
//! untrusted and dropped. The repair variant also truncates the damaged
//! segment so future appends land on a clean tail.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::journal::JournalRecord;
use crate::store::StoreError;

/// Ordered list of segment files in `dir`.
pub fn segment_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, StoreError> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(index) = name
            .strip_prefix("journal-")
            .and_then(|rest| rest.strip_suffix(".bin"))
            .and_then(|digits| digits.parse::<u64>().ok())
        {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Highest existing segment index (0 when the directory is empty).
pub fn latest_segment_index(dir: &Path) -> u64 {
    segment_files(dir)
        .ok()
        .and_then(|segments| segments.last().map(|(index, _)| *index))
        .unwrap_or(0)
}

/// Scan one segment; returns the valid records and the clean byte length.
pub fn scan_segment(path: &Path) -> Result<(Vec<JournalRecord>, u64), StoreError> {
    let bytes = fs::read(path)?;
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        match JournalRecord::from_bytes(&bytes[pos..]) {
            Ok((record, consumed)) => {
                records.push(record);
                pos += consumed;
            }
            Err(err) => {
                warn!(
                    segment = %path.display(),
                    offset = pos,
                    %err,
                    "journal segment damaged; replay stops here"
                );
                break;
            }
        }
    }
    Ok((records, pos as u64))
}

/// Read every intact record across all segments (read-only).
pub fn replay_dir(dir: &Path) -> Result<Vec<JournalRecord>, StoreError> {
    let mut records = Vec::new();
    for (_, path) in segment_files(dir)? {
        let size = fs::metadata(&path)?.len();
        let (mut segment_records, valid_len) = scan_segment(&path)?;
        records.append(&mut segment_records);
        if valid_len < size {
            // Damage means crash-at-tail; anything after is untrusted.
            break;
        }
    }
    Ok(records)
}

/// Replay all segments, truncating a damaged tail so appends stay clean.
pub fn replay_and_repair(dir: &Path) -> Result<Vec<JournalRecord>, StoreError> {
    let mut records = Vec::new();
    let segments = segment_files(dir)?;
    for (i, (_, path)) in segments.iter().enumerate() {
        let size = fs::metadata(path)?.len();
        let (mut segment_records, valid_len) = scan_segment(path)?;
        records.append(&mut segment_records);
        if valid_len < size {
            warn!(
                segment = %path.display(),
                kept = valid_len,
                dropped = size - valid_len,
                "truncating damaged journal tail"
            );
            let file = fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            // Later segments (if any) postdate the damage; drop them.
            for (_, stale) in &segments[i + 1..] {
                warn!(segment = %stale.display(), "removing journal segment past damaged tail");
                fs::remove_file(stale)?;
            }
            break;
        }
    }
    Ok(records)
}
