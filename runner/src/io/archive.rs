//! Append-only archive of terminal goals.
//!
//! Each archived goal is one pretty-printed JSON file named
//! `<goal_id>__<YYYYMMDDTHHMMSSZ>.json`. Files are created with `create_new` and
//! never rewritten; a numeric suffix separates goals archived in the same second.
//! Archiving a goal whose identical record is already present returns the
//! existing file, so a crash between archiving and clearing `tree.json` does not
//! leave a duplicate.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::error::PersistenceFailure;
use crate::io::atomic::sync_parent_dir;
use crate::tree::Goal;

const MAX_COLLISIONS: u32 = 1000;

/// Write `goal` into `archive_dir` and return the new file's path.
#[instrument(skip_all, fields(goal_id = %goal.goal_id))]
pub fn archive_goal(
    archive_dir: &Path,
    goal: &Goal,
    now: DateTime<Utc>,
) -> Result<PathBuf, PersistenceFailure> {
    fs::create_dir_all(archive_dir).map_err(|error| PersistenceFailure::Write {
        path: archive_dir.to_path_buf(),
        error,
    })?;
    let mut payload = serde_json::to_vec_pretty(goal).map_err(PersistenceFailure::Serialize)?;
    payload.push(b'\n');

    let stamp = goal.completed_at.unwrap_or(now).format("%Y%m%dT%H%M%SZ");
    let base = format!("{}__{}", file_safe(&goal.goal_id), stamp);

    for attempt in 0..MAX_COLLISIONS {
        let name = if attempt == 0 {
            format!("{}.json", base)
        } else {
            format!("{}-{}.json", base, attempt)
        };
        let path = archive_dir.join(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                if fs::read(&path).is_ok_and(|existing| existing == payload) {
                    info!(path = %path.display(), "goal already archived");
                    return Ok(path);
                }
                continue;
            }
            Err(error) => return Err(PersistenceFailure::Write { path, error }),
        };
        let written = file
            .write_all(&payload)
            .and_then(|()| file.sync_all())
            .and_then(|()| sync_parent_dir(archive_dir));
        if let Err(error) = written {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(PersistenceFailure::Write { path, error });
        }
        info!(path = %path.display(), status = goal.status.as_str(), "goal archived");
        return Ok(path);
    }

    Err(PersistenceFailure::Write {
        path: archive_dir.join(format!("{}.json", base)),
        error: std::io::Error::new(ErrorKind::AlreadyExists, "too many archive name collisions"),
    })
}

/// Archived goal files, oldest name first.
pub fn list_archive(archive_dir: &Path) -> Result<Vec<PathBuf>, PersistenceFailure> {
    if !archive_dir.exists() {
        return Ok(Vec::new());
    }
    let read_err = |error| PersistenceFailure::Read {
        path: archive_dir.to_path_buf(),
        error,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(archive_dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
