use crate::error::McpSyncError;
use crate::fs::{create_new_file, existing_permissions};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const BACKUP_MARKER: &str = ".backup.";

/// Name of the backup for `path` taken at `at`: `<file name>.backup.<YYYYmmdd_HHMMSS>`.
pub fn backup_path_for(path: &Path, at: DateTime<Local>) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("config"));
    let stamp = at.format("%Y%m%d_%H%M%S");
    path.with_file_name(format!("{file_name}{BACKUP_MARKER}{stamp}"))
}

/// Writes `content` next to `path` as a timestamped backup and returns where it went.
///
/// Never overwrites an existing backup; a `.N` counter is appended when two
/// backups land in the same second. The backup gets the permissions of `path`
/// (owner-only when `path` does not exist).
pub fn write_backup(path: &Path, content: &[u8]) -> Result<PathBuf, McpSyncError> {
    let permissions = existing_permissions(path);
    let base = backup_path_for(path, Local::now());
    let mut candidate = base.clone();
    let mut counter = 1u32;
    loop {
        match create_new_file(&candidate, content, permissions.clone()) {
            Ok(()) => break,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                let mut name = base.as_os_str().to_os_string();
                name.push(format!(".{counter}"));
                candidate = PathBuf::from(name);
                counter += 1;
            }
            Err(error) => return Err(McpSyncError::io(&candidate, error)),
        }
    }

    tracing::debug!(backup = %candidate.display(), "backup created");
    Ok(candidate)
}
