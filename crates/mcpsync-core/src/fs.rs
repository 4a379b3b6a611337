//! Small filesystem helpers shared by the stores and the synchronizer.
//!
//! Every file written here starts out owner-only and only widens to the
//! permissions of the file it replaces once its content is complete.

use crate::error::McpSyncError;
use crate::paths::ensure_parent;
use std::fs::{File, OpenOptions, Permissions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub(crate) fn read_optional_file(path: &Path) -> Result<Option<Vec<u8>>, McpSyncError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(McpSyncError::io(path, error)),
    }
}

/// Permissions of `path` when it exists.
pub(crate) fn existing_permissions(path: &Path) -> Option<Permissions> {
    std::fs::metadata(path).ok().map(|meta| meta.permissions())
}

/// Replaces `path` through a temp file in the same directory.
///
/// The new file keeps the permissions of the one it replaces; a file that did
/// not exist yet is created owner-only.
pub(crate) fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), McpSyncError> {
    replace_file(path, bytes, existing_permissions(path))
}

/// Like [`write_file_atomic`] but always owner-only, whatever the old mode was.
pub(crate) fn write_private_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), McpSyncError> {
    replace_file(path, bytes, None)
}

fn replace_file(
    path: &Path,
    bytes: &[u8],
    permissions: Option<Permissions>,
) -> Result<(), McpSyncError> {
    ensure_parent(path).map_err(|error| McpSyncError::io(path, error))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp =
        NamedTempFile::new_in(directory).map_err(|error| McpSyncError::io(directory, error))?;
    restrict_file_to_owner(tmp.as_file()).map_err(|error| McpSyncError::io(tmp.path(), error))?;
    tmp.write_all(bytes)
        .map_err(|error| McpSyncError::io(tmp.path(), error))?;
    tmp.as_file()
        .sync_all()
        .map_err(|error| McpSyncError::io(tmp.path(), error))?;
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|error| McpSyncError::io(tmp.path(), error))?;
    }

    tmp.persist(path)
        .map_err(|error| McpSyncError::io(path, error.error))?;
    Ok(())
}

/// Creates `path` (failing if it exists), owner-only until `permissions` is applied.
pub(crate) fn create_new_file(
    path: &Path,
    bytes: &[u8],
    permissions: Option<Permissions>,
) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    match permissions {
        Some(permissions) => file.set_permissions(permissions),
        None => restrict_file_to_owner(&file),
    }
}

#[cfg(unix)]
fn restrict_file_to_owner(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_file_to_owner(_file: &File) -> std::io::Result<()> {
    Ok(())
}
