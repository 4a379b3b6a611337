use crate::error::McpSyncError;
use crate::fs::write_private_file_atomic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub type SecretMap = BTreeMap<String, String>;

/// Flat `KEY=VALUE` secret storage.
///
/// Implementations do no locking of their own. `upsert` is a
/// load-modify-save sequence, so two processes writing at once can lose
/// one of the updates; secret collection is a rare, user-driven event and
/// the last writer wins.
pub trait SecretRepository {
    fn load(&self) -> SecretMap;

    fn save(&self, entries: &SecretMap) -> Result<(), McpSyncError>;

    fn upsert(&self, key: &str, value: &str) -> Result<(), McpSyncError> {
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }
}

#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretRepository for EnvFileStore {
    fn load(&self) -> SecretMap {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => parse_env_lines(&raw),
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), %error, "failed to read secret store");
                }
                SecretMap::new()
            }
        }
    }

    fn save(&self, entries: &SecretMap) -> Result<(), McpSyncError> {
        write_private_file_atomic(&self.path, render_env_lines(entries).as_bytes())?;
        tracing::info!(
            path = %self.path.display(),
            keys = entries.len(),
            "secret store saved"
        );
        Ok(())
    }
}

/// Secret store kept in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemorySecrets {
    entries: Mutex<SecretMap>,
}

impl InMemorySecrets {
    pub fn new(entries: SecretMap) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut entries = SecretMap::new();
        entries.insert(key.to_string(), value.to_string());
        Self::new(entries)
    }
}

impl SecretRepository for InMemorySecrets {
    fn load(&self) -> SecretMap {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn save(&self, entries: &SecretMap) -> Result<(), McpSyncError> {
        if let Ok(mut guard) = self.entries.lock() {
            *guard = entries.clone();
        }
        Ok(())
    }
}

pub fn parse_env_lines(raw: &str) -> SecretMap {
    let mut entries = SecretMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    entries
}

pub fn render_env_lines(entries: &SecretMap) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{parse_env_lines, EnvFileStore, SecretRepository};

    #[test]
    fn parse_skips_comments_and_splits_on_first_equals() {
        let entries = parse_env_lines(
            "# comment\n\n  GITHUB_TOKEN = abc=123 \nMALFORMED\nEMPTY=\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get("GITHUB_TOKEN").map(String::as_str), Some("abc=123"));
        assert_eq!(entries.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = EnvFileStore::new(temp.path().join("nested").join(".env"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn upsert_writes_sorted_entries_and_keeps_existing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(".env");
        let store = EnvFileStore::new(path.clone());

        store.upsert("ZETA_KEY", "z").expect("upsert zeta");
        store.upsert("ALPHA_KEY", "a").expect("upsert alpha");
        store.upsert("ZETA_KEY", "z2").expect("overwrite zeta");

        let raw = std::fs::read_to_string(&path).expect("read env");
        assert_eq!(raw, "ALPHA_KEY=a\nZETA_KEY=z2\n");
    }

    #[cfg(unix)]
    #[test]
    fn save_restricts_permissions_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".env");
        std::fs::write(&path, "OLD=1\n").expect("seed");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");
        let store = EnvFileStore::new(path.clone());
        store.upsert("KEY", "value").expect("upsert");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
