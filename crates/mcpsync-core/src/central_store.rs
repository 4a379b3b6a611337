use crate::error::McpSyncError;
use crate::fs::write_file_atomic;
use crate::models::{
    iso8601_now, validate_server_name, CentralConfig, CentralRecord, EnvValue, ServerConfig,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence for the central server catalog.
pub trait CentralConfigRepository {
    /// Current document, or a fresh default when it is missing or unreadable.
    fn load(&self) -> CentralConfig;

    fn save(&self, config: &CentralConfig) -> Result<(), McpSyncError>;

    /// Where the document lives, when it lives on disk.
    fn location(&self) -> Option<&Path> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct CentralConfigFile {
    path: PathBuf,
}

impl CentralConfigFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CentralConfigRepository for CentralConfigFile {
    fn load(&self) -> CentralConfig {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), %error, "failed to read central config");
                }
                return CentralConfig::fresh();
            }
        };

        match serde_json::from_slice::<CentralConfig>(&data) {
            Ok(config) => {
                tracing::debug!(servers = config.servers.len(), "loaded central config");
                config
            }
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "central config is malformed, starting from defaults"
                );
                CentralConfig::fresh()
            }
        }
    }

    fn save(&self, config: &CentralConfig) -> Result<(), McpSyncError> {
        let mut payload = serde_json::to_vec_pretty(config)?;
        payload.push(b'\n');
        write_file_atomic(&self.path, &payload)
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCentralConfig {
    document: Mutex<Option<CentralConfig>>,
}

impl InMemoryCentralConfig {
    pub fn new(config: CentralConfig) -> Self {
        Self {
            document: Mutex::new(Some(config)),
        }
    }
}

impl CentralConfigRepository for InMemoryCentralConfig {
    fn load(&self) -> CentralConfig {
        self.document
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(CentralConfig::fresh)
    }

    fn save(&self, config: &CentralConfig) -> Result<(), McpSyncError> {
        if let Ok(mut guard) = self.document.lock() {
            *guard = Some(config.clone());
        }
        Ok(())
    }
}

pub struct CentralConfigStore {
    repository: Box<dyn CentralConfigRepository>,
}

impl CentralConfigStore {
    pub fn new(repository: Box<dyn CentralConfigRepository>) -> Self {
        Self { repository }
    }

    pub fn load(&self) -> CentralConfig {
        self.repository.load()
    }

    /// Stamps `metadata.last_updated` and persists the document.
    pub fn save(&self, config: &mut CentralConfig) -> Result<(), McpSyncError> {
        config.metadata.last_updated = iso8601_now();
        if config.metadata.created.is_empty() {
            config.metadata.created = config.metadata.last_updated.clone();
        }

        self.repository.save(config).map_err(|error| {
            tracing::error!(%error, "failed to save central config");
            McpSyncError::CentralSaveFailed {
                path: self
                    .repository
                    .location()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                reason: error.to_string(),
            }
        })?;
        tracing::info!(servers = config.servers.len(), "central config saved");
        Ok(())
    }

    /// Creates or replaces the record for `name`.
    ///
    /// Each required variable becomes a placeholder; literal extras are
    /// applied on top and win on key collisions.
    pub fn add_or_update(
        &self,
        name: &str,
        command: &str,
        args: Vec<String>,
        required_env_vars: &[String],
        extra_env_vars: &BTreeMap<String, String>,
    ) -> Result<CentralRecord, McpSyncError> {
        validate_server_name(name)?;
        if command.trim().is_empty() {
            return Err(McpSyncError::invalid_input(
                "command must not be empty",
                "pass the executable, e.g. npx or an absolute path",
            ));
        }

        let mut config = ServerConfig::new(command, args);
        for var in required_env_vars {
            config
                .env
                .insert(var.clone(), EnvValue::Placeholder(var.clone()));
        }
        for (key, value) in extra_env_vars {
            config
                .env
                .insert(key.clone(), EnvValue::Literal(value.clone()));
        }

        let record = CentralRecord {
            name: name.to_string(),
            config,
            required_env_vars: required_env_vars.iter().cloned().collect(),
            installed_at: iso8601_now(),
        };

        let mut central = self.load();
        central.servers.insert(name.to_string(), record.clone());
        self.save(&mut central)?;
        tracing::info!(server = name, "server added to central config");
        Ok(record)
    }

    /// Drops the record for `name`; `false` when there was nothing to drop.
    pub fn remove(&self, name: &str) -> Result<bool, McpSyncError> {
        validate_server_name(name)?;
        let mut central = self.load();
        if central.servers.shift_remove(name).is_none() {
            tracing::debug!(server = name, "server not in central config");
            return Ok(false);
        }
        self.save(&mut central)?;
        tracing::info!(server = name, "server removed from central config");
        Ok(true)
    }

    pub fn location(&self) -> Option<&Path> {
        self.repository.location()
    }
}
