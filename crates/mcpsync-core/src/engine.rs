use crate::central_store::{CentralConfigFile, CentralConfigRepository, CentralConfigStore};
use crate::clients::{default_client_targets, ClientTarget};
use crate::detect::{
    detect_command, git_remote_url, introspect_installation, uv_fallback_locations,
    DirectorySnapshot, InstallationInfo, ToolAvailability, GIT_LOOKUP_TIMEOUT,
};
use crate::env_store::{EnvFileStore, SecretRepository};
use crate::error::McpSyncError;
use crate::inventory::{
    installed_server_directories, replication_markdown, replication_overview, CentralStatus,
    ClientEntrySummary, ExportedServer, InstalledServer, Inventory, SetupExport, EXPORT_NOTES,
};
use crate::models::{iso8601_now, validate_server_name, CentralConfig, CentralRecord};
use crate::paths::{home_dir, McpSyncPaths};
use crate::secrets::{self, CollectionOutcome, SecretPrompt, SecretRequest};
use crate::sync::{ClientConfigSynchronizer, ConfiguredServers, SyncReport, PROTECTED_SERVER};
use crate::validate::{
    is_executable, ConfigValidator, ExecutableLocator, LookupOutcome, PathLocator,
    ValidationReport,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const NODE_LAUNCHERS: [&str; 2] = ["node", "npx"];

#[derive(Debug, Clone)]
pub struct McpSyncEnvironment {
    pub home_directory: PathBuf,
    pub paths: McpSyncPaths,
    pub targets: Vec<ClientTarget>,
    pub protected_server: Option<String>,
}

impl McpSyncEnvironment {
    pub fn current() -> Self {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self::new(home, McpSyncPaths::detect())
    }

    /// Environment rooted at `home` with the default client table.
    pub fn new(home_directory: PathBuf, paths: McpSyncPaths) -> Self {
        let targets = default_client_targets(&home_directory);
        Self {
            home_directory,
            paths,
            targets,
            protected_server: Some(String::from(PROTECTED_SERVER)),
        }
    }

    pub fn with_targets(mut self, targets: Vec<ClientTarget>) -> Self {
        self.targets = targets;
        self
    }
}

/// Everything needed to put one server into the central config.
#[derive(Debug, Clone, Default)]
pub struct AddServerRequest {
    pub name: String,
    /// Detected from the server directory when `None`.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub required_env_vars: Vec<String>,
    pub extra_env_vars: BTreeMap<String, String>,
    /// Defaults to `<base>/<name>`.
    pub server_path: Option<PathBuf>,
}

impl AddServerRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddServerOutcome {
    pub record: CentralRecord,
    pub validation: ValidationReport,
    pub report: SyncReport,
}

#[derive(Debug, Clone)]
pub struct RemoveServerOutcome {
    pub removed_from_central: bool,
    pub report: SyncReport,
}

pub struct McpSyncEngine {
    environment: McpSyncEnvironment,
    central: CentralConfigStore,
    secrets: Box<dyn SecretRepository>,
    locator: Box<dyn ExecutableLocator>,
}

impl Default for McpSyncEngine {
    fn default() -> Self {
        Self::current()
    }
}

impl McpSyncEngine {
    pub fn current() -> Self {
        Self::for_environment(McpSyncEnvironment::current())
    }

    /// File-backed stores at the environment's central paths.
    pub fn for_environment(environment: McpSyncEnvironment) -> Self {
        let central = CentralConfigFile::new(environment.paths.central_config_path.clone());
        let secrets = EnvFileStore::new(environment.paths.central_env_path.clone());
        Self::new(
            environment,
            Box::new(central),
            Box::new(secrets),
            Box::new(PathLocator::default()),
        )
    }

    pub fn new(
        environment: McpSyncEnvironment,
        central: Box<dyn CentralConfigRepository>,
        secrets: Box<dyn SecretRepository>,
        locator: Box<dyn ExecutableLocator>,
    ) -> Self {
        Self {
            environment,
            central: CentralConfigStore::new(central),
            secrets,
            locator,
        }
    }

    pub fn environment(&self) -> &McpSyncEnvironment {
        &self.environment
    }

    pub fn load_central(&self) -> CentralConfig {
        self.central.load()
    }

    pub fn secrets(&self) -> &dyn SecretRepository {
        self.secrets.as_ref()
    }

    fn synchronizer(&self) -> ClientConfigSynchronizer<'_> {
        ClientConfigSynchronizer::new(&self.environment.targets, self.secrets.as_ref())
            .with_protected_server(self.environment.protected_server.as_deref())
    }

    fn validator(&self) -> ConfigValidator<'_> {
        ConfigValidator::new(self.locator.as_ref())
    }

    fn server_path(&self, name: &str, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.environment.paths.server_directory(name))
    }

    /// Records the server centrally, validates it, then writes it into every
    /// installed client.
    pub fn add_server(
        &self,
        request: &AddServerRequest,
    ) -> Result<AddServerOutcome, McpSyncError> {
        validate_server_name(&request.name)?;
        let server_dir = self.server_path(&request.name, request.server_path.as_deref());

        let (command, args) = match &request.command {
            Some(command) => (command.clone(), request.args.clone().unwrap_or_default()),
            None => {
                let (command, detected) = self.detect_command(&request.name, &server_dir)?;
                tracing::info!(server = %request.name, %command, "detected launch command");
                (command, request.args.clone().unwrap_or(detected))
            }
        };

        let mut extra = request.extra_env_vars.clone();
        if NODE_LAUNCHERS.contains(&command.as_str()) && server_dir.join(".env").is_file() {
            extra
                .entry(String::from("NODE_ENV"))
                .or_insert_with(|| String::from("production"));
        }

        let record = self.central.add_or_update(
            &request.name,
            &command,
            args,
            &request.required_env_vars,
            &extra,
        )?;

        let secrets = self.secrets.load();
        let validation = self.validator().validate(&record.name, &record.config, &secrets);
        for warning in &validation.warnings {
            tracing::warn!(server = %record.name, %warning, "validation warning");
        }

        let report = self
            .synchronizer()
            .update_server(&self.central.load(), &record.name)?;
        Ok(AddServerOutcome {
            record,
            validation,
            report,
        })
    }

    /// Pushes the current central definition of `name` to every client.
    pub fn configure_clients(&self, name: &str) -> Result<SyncReport, McpSyncError> {
        self.synchronizer().update_server(&self.central.load(), name)
    }

    /// Removes `name` from the central config and from every client.
    pub fn remove_server(&self, name: &str) -> Result<RemoveServerOutcome, McpSyncError> {
        validate_server_name(name)?;
        let removed_from_central = self.central.remove(name)?;
        let report = self.synchronizer().remove_server(name)?;
        Ok(RemoveServerOutcome {
            removed_from_central,
            report,
        })
    }

    pub fn sync_all(&self) -> SyncReport {
        self.synchronizer().sync_all(&self.central.load())
    }

    pub fn list_configured(&self) -> ConfiguredServers {
        self.synchronizer().list_configured()
    }

    /// Validates the central definition of `name`, falling back to the first
    /// client file that lists it.
    pub fn check_server(&self, name: &str) -> Result<ValidationReport, McpSyncError> {
        validate_server_name(name)?;
        let secrets = self.secrets.load();
        let central = self.central.load();
        if let Some(record) = central.servers.get(name) {
            return Ok(self.validator().validate(name, &record.config, &secrets));
        }

        if let Some(entry) = self.synchronizer().find_client_entry(name) {
            return Ok(self.validator().validate_json(name, &entry, &secrets));
        }

        Err(McpSyncError::ServerNotFound {
            name: name.to_string(),
            available: central.server_names(),
        })
    }

    pub fn collect_secrets(
        &self,
        name: &str,
        requests: &[SecretRequest],
        prompt: &mut dyn SecretPrompt,
        timeout: Duration,
    ) -> Result<CollectionOutcome, McpSyncError> {
        secrets::collect_secrets(name, requests, prompt, self.secrets.as_ref(), timeout)
    }

    pub fn manual_secret_instructions(
        &self,
        name: &str,
        requests: &[SecretRequest],
    ) -> Vec<String> {
        secrets::manual_secret_instructions(
            name,
            requests,
            &self.environment.paths.central_env_path,
        )
    }

    /// Scans `server_dir` and guesses its launch command.
    pub fn detect_command(
        &self,
        name: &str,
        server_dir: &Path,
    ) -> Result<(String, Vec<String>), McpSyncError> {
        let mut snapshot = if server_dir.is_dir() {
            DirectorySnapshot::scan(server_dir)?
        } else {
            tracing::warn!(path = %server_dir.display(), "server directory not found");
            DirectorySnapshot::new(name, server_dir)
        };
        snapshot.name = name.to_string();
        let tools = ToolAvailability {
            uv: self.uv_available(),
        };
        Ok(detect_command(&snapshot, tools))
    }

    fn uv_available(&self) -> bool {
        if matches!(self.locator.locate("uv"), LookupOutcome::Found(_)) {
            return true;
        }
        uv_fallback_locations(&self.environment.home_directory)
            .iter()
            .any(|candidate| is_executable(candidate))
    }

    pub fn introspect(&self, name: &str, explicit: Option<&Path>) -> InstallationInfo {
        introspect_installation(&self.server_path(name, explicit))
    }

    fn installed_directories(&self) -> Result<Vec<PathBuf>, McpSyncError> {
        installed_server_directories(
            &self.environment.paths.base_directory,
            self.environment.protected_server.as_deref(),
        )
    }

    fn central_config_path(&self) -> PathBuf {
        self.central
            .location()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.environment.paths.central_config_path.clone())
    }

    /// Every server directory under the base directory with its central and
    /// client status.
    pub fn inventory(&self) -> Result<Inventory, McpSyncError> {
        let central = self.central.load();
        let synchronizer = self.synchronizer();
        let configured = synchronizer.list_configured();
        for warning in &configured.warnings {
            tracing::warn!(%warning, "skipped unreadable client config");
        }

        let mut servers = Vec::new();
        for directory in self.installed_directories()? {
            let mut server = InstalledServer::inspect(&directory);
            server.in_central = central.servers.contains_key(&server.name);
            server.configured_in_clients = configured
                .servers
                .get(&server.name)
                .cloned()
                .unwrap_or_default();
            server.is_configured = !server.configured_in_clients.is_empty();
            if server.is_configured {
                server.configuration = synchronizer
                    .find_client_entry(&server.name)
                    .as_ref()
                    .map(ClientEntrySummary::from_entry);
            }
            servers.push(server);
        }

        let central_path = self.central_config_path();
        let last_updated = if central.metadata.last_updated.is_empty() {
            String::from("never")
        } else {
            central.metadata.last_updated.clone()
        };
        Ok(Inventory {
            base_directory: self.environment.paths.base_directory.clone(),
            total_servers: servers.len(),
            replication_instructions: replication_overview(&servers),
            central_config: CentralStatus {
                exists: central_path.exists(),
                path: central_path,
                servers_in_config: central.servers.len(),
                last_updated,
            },
            servers,
        })
    }

    /// Central records plus unrecorded server directories, with the names of
    /// the secrets each needs and instructions to rebuild them elsewhere.
    pub fn export_setup(&self) -> Result<SetupExport, McpSyncError> {
        let central = self.central.load();
        let paths = &self.environment.paths;

        let mut servers = central
            .servers
            .values()
            .map(|record| {
                let directory = paths.server_directory(&record.name);
                ExportedServer::from_record(record, directory.is_dir().then_some(directory))
            })
            .collect::<Vec<_>>();
        for directory in self.installed_directories()? {
            let exported = ExportedServer::from_directory(directory);
            if !central.servers.contains_key(&exported.name) {
                servers.push(exported);
            }
        }
        for server in &mut servers {
            if let Some(directory) = server.directory.as_deref() {
                if directory.join(".git").exists() {
                    server.git_url = git_remote_url(directory, GIT_LOOKUP_TIMEOUT);
                }
            }
        }

        let replication_instructions =
            replication_markdown(&servers, &paths.base_directory, &paths.central_env_path)?;
        tracing::info!(servers = servers.len(), "exported setup");
        Ok(SetupExport {
            export_timestamp: iso8601_now(),
            base_directory: paths.base_directory.clone(),
            central_config_path: self.central_config_path(),
            central_env_path: paths.central_env_path.clone(),
            total_servers: servers.len(),
            servers,
            replication_instructions,
            notes: EXPORT_NOTES.iter().map(|note| note.to_string()).collect(),
        })
    }
}
