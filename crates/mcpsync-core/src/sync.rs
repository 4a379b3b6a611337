//! Fan-out of central server definitions into every client's JSON config.
//!
//! Each target is handled on its own: a failure is recorded in the report and
//! the loop moves on. Every write is preceded by a backup of the content it
//! replaces. Targets are not locked; a client editing its file between our
//! read and write loses that edit.

use crate::backup::write_backup;
use crate::clients::ClientTarget;
use crate::env_store::{SecretMap, SecretRepository};
use crate::error::McpSyncError;
use crate::fs::{read_optional_file, write_file_atomic};
use crate::models::{validate_server_name, CentralConfig, ServerConfig};
use crate::placeholder::{resolve_placeholders, unresolved_placeholders};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MCP_SERVERS_KEY: &str = "mcpServers";
pub const PROTECTED_SERVER: &str = "install-mcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Update,
    Remove,
    SyncAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAction {
    Added,
    Updated,
    Removed,
    Synced,
}

impl TargetAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added to",
            Self::Updated => "updated in",
            Self::Removed => "removed from",
            Self::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ClientNotInstalled,
    NotConfigured,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientNotInstalled => "directory not found",
            Self::NotConfigured => "not configured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedTarget {
    pub client: String,
    pub path: PathBuf,
    pub action: TargetAction,
    #[serde(rename = "backup_path")]
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTarget {
    pub client: String,
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub client: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreservedEntry {
    pub client: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub operation: SyncOperation,
    pub servers: Vec<String>,
    pub updated: Vec<UpdatedTarget>,
    pub skipped: Vec<SkippedTarget>,
    pub errors: Vec<FailedTarget>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preserved: Vec<PreservedEntry>,
    /// Server name to env keys whose placeholder had no secret.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unresolved: BTreeMap<String, Vec<String>>,
}

impl SyncReport {
    fn new(operation: SyncOperation, servers: Vec<String>) -> Self {
        Self {
            operation,
            servers,
            updated: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            preserved: Vec::new(),
            unresolved: BTreeMap::new(),
        }
    }

    /// True when at least one target was written.
    pub fn success(&self) -> bool {
        !self.updated.is_empty()
    }

    fn skip(&mut self, target: &ClientTarget, reason: SkipReason) {
        tracing::debug!(client = %target.client, reason = reason.as_str(), "target skipped");
        self.skipped.push(SkippedTarget {
            client: target.client.clone(),
            path: target.path.clone(),
            reason,
        });
    }

    fn fail(&mut self, target: &ClientTarget, message: String) {
        tracing::warn!(client = %target.client, path = %target.path.display(), %message, "target failed");
        self.errors.push(FailedTarget {
            client: target.client.clone(),
            path: target.path.clone(),
            message,
        });
    }
}

enum Mutation {
    Write(TargetAction),
    Skip(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfiguredServers {
    /// Server name to the clients that have it configured.
    pub servers: BTreeMap<String, Vec<String>>,
    pub warnings: Vec<String>,
}

pub struct ClientConfigSynchronizer<'a> {
    targets: &'a [ClientTarget],
    secrets: &'a dyn SecretRepository,
    protected_server: Option<&'a str>,
}

impl<'a> ClientConfigSynchronizer<'a> {
    pub fn new(targets: &'a [ClientTarget], secrets: &'a dyn SecretRepository) -> Self {
        Self {
            targets,
            secrets,
            protected_server: Some(PROTECTED_SERVER),
        }
    }

    pub fn with_protected_server(mut self, server: Option<&'a str>) -> Self {
        self.protected_server = server;
        self
    }

    /// Writes the resolved definition of `name` into every installed client.
    pub fn update_server(
        &self,
        central: &CentralConfig,
        name: &str,
    ) -> Result<SyncReport, McpSyncError> {
        validate_server_name(name)?;
        let Some(record) = central.servers.get(name) else {
            return Err(McpSyncError::ServerNotFound {
                name: name.to_string(),
                available: central.server_names(),
            });
        };

        let secrets = self.secrets.load();
        let mut report = SyncReport::new(SyncOperation::Update, vec![name.to_string()]);
        note_unresolved(&mut report, name, &record.config, &secrets);
        let entry = config_to_json(&resolve_placeholders(&record.config, name, &secrets));

        for target in self.targets {
            self.apply_to_target(target, true, &mut report, |servers| {
                let action = if servers.contains_key(name) {
                    TargetAction::Updated
                } else {
                    TargetAction::Added
                };
                servers.insert(name.to_string(), entry.clone());
                Mutation::Write(action)
            });
        }

        Ok(report)
    }

    /// Deletes `name` from every client that has it configured.
    pub fn remove_server(&self, name: &str) -> Result<SyncReport, McpSyncError> {
        validate_server_name(name)?;
        let mut report = SyncReport::new(SyncOperation::Remove, vec![name.to_string()]);

        for target in self.targets {
            self.apply_to_target(target, false, &mut report, |servers| {
                if servers.shift_remove(name).is_some() {
                    Mutation::Write(TargetAction::Removed)
                } else {
                    Mutation::Skip(SkipReason::NotConfigured)
                }
            });
        }

        Ok(report)
    }

    /// Writes every central definition into every installed client.
    pub fn sync_all(&self, central: &CentralConfig) -> SyncReport {
        let secrets = self.secrets.load();
        let mut report = SyncReport::new(SyncOperation::SyncAll, central.server_names());
        if central.servers.is_empty() {
            tracing::warn!("no servers in central config, nothing to sync");
            return report;
        }

        let mut resolved = Vec::with_capacity(central.servers.len());
        for (name, record) in &central.servers {
            note_unresolved(&mut report, name, &record.config, &secrets);
            resolved.push((
                name.as_str(),
                record.config.command.as_str(),
                config_to_json(&resolve_placeholders(&record.config, name, &secrets)),
            ));
        }

        for target in self.targets {
            let mut preserved_here = Vec::new();
            self.apply_to_target(target, true, &mut report, |servers| {
                for (name, central_command, entry) in &resolved {
                    if self.keeps_local_entry(servers, name, central_command) {
                        preserved_here.push(PreservedEntry {
                            client: target.client.clone(),
                            server: name.to_string(),
                        });
                        continue;
                    }
                    servers.insert(name.to_string(), entry.clone());
                }
                Mutation::Write(TargetAction::Synced)
            });
            report.preserved.extend(preserved_here);
        }

        report
    }

    /// Every server name found in existing client configs, with the clients
    /// that list it.
    pub fn list_configured(&self) -> ConfiguredServers {
        let mut configured = ConfiguredServers::default();
        for target in self.targets {
            let servers = match read_client_servers(target) {
                Ok(Some(servers)) => servers,
                Ok(None) => continue,
                Err(warning) => {
                    configured.warnings.push(warning);
                    continue;
                }
            };
            for name in servers.keys() {
                configured
                    .servers
                    .entry(name.clone())
                    .or_default()
                    .push(target.client.clone());
            }
        }
        configured
    }

    /// The raw `mcpServers` entry for `name` from the first client listing it.
    pub fn find_client_entry(&self, name: &str) -> Option<JsonValue> {
        self.targets
            .iter()
            .filter_map(|target| read_client_servers(target).ok().flatten())
            .find_map(|mut servers| servers.remove(name))
    }

    /// A protected server whose local command is a path is not replaced by a
    /// central entry that only names a bare command.
    fn keeps_local_entry(
        &self,
        servers: &JsonMap<String, JsonValue>,
        name: &str,
        central_command: &str,
    ) -> bool {
        if self.protected_server != Some(name) {
            return false;
        }
        let current_command = servers
            .get(name)
            .and_then(|entry| entry.get("command"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        has_path_separator(current_command) && !has_path_separator(central_command)
    }

    fn apply_to_target<F>(
        &self,
        target: &ClientTarget,
        create_when_missing: bool,
        report: &mut SyncReport,
        mutate: F,
    ) where
        F: FnOnce(&mut JsonMap<String, JsonValue>) -> Mutation,
    {
        if !target.is_installed() {
            report.skip(target, SkipReason::ClientNotInstalled);
            return;
        }

        let original = match read_optional_file(&target.path) {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) if create_when_missing => None,
            Ok(None) => {
                report.skip(target, SkipReason::NotConfigured);
                return;
            }
            Err(error) => {
                report.fail(target, error.to_string());
                return;
            }
        };

        let mut root = match parse_client_document(original.as_deref()) {
            Ok(root) => root,
            Err(message) => {
                report.fail(target, message);
                return;
            }
        };

        let servers = root
            .entry(MCP_SERVERS_KEY.to_string())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        let Some(servers) = servers.as_object_mut() else {
            report.fail(target, format!("{MCP_SERVERS_KEY} is not a JSON object"));
            return;
        };

        let action = match mutate(servers) {
            Mutation::Write(action) => action,
            Mutation::Skip(reason) => {
                report.skip(target, reason);
                return;
            }
        };

        let mut rendered = match serde_json::to_vec_pretty(&JsonValue::Object(root)) {
            Ok(rendered) => rendered,
            Err(error) => {
                report.fail(target, format!("failed to serialize config: {error}"));
                return;
            }
        };
        rendered.push(b'\n');

        let pre_write = original.unwrap_or_else(|| b"{}\n".to_vec());
        let backup_path = match write_backup(&target.path, &pre_write) {
            Ok(path) => path,
            Err(error) => {
                report.fail(target, format!("backup failed, target left untouched: {error}"));
                return;
            }
        };

        if let Err(error) = write_file_atomic(&target.path, &rendered) {
            report.fail(target, error.to_string());
            return;
        }

        tracing::info!(
            client = %target.client,
            path = %target.path.display(),
            action = action.as_str(),
            "client config written"
        );
        report.updated.push(UpdatedTarget {
            client: target.client.clone(),
            path: target.path.clone(),
            action,
            backup_path,
        });
    }
}

fn parse_client_document(bytes: Option<&[u8]>) -> Result<JsonMap<String, JsonValue>, String> {
    let Some(bytes) = bytes else {
        return Ok(JsonMap::new());
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonMap::new());
    }
    match serde_json::from_slice::<JsonValue>(bytes) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(String::from("root is not a JSON object")),
        Err(error) => Err(format!("Invalid JSON - {error}")),
    }
}

fn read_client_servers(target: &ClientTarget) -> Result<Option<JsonMap<String, JsonValue>>, String> {
    let bytes = match read_optional_file(&target.path) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(None),
        Err(error) => return Err(format!("Could not read {} config: {error}", target.client)),
    };
    let root = serde_json::from_slice::<JsonValue>(&bytes)
        .map_err(|_| format!("Invalid JSON in {} config", target.client))?;
    match root {
        JsonValue::Object(mut root) => match root.remove(MCP_SERVERS_KEY) {
            Some(JsonValue::Object(servers)) => Ok(Some(servers)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn note_unresolved(report: &mut SyncReport, name: &str, config: &ServerConfig, secrets: &SecretMap) {
    let missing = unresolved_placeholders(config, name, secrets);
    if !missing.is_empty() {
        tracing::warn!(server = name, keys = ?missing, "placeholders left unresolved");
        report.unresolved.insert(name.to_string(), missing);
    }
}

pub(crate) fn has_path_separator(command: &str) -> bool {
    command.contains('/') || command.contains('\\')
}

/// Client-facing shape of a server definition: `command`, `args`, and `env`
/// when there is any.
pub fn config_to_json(config: &ServerConfig) -> JsonValue {
    let mut object = JsonMap::new();
    object.insert(
        "command".to_string(),
        JsonValue::String(config.command.clone()),
    );
    object.insert(
        "args".to_string(),
        JsonValue::Array(
            config
                .args
                .iter()
                .map(|item| JsonValue::String(item.clone()))
                .collect(),
        ),
    );
    if !config.env.is_empty() {
        let mut env = JsonMap::new();
        for (key, value) in &config.env {
            env.insert(key.clone(), JsonValue::String(value.render()));
        }
        object.insert("env".to_string(), JsonValue::Object(env));
    }
    JsonValue::Object(object)
}
