//! Read-only views over installed servers: what sits in the base directory and
//! a portable export of the central catalog for another machine.

use crate::detect::{introspect_installation, InstallationInfo, InstallationType};
use crate::error::McpSyncError;
use crate::models::{CentralRecord, EnvValue, ServerConfig};
use crate::placeholder::namespaced_key;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

pub const EXPORT_NOTES: [&str; 3] = [
    "The instructions above will replicate your exact MCP setup",
    "Secrets are not exported - they must be re-entered on the new machine",
    "Save these instructions to share your setup or for future reference",
];

/// Server directories under `base`, sorted by name.
///
/// Hidden directories and `skip` (the installer's own directory) are left out.
/// A missing base directory lists nothing.
pub fn installed_server_directories(
    base: &Path,
    skip: Option<&str>,
) -> Result<Vec<PathBuf>, McpSyncError> {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(McpSyncError::io(base, error)),
    };

    let mut directories = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| McpSyncError::io(base, error))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || skip == Some(name.as_str()) {
            continue;
        }
        if entry.path().is_dir() {
            directories.push(entry.path());
        }
    }
    directories.sort();
    Ok(directories)
}

fn directory_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// What a client file says about a server, without its environment values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntrySummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Names only; client files carry resolved secrets.
    pub env_keys: Vec<String>,
}

impl ClientEntrySummary {
    pub fn from_entry(entry: &JsonValue) -> Self {
        let command = entry
            .get("command")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let args = entry
            .get("args")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let env_keys = entry
            .get("env")
            .and_then(JsonValue::as_object)
            .map(|env| env.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            command,
            args,
            env_keys,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledServer {
    pub name: String,
    pub path: PathBuf,
    pub has_install_script: bool,
    pub has_env_file: bool,
    pub has_node_modules: bool,
    pub has_package_json: bool,
    pub has_python_server: bool,
    pub files: usize,
    pub in_central: bool,
    pub configured_in_clients: Vec<String>,
    pub is_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ClientEntrySummary>,
    #[serde(flatten)]
    pub installation: InstallationInfo,
}

impl InstalledServer {
    /// Filesystem facts about `path`; client and central fields start empty.
    pub fn inspect(path: &Path) -> Self {
        let files = std::fs::read_dir(path)
            .map(|entries| entries.count())
            .unwrap_or(0);
        Self {
            name: directory_name(path),
            path: path.to_path_buf(),
            has_install_script: path.join("install.sh").exists(),
            has_env_file: path.join(".env").exists(),
            has_node_modules: path.join("node_modules").exists(),
            has_package_json: path.join("package.json").exists(),
            has_python_server: path.join("server.py").exists(),
            files,
            in_central: false,
            configured_in_clients: Vec::new(),
            is_configured: false,
            configuration: None,
            installation: introspect_installation(path),
        }
    }

    /// One line on how to get this server onto another machine.
    pub fn replication_step(&self) -> String {
        let info = &self.installation;
        match (info.installation_type, &info.npm_package, &info.source_url) {
            (Some(InstallationType::Npm), Some(_), _) => {
                format!("{}: No installation needed, just configure", self.name)
            }
            (Some(InstallationType::Git), _, Some(url)) => {
                format!("{}: Clone from {url}", self.name)
            }
            _ => format!("{}: Check configuration details", self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CentralStatus {
    pub exists: bool,
    pub path: PathBuf,
    pub servers_in_config: usize,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    pub base_directory: PathBuf,
    pub total_servers: usize,
    pub servers: Vec<InstalledServer>,
    pub central_config: CentralStatus,
    pub replication_instructions: Vec<String>,
}

pub fn replication_overview(servers: &[InstalledServer]) -> Vec<String> {
    if servers.is_empty() {
        return vec![String::from("No servers installed yet")];
    }
    let mut lines = vec![
        String::from("To replicate this setup on another machine:"),
        String::from("1. Install mcpsync"),
        String::from("2. Use the information below to reinstall each server:"),
    ];
    lines.extend(
        servers
            .iter()
            .map(|server| format!("   {}", server.replication_step())),
    );
    lines
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedServer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ServerConfig>,
    /// Variable names the new machine has to supply; never their values.
    pub required_secrets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
}

impl ExportedServer {
    pub fn from_record(record: &CentralRecord, directory: Option<PathBuf>) -> Self {
        Self {
            name: record.name.clone(),
            directory,
            configuration: Some(record.config.clone()),
            required_secrets: record.required_env_vars.iter().cloned().collect(),
            git_url: None,
        }
    }

    /// A directory that was installed but never recorded centrally.
    pub fn from_directory(directory: PathBuf) -> Self {
        Self {
            name: directory_name(&directory),
            directory: Some(directory),
            configuration: None,
            required_secrets: Vec::new(),
            git_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupExport {
    pub export_timestamp: String,
    pub base_directory: PathBuf,
    pub central_config_path: PathBuf,
    pub central_env_path: PathBuf,
    pub total_servers: usize,
    pub servers: Vec<ExportedServer>,
    /// Markdown walkthrough for rebuilding the setup with `mcpsync`.
    pub replication_instructions: String,
    pub notes: Vec<String>,
}

/// Quotes `value` for a POSIX shell when it holds anything beyond plain
/// word characters.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// The `mcpsync` invocation that recreates `config` as `name`.
pub fn add_command_line(name: &str, config: &ServerConfig) -> String {
    let mut parts = vec![
        String::from("mcpsync"),
        shell_quote(name),
        String::from("-c"),
        shell_quote(&config.command),
    ];
    for (key, value) in &config.env {
        match value {
            EnvValue::Placeholder(base) => {
                parts.push(String::from("-R"));
                parts.push(shell_quote(base));
            }
            EnvValue::Literal(literal) => {
                parts.push(String::from("-e"));
                parts.push(shell_quote(&format!("{key}={literal}")));
            }
        }
    }
    if !config.args.is_empty() {
        parts.push(String::from("--"));
        parts.extend(config.args.iter().map(|arg| shell_quote(arg)));
    }
    parts.join(" ")
}

pub fn replication_markdown(
    servers: &[ExportedServer],
    base_directory: &Path,
    env_path: &Path,
) -> Result<String, McpSyncError> {
    let mut lines = vec![
        String::from("# MCP Setup Replication Instructions"),
        String::new(),
        String::from("## Prerequisites"),
        String::from("1. Install Claude Desktop, Cursor, or another MCP-compatible client"),
        String::from("2. Install mcpsync"),
        String::new(),
        String::from("## Installation Steps"),
        String::new(),
    ];

    for (index, server) in servers.iter().enumerate() {
        lines.push(format!("### {}. {}", index + 1, server.name));
        let mut commands = Vec::new();
        if let Some(url) = &server.git_url {
            let target = base_directory.join(&server.name);
            commands.push(format!(
                "git clone {} {}",
                shell_quote(url),
                shell_quote(&target.display().to_string())
            ));
        }
        if let Some(config) = &server.configuration {
            commands.push(add_command_line(&server.name, config));
        }
        if commands.is_empty() {
            lines.push(String::from("Not in the central config; check the server directory."));
        } else {
            lines.push(String::from("```bash"));
            lines.extend(commands);
            lines.push(String::from("```"));
        }
        if !server.required_secrets.is_empty() {
            lines.push(format!("Add to {}:", env_path.display()));
            lines.push(String::from("```"));
            for secret in &server.required_secrets {
                lines.push(format!("{}=your_value_here", namespaced_key(&server.name, secret)));
            }
            lines.push(String::from("```"));
        }
        lines.push(String::new());
    }

    lines.push(String::from("## Final Step: Configure All Clients"));
    lines.push(String::from("```bash"));
    lines.push(String::from("mcpsync --sync"));
    lines.push(String::from("```"));
    lines.push(String::new());
    lines.push(String::from("## Manual Configuration (if needed)"));
    lines.push(String::new());
    lines.push(String::from(
        "If automated installation fails, here are the manual configurations:",
    ));
    lines.push(String::new());

    for server in servers {
        let Some(config) = &server.configuration else {
            continue;
        };
        let mut entry = serde_json::Map::new();
        entry.insert(server.name.clone(), serde_json::to_value(config)?);
        lines.push(format!("### {}", server.name));
        lines.push(String::from("```json"));
        lines.push(serde_json::to_string_pretty(&JsonValue::Object(entry))?);
        lines.push(String::from("```"));
        if !server.required_secrets.is_empty() {
            lines.push(format!(
                "Required environment variables: {}",
                server.required_secrets.join(", ")
            ));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
