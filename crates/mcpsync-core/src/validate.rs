use crate::env_store::SecretMap;
use crate::models::{EnvValue, ServerConfig};
use crate::placeholder::lookup_secret;
use crate::sync::has_path_separator;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

pub const PORTABLE_LAUNCHERS: [&str; 3] = ["npx", "uvx", "pipx"];
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(PathBuf),
    NotFound,
    TimedOut,
}

/// Resolves bare command names to executables.
pub trait ExecutableLocator {
    fn locate(&self, command: &str) -> LookupOutcome;
}

/// Searches `PATH` on a helper thread and gives up after `timeout`.
///
/// A lookup that overruns is abandoned; the helper thread finishes on its own
/// and its answer is dropped.
#[derive(Debug, Clone)]
pub struct PathLocator {
    timeout: Duration,
    search_path: Option<OsString>,
}

impl Default for PathLocator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TIMEOUT)
    }
}

impl PathLocator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            search_path: None,
        }
    }

    /// Searches `search_path` instead of the process `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }
}

impl ExecutableLocator for PathLocator {
    fn locate(&self, command: &str) -> LookupOutcome {
        let (tx, rx) = mpsc::channel();
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"));
        let owned_command = command.to_string();

        let spawned = std::thread::Builder::new()
            .name(String::from("mcpsync-lookup"))
            .spawn(move || {
                let _ = tx.send(find_in_path(&owned_command, search_path.as_deref()));
            });
        if let Err(error) = spawned {
            tracing::error!(command, %error, "failed to start executable lookup");
            return LookupOutcome::NotFound;
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Some(path)) => LookupOutcome::Found(path),
            Ok(None) | Err(RecvTimeoutError::Disconnected) => LookupOutcome::NotFound,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(command, timeout = ?self.timeout, "timed out resolving command");
                LookupOutcome::TimedOut
            }
        }
    }
}

pub fn find_in_path(command: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    for directory in std::env::split_paths(search_path) {
        for candidate in executable_candidates(&directory, command) {
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(windows)]
fn executable_candidates(directory: &Path, command: &str) -> Vec<PathBuf> {
    let mut candidates = vec![directory.join(command)];
    let extensions = std::env::var("PATHEXT").unwrap_or_else(|_| String::from(".EXE;.CMD;.BAT"));
    for extension in extensions.split(';').filter(|ext| !ext.is_empty()) {
        candidates.push(directory.join(format!("{command}{extension}")));
    }
    candidates
}

#[cfg(not(windows))]
fn executable_candidates(directory: &Path, command: &str) -> Vec<PathBuf> {
    vec![directory.join(command)]
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPortability {
    Portable,
    AbsolutePath,
    NonPortable,
}

pub fn classify_command(command: &str) -> CommandPortability {
    if PORTABLE_LAUNCHERS.contains(&command) {
        CommandPortability::Portable
    } else if has_path_separator(command) {
        CommandPortability::AbsolutePath
    } else {
        CommandPortability::NonPortable
    }
}

fn portable_alternative(command: &str) -> Option<&'static str> {
    match command {
        "uv" | "python" | "python3" => Some("uvx"),
        "node" | "deno" | "bun" => Some("npx"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_portability: Option<CommandPortability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars_resolved: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: ValidationChecks,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            checks: ValidationChecks::default(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }
}

pub struct ConfigValidator<'a> {
    locator: &'a dyn ExecutableLocator,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(locator: &'a dyn ExecutableLocator) -> Self {
        Self { locator }
    }

    pub fn validate(
        &self,
        server_name: &str,
        config: &ServerConfig,
        secrets: &SecretMap,
    ) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.check_command(&config.command, &mut report);
        check_script_path(&config.command, &config.args, &mut report);
        check_env(server_name, &config.env, secrets, &mut report);
        report
    }

    /// Same checks over a raw `mcpServers` entry as found in a client file.
    pub fn validate_json(
        &self,
        server_name: &str,
        entry: &JsonValue,
        secrets: &SecretMap,
    ) -> ValidationReport {
        let mut report = ValidationReport::new();
        let command = entry
            .get("command")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        self.check_command(command, &mut report);

        let args = match entry.get("args") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(ToString::to_string)
                .collect(),
            Some(_) => {
                report.error("Args must be a list");
                Vec::new()
            }
        };
        check_script_path(command, &args, &mut report);

        let env = entry
            .get("env")
            .and_then(JsonValue::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|raw| (key.clone(), EnvValue::parse(raw)))
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();
        check_env(server_name, &env, secrets, &mut report);
        report
    }

    fn check_command(&self, command: &str, report: &mut ValidationReport) {
        if command.is_empty() {
            report.error("No command specified");
            return;
        }

        let portability = classify_command(command);
        report.checks.command_portability = Some(portability);
        match portability {
            CommandPortability::Portable => {}
            CommandPortability::AbsolutePath => {
                if !Path::new(command).exists() {
                    report.warnings.push(format!(
                        "Command path '{command}' does not exist on this system"
                    ));
                }
            }
            CommandPortability::NonPortable => {
                match self.locator.locate(command) {
                    LookupOutcome::Found(path) => {
                        report.checks.command_resolved = Some(path.display().to_string());
                    }
                    LookupOutcome::NotFound => report
                        .warnings
                        .push(format!("Command '{command}' not found in PATH")),
                    LookupOutcome::TimedOut => report.warnings.push(format!(
                        "Command '{command}' could not be resolved before the lookup timed out"
                    )),
                }
                if let Some(alternative) = portable_alternative(command) {
                    report.warnings.push(format!(
                        "Command '{command}' may not be in PATH on all systems; \
                         consider '{alternative}' or an absolute path"
                    ));
                }
            }
        }
    }
}

fn check_script_path(command: &str, args: &[String], report: &mut ValidationReport) {
    if PORTABLE_LAUNCHERS.contains(&command) {
        return;
    }
    let Some(first) = args.first() else {
        return;
    };
    if !first.starts_with('-') && first.contains('/') && !Path::new(first).exists() {
        report
            .warnings
            .push(format!("Script path '{first}' does not exist"));
    }
}

fn check_env(
    server_name: &str,
    env: &BTreeMap<String, EnvValue>,
    secrets: &SecretMap,
    report: &mut ValidationReport,
) {
    if env.is_empty() {
        return;
    }
    let unresolved = env
        .iter()
        .filter_map(|(key, value)| value.placeholder_key().map(|base| (key, base)))
        .filter(|(_, base)| lookup_secret(secrets, server_name, base).is_none())
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>();

    if unresolved.is_empty() {
        report.checks.env_vars_resolved = Some(true);
    } else {
        report.warnings.push(format!(
            "Unresolved environment variables: {}",
            unresolved.join(", ")
        ));
        report.checks.env_vars_resolved = Some(false);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        classify_command, CommandPortability, ConfigValidator, ExecutableLocator, LookupOutcome,
        PathLocator,
    };
    use crate::env_store::SecretMap;
    use crate::models::{EnvValue, ServerConfig};
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    struct FixedLocator(LookupOutcome);

    impl ExecutableLocator for FixedLocator {
        fn locate(&self, _command: &str) -> LookupOutcome {
            self.0.clone()
        }
    }

    fn secrets(pairs: &[(&str, &str)]) -> SecretMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn classify_command_buckets() {
        assert_eq!(classify_command("npx"), CommandPortability::Portable);
        assert_eq!(
            classify_command("/usr/bin/node"),
            CommandPortability::AbsolutePath
        );
        assert_eq!(classify_command("node"), CommandPortability::NonPortable);
    }

    #[test]
    fn empty_command_is_a_hard_error() {
        let locator = FixedLocator(LookupOutcome::NotFound);
        let report = ConfigValidator::new(&locator).validate(
            "x",
            &ServerConfig::new("", vec![]),
            &SecretMap::new(),
        );
        assert!(!report.valid);
        assert_eq!(report.errors, vec![String::from("No command specified")]);
    }

    #[test]
    fn unresolved_placeholder_warns_with_env_key() {
        let locator = FixedLocator(LookupOutcome::NotFound);
        let mut config = ServerConfig::new("npx", vec!["-y".into(), "pkg".into()]);
        config
            .env
            .insert("TOKEN".into(), EnvValue::placeholder("TOKEN"));

        let report = ConfigValidator::new(&locator).validate("github", &config, &SecretMap::new());
        assert!(report.valid);
        assert!(report
            .warnings
            .iter()
            .any(|warning| warning == "Unresolved environment variables: TOKEN"));
        assert_eq!(report.checks.env_vars_resolved, Some(false));

        let resolved = ConfigValidator::new(&locator).validate(
            "github",
            &config,
            &secrets(&[("GITHUB_TOKEN", "abc123")]),
        );
        assert!(resolved.warnings.is_empty());
        assert_eq!(resolved.checks.env_vars_resolved, Some(true));
    }

    #[test]
    fn non_portable_command_uses_locator() {
        let found = FixedLocator(LookupOutcome::Found(PathBuf::from("/opt/bin/mytool")));
        let report = ConfigValidator::new(&found).validate(
            "x",
            &ServerConfig::new("mytool", vec![]),
            &SecretMap::new(),
        );
        assert_eq!(report.checks.command_resolved.as_deref(), Some("/opt/bin/mytool"));
        assert!(report.warnings.is_empty());

        let timed_out = FixedLocator(LookupOutcome::TimedOut);
        let report = ConfigValidator::new(&timed_out).validate(
            "x",
            &ServerConfig::new("node", vec![]),
            &SecretMap::new(),
        );
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn validate_json_rejects_non_list_args() {
        let locator = FixedLocator(LookupOutcome::NotFound);
        let report = ConfigValidator::new(&locator).validate_json(
            "x",
            &json!({"command": "npx", "args": "-y pkg"}),
            &SecretMap::new(),
        );
        assert!(!report.valid);
        assert!(report.errors.contains(&String::from("Args must be a list")));
    }

    #[test]
    fn missing_script_path_warns() {
        let locator = FixedLocator(LookupOutcome::Found(PathBuf::from("/usr/bin/python3")));
        let report = ConfigValidator::new(&locator).validate(
            "x",
            &ServerConfig::new("python3", vec!["/definitely/missing/server.py".into()]),
            &SecretMap::new(),
        );
        assert!(report
            .warnings
            .contains(&String::from("Script path '/definitely/missing/server.py' does not exist")));
    }

    #[cfg(unix)]
    #[test]
    fn path_locator_finds_executables_in_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let tool = temp.path().join("mytool");
        std::fs::write(&tool, "#!/bin/sh\n").expect("write tool");
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let plain = temp.path().join("plainfile");
        std::fs::write(&plain, "data").expect("write plain");

        let locator = PathLocator::new(Duration::from_secs(5)).with_search_path(temp.path());
        assert_eq!(locator.locate("mytool"), LookupOutcome::Found(tool));
        assert_eq!(locator.locate("plainfile"), LookupOutcome::NotFound);
        assert_eq!(locator.locate("absent"), LookupOutcome::NotFound);
    }
}
